//! Tether lifecycle: keeps a manifest's companion instance, its finalizers and
//! the ownership labels it placed consistent across the control-plane store
//! and the target-environment store.

#![forbid(unsafe_code)]

pub mod error;
pub mod label_removal;
pub mod manifest_client;
pub mod phase;
pub mod use_case;

pub use error::{LabelSweepError, LifecycleError, LifecycleResult, ResourceFailure};
pub use label_removal::{LabelRemovalService, SweepReport};
pub use manifest_client::ManifestClient;
pub use phase::CompanionPhase;
pub use tether_core::Completion;
pub use use_case::{ManifestLifecycle, WAITING_FOR_COMPANION_DELETION};
