//! Tether core types: the manifest model, finalizer and label edits, the
//! store error taxonomy and injected lifecycle configuration.

#![forbid(unsafe_code)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod finalizer;
pub mod labels;
pub mod manifest;

pub use config::LifecycleConfig;
pub use descriptor::{ObjectKey, ResourceDescriptor};
pub use error::{CodecError, StoreError};
pub use manifest::{LastOperation, Manifest, ManifestSpec, ManifestStatus, State};

/// Result of a resumable lifecycle step.
///
/// `Pending` asks the driver to invoke the step again; it is returned both
/// while waiting on the target environment and right after a finalizer was
/// cleared, so the finalizer-free state is observed in a separate pass.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Completion {
    Pending,
    Done,
}

impl Completion {
    pub fn is_done(self) -> bool {
        matches!(self, Completion::Done)
    }
}

pub mod prelude {
    pub use super::{Completion, LifecycleConfig, Manifest, ManifestStatus, ObjectKey, ResourceDescriptor, State, StoreError};
}
