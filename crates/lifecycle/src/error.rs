use std::fmt;

use tether_companion::CompanionError;
use tether_core::{CodecError, ObjectKey, ResourceDescriptor, StoreError};

/// One resource the label sweep could not clean.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceFailure {
    pub target: ResourceDescriptor,
    pub stage: &'static str,
    pub source: StoreError,
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: failed to {}: {}", self.target, self.stage, self.source)
    }
}

/// Every per-resource failure of one label sweep, joined.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSweepError {
    pub label: String,
    pub failures: Vec<ResourceFailure>,
}

impl fmt::Display for LabelSweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to remove {} label from one or more resources: ", self.label)?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for LabelSweepError {}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Companion(#[from] CompanionError),
    #[error("failed to fetch manifest {key}: {source}")]
    FetchManifest { key: ObjectKey, #[source] source: StoreError },
    #[error("failed to add finalizers {finalizers:?} to manifest {key}: {source}")]
    AddFinalizers { key: ObjectKey, finalizers: Vec<String>, #[source] source: StoreError },
    #[error("failed to remove finalizers {finalizers:?} from manifest {key}: {source}")]
    RemoveFinalizers { key: ObjectKey, finalizers: Vec<String>, #[source] source: StoreError },
    #[error("failed to update manifest {key}: {source}")]
    UpdateManifest { key: ObjectKey, #[source] source: StoreError },
    #[error("failed to patch status of manifest {key}: {source}")]
    PatchStatus { key: ObjectKey, #[source] source: StoreError },
    #[error(transparent)]
    LabelSweep(#[from] LabelSweepError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl LifecycleError {
    /// Whether the failure is an optimistic-lock violation worth an
    /// immediate re-fetch.
    pub fn is_conflict(&self) -> bool {
        match self {
            LifecycleError::Companion(e) => e.store_error().is_conflict(),
            LifecycleError::FetchManifest { source, .. }
            | LifecycleError::AddFinalizers { source, .. }
            | LifecycleError::RemoveFinalizers { source, .. }
            | LifecycleError::UpdateManifest { source, .. }
            | LifecycleError::PatchStatus { source, .. } => source.is_conflict(),
            LifecycleError::LabelSweep(e) => e.failures.iter().any(|f| f.source.is_conflict()),
            LifecycleError::Codec(_) => false,
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
