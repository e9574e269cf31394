use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a manifest stands in its companion lifecycle, as observed from
/// both stores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompanionPhase {
    /// No descriptor: nothing to manage.
    NoCompanion,
    /// Companion missing or its finalizer not yet persisted.
    CompanionPending,
    /// Companion present and protected by its finalizer.
    CompanionReady,
    /// Manifest deletion requested; companion still live.
    DeletionRequested,
    /// Companion deletion in flight, or gone with the finalizer not yet cleared.
    /// Also covers a companion deleted out from under a live manifest.
    CompanionDeleting,
    /// Companion gone and finalizer cleared.
    Done,
}

impl CompanionPhase {
    pub(crate) fn classify(deleting: bool, companion: Option<bool>, finalizer_held: bool) -> Self {
        // companion: None = absent, Some(true) = present with deletion in flight
        match (deleting, companion) {
            (false, Some(true)) => CompanionPhase::CompanionDeleting,
            (false, Some(false)) if finalizer_held => CompanionPhase::CompanionReady,
            (false, _) => CompanionPhase::CompanionPending,
            (true, Some(true)) => CompanionPhase::CompanionDeleting,
            (true, Some(false)) => CompanionPhase::DeletionRequested,
            (true, None) if finalizer_held => CompanionPhase::CompanionDeleting,
            (true, None) => CompanionPhase::Done,
        }
    }
}

impl fmt::Display for CompanionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
