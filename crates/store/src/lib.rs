//! Tether store: the resource store seam and an in-RAM implementation.

#![forbid(unsafe_code)]

use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use tether_core::{ResourceDescriptor, StoreError};

mod memory;

pub use memory::{MemoryStore, StoreCall};

pub type StoreResult<T> = Result<T, StoreError>;

/// How dependents of a deleted object are handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Propagation {
    #[default]
    Background,
    Foreground,
    Orphan,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
    PatchApply,
    PatchStatus,
}

/// Get/create/update/delete/apply primitives over one resource store.
///
/// `NotFound` and `AlreadyExists` are reported as distinguishable errors so
/// callers can treat them as idempotent success. Implementations never retry.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, target: &ResourceDescriptor) -> StoreResult<DynamicObject>;

    async fn create(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject>;

    /// Replace the object; a stale `metadata.resourceVersion` yields `Conflict`.
    async fn update(&self, obj: &DynamicObject) -> StoreResult<DynamicObject>;

    async fn delete(&self, target: &ResourceDescriptor, propagation: Propagation) -> StoreResult<()>;

    /// Server-side apply: `field_owner` forcibly takes the fields present in
    /// `obj`; fields it does not mention are left alone.
    async fn patch_apply(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject>;

    /// Server-side apply against the status subresource.
    async fn patch_status(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject>;
}
