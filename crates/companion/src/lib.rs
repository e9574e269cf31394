//! Tether companion: create/delete/exists over the dynamically-typed
//! companion instance living in the target environment.
//!
//! Every operation collapses "already there" / "already gone" into success so
//! a driver can re-invoke it after a crash at any point.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kube::core::DynamicObject;
use metrics::counter;
use tracing::{debug, info};

use tether_core::{labels, LifecycleConfig, ResourceDescriptor, StoreError};
use tether_store::{Propagation, ResourceStore};

#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    #[error("invalid companion descriptor: {0}")]
    Descriptor(#[source] StoreError),
    #[error("failed to create companion instance {target}: {source}")]
    Create { target: ResourceDescriptor, #[source] source: StoreError },
    #[error("failed to delete companion instance {target}: {source}")]
    Delete { target: ResourceDescriptor, #[source] source: StoreError },
    #[error("failed to fetch companion instance {target}: {source}")]
    Fetch { target: ResourceDescriptor, #[source] source: StoreError },
}

impl CompanionError {
    /// Underlying store failure, if any.
    pub fn store_error(&self) -> &StoreError {
        match self {
            CompanionError::Descriptor(source)
            | CompanionError::Create { source, .. }
            | CompanionError::Delete { source, .. }
            | CompanionError::Fetch { source, .. } => source,
        }
    }
}

pub type CompanionResult<T> = Result<T, CompanionError>;

/// Companion instance operations against the target environment.
#[async_trait::async_trait]
pub trait CompanionOps: Send + Sync {
    /// Create the instance tagged with the ownership label; an existing
    /// instance counts as success.
    async fn create(&self, descriptor: &DynamicObject) -> CompanionResult<()>;

    /// Issue a background-propagation delete. Returns `true` only once the
    /// instance is confirmed gone (`NotFound`); an accepted delete is `false`.
    async fn delete(&self, descriptor: &DynamicObject) -> CompanionResult<bool>;

    async fn exists(&self, descriptor: &DynamicObject) -> CompanionResult<bool>;

    /// Fetch the live instance, `None` when absent.
    async fn get(&self, descriptor: &DynamicObject) -> CompanionResult<Option<DynamicObject>>;
}

/// Default implementation over a target-environment `ResourceStore`.
pub struct CompanionClient {
    store: Arc<dyn ResourceStore>,
    config: Arc<LifecycleConfig>,
}

impl CompanionClient {
    pub fn new(store: Arc<dyn ResourceStore>, config: Arc<LifecycleConfig>) -> Self {
        Self { store, config }
    }

    /// Object to submit: descriptor minus server-owned fields, plus the ownership label.
    fn build(&self, descriptor: &DynamicObject) -> DynamicObject {
        let mut obj = descriptor.clone();
        obj.metadata.uid = None;
        obj.metadata.resource_version = None;
        obj.metadata.managed_fields = None;
        obj.metadata.creation_timestamp = None;
        obj.metadata.deletion_timestamp = None;
        labels::merge_label(&mut obj.metadata, &self.config.managed_by_label, &self.config.managed_by_value);
        obj
    }
}

fn target_of(descriptor: &DynamicObject) -> CompanionResult<ResourceDescriptor> {
    ResourceDescriptor::from_object(descriptor).map_err(CompanionError::Descriptor)
}

#[async_trait::async_trait]
impl CompanionOps for CompanionClient {
    async fn create(&self, descriptor: &DynamicObject) -> CompanionResult<()> {
        let target = target_of(descriptor)?;
        let obj = self.build(descriptor);
        match self.store.create(&obj, &self.config.companion_finalizer).await {
            Ok(_) => {
                counter!("companion_create_total", 1u64);
                info!(target = %target, "companion instance created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(target = %target, "companion instance already exists");
                Ok(())
            }
            Err(source) => Err(CompanionError::Create { target, source }),
        }
    }

    async fn delete(&self, descriptor: &DynamicObject) -> CompanionResult<bool> {
        let target = target_of(descriptor)?;
        match self.store.delete(&target, Propagation::Background).await {
            Ok(()) => {
                counter!("companion_delete_total", 1u64);
                info!(target = %target, "companion instance deletion requested");
                Ok(false)
            }
            Err(e) if e.is_not_found() => Ok(true),
            Err(source) => Err(CompanionError::Delete { target, source }),
        }
    }

    async fn exists(&self, descriptor: &DynamicObject) -> CompanionResult<bool> {
        Ok(self.get(descriptor).await?.is_some())
    }

    async fn get(&self, descriptor: &DynamicObject) -> CompanionResult<Option<DynamicObject>> {
        let target = target_of(descriptor)?;
        match self.store.get(&target).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(CompanionError::Fetch { target, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::labels::label_value;
    use tether_store::{MemoryStore, StoreOp};

    fn descriptor() -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "g/v1",
            "kind": "K",
            "metadata": { "name": "n", "namespace": "ns", "labels": { "app": "demo" } },
            "spec": { "size": 3 }
        }))
        .unwrap()
    }

    fn client() -> (Arc<MemoryStore>, CompanionClient) {
        let store = Arc::new(MemoryStore::new());
        let client = CompanionClient::new(store.clone(), Arc::new(LifecycleConfig::default()));
        (store, client)
    }

    fn target() -> ResourceDescriptor {
        ResourceDescriptor::new("g", "v1", "K", "n", Some("ns"))
    }

    #[tokio::test]
    async fn create_merges_ownership_label() {
        let (store, client) = client();
        client.create(&descriptor()).await.unwrap();
        let live = store.object(&target()).await.expect("created");
        let cfg = LifecycleConfig::default();
        assert_eq!(label_value(&live.metadata, &cfg.managed_by_label), Some(cfg.managed_by_value.as_str()));
        assert_eq!(label_value(&live.metadata, "app"), Some("demo"));
        assert_eq!(live.data["spec"]["size"], 3);
        let calls = store.calls().await;
        assert_eq!(calls[0].field_owner.as_deref(), Some(cfg.companion_finalizer.as_str()));
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let (store, client) = client();
        client.create(&descriptor()).await.unwrap();
        client.create(&descriptor()).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.count(StoreOp::Create).await, 2);
    }

    #[tokio::test]
    async fn create_surfaces_other_errors() {
        let (store, client) = client();
        store.fail_on(StoreOp::Create, None, StoreError::Transient("timeout".into())).await;
        let err = client.create(&descriptor()).await.unwrap_err();
        assert!(matches!(err, CompanionError::Create { .. }));
        assert!(err.store_error().is_transient());
        assert!(err.to_string().contains("g/v1/K ns/n"), "err={}", err);
    }

    #[tokio::test]
    async fn delete_reports_gone_only_on_not_found() {
        let (store, client) = client();
        client.create(&descriptor()).await.unwrap();
        assert!(!client.delete(&descriptor()).await.unwrap());
        assert!(client.delete(&descriptor()).await.unwrap());
        let deletes: Vec<_> = store.calls().await.into_iter().filter(|c| c.op == StoreOp::Delete).collect();
        assert!(deletes.iter().all(|c| c.propagation == Some(Propagation::Background)));
    }

    #[tokio::test]
    async fn delete_error_is_not_gone() {
        let (store, client) = client();
        store.fail_on(StoreOp::Delete, Some("n"), StoreError::Conflict("busy".into())).await;
        let err = client.delete(&descriptor()).await.unwrap_err();
        assert!(matches!(err, CompanionError::Delete { .. }));
    }

    #[tokio::test]
    async fn exists_normalizes_not_found() {
        let (store, client) = client();
        assert!(!client.exists(&descriptor()).await.unwrap());
        client.create(&descriptor()).await.unwrap();
        assert!(client.exists(&descriptor()).await.unwrap());
        store.fail_once(StoreOp::Get, None, StoreError::Transient("net".into())).await;
        assert!(matches!(client.exists(&descriptor()).await, Err(CompanionError::Fetch { .. })));
    }

    #[tokio::test]
    async fn descriptor_without_kind_is_rejected() {
        let (_store, client) = client();
        let mut bad = descriptor();
        bad.types = None;
        assert!(matches!(client.create(&bad).await, Err(CompanionError::Descriptor(_))));
    }
}
