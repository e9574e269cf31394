//! Control-plane operations on the manifest entity itself.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use tether_core::{finalizer, LifecycleConfig, Manifest, ManifestStatus, ObjectKey};
use tether_store::ResourceStore;

use crate::error::{LifecycleError, LifecycleResult};

/// Record `err` as the manifest's error state and hand it back.
pub(crate) fn fail(manifest: &mut Manifest, err: LifecycleError) -> LifecycleError {
    warn!(manifest = %manifest.key(), error = %err, "lifecycle step failed");
    let status = manifest.status.clone().with_err(&err);
    manifest.set_status(status);
    err
}

pub struct ManifestClient {
    store: Arc<dyn ResourceStore>,
    config: Arc<LifecycleConfig>,
}

impl ManifestClient {
    pub fn new(store: Arc<dyn ResourceStore>, config: Arc<LifecycleConfig>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Fresh copy from the store; `None` once the manifest is physically gone.
    pub async fn get(&self, key: &ObjectKey) -> LifecycleResult<Option<Manifest>> {
        match self.store.get(&Manifest::descriptor_for(key)).await {
            Ok(obj) => Ok(Some(Manifest::from_dynamic(obj)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(LifecycleError::FetchManifest { key: key.clone(), source }),
        }
    }

    /// Optimistic replace; a stale copy fails with a conflict.
    pub async fn update(&self, manifest: &mut Manifest) -> LifecycleResult<()> {
        let obj = manifest.to_dynamic()?;
        match self.store.update(&obj).await {
            Ok(updated) => {
                manifest.metadata.resource_version = updated.metadata.resource_version;
                Ok(())
            }
            Err(source) => Err(LifecycleError::UpdateManifest { key: manifest.key(), source }),
        }
    }

    /// Persist `finalizers` through an apply patch owned by `field_owner`;
    /// the in-memory copy is updated only on success.
    pub(crate) async fn apply_finalizers(
        &self,
        manifest: &mut Manifest,
        finalizers: Vec<String>,
        field_owner: &str,
    ) -> LifecycleResult<()> {
        let mut body = manifest.descriptor().to_object();
        body.metadata.finalizers = Some(finalizers.clone());
        match self.store.patch_apply(&body, field_owner).await {
            Ok(applied) => {
                counter!("manifest_finalizer_patch_total", 1u64);
                debug!(manifest = %manifest.key(), ?finalizers, owner = %field_owner, "finalizers applied");
                manifest.metadata.finalizers = Some(finalizers);
                manifest.metadata.resource_version = applied.metadata.resource_version;
                Ok(())
            }
            Err(source) => Err(LifecycleError::AddFinalizers { key: manifest.key(), finalizers, source }),
        }
    }

    /// Attach the lifecycle and label-removal finalizers. Returns whether a
    /// write happened.
    pub async fn add_mandatory_finalizers(&self, manifest: &mut Manifest) -> LifecycleResult<bool> {
        let mut meta = manifest.metadata.clone();
        if !finalizer::add_finalizers(&mut meta, &self.config.mandatory_finalizers()) {
            return Ok(false);
        }
        let finalizers = meta.finalizers.unwrap_or_default();
        match self.apply_finalizers(manifest, finalizers, &self.config.lifecycle_finalizer).await {
            Ok(()) => {
                info!(manifest = %manifest.key(), "mandatory finalizers attached");
                Ok(true)
            }
            Err(e) => Err(fail(manifest, e)),
        }
    }

    pub async fn remove_mandatory_finalizers(&self, manifest: &mut Manifest) -> LifecycleResult<bool> {
        let mandatory = self.config.mandatory_finalizers();
        let before = manifest.metadata.finalizers.clone();
        if !finalizer::remove_finalizers(&mut manifest.metadata, &mandatory) {
            return Ok(false);
        }
        self.persist_removal(manifest, before, mandatory.iter().map(|s| s.to_string()).collect()).await
    }

    pub async fn remove_all_finalizers(&self, manifest: &mut Manifest) -> LifecycleResult<bool> {
        let before = manifest.metadata.finalizers.clone();
        if !finalizer::remove_all_finalizers(&mut manifest.metadata) {
            return Ok(false);
        }
        let removed = before.clone().unwrap_or_default();
        self.persist_removal(manifest, before, removed).await
    }

    async fn persist_removal(
        &self,
        manifest: &mut Manifest,
        before: Option<Vec<String>>,
        removed: Vec<String>,
    ) -> LifecycleResult<bool> {
        match self.update(manifest).await {
            Ok(()) => {
                info!(manifest = %manifest.key(), ?removed, "finalizers removed");
                Ok(true)
            }
            Err(LifecycleError::UpdateManifest { source, .. }) if source.is_not_found() => {
                debug!(manifest = %manifest.key(), "manifest already gone");
                Ok(false)
            }
            Err(LifecycleError::UpdateManifest { key, source }) => {
                manifest.metadata.finalizers = before;
                Err(fail(manifest, LifecycleError::RemoveFinalizers { key, finalizers: removed, source }))
            }
            Err(e) => {
                manifest.metadata.finalizers = before;
                Err(fail(manifest, e))
            }
        }
    }

    /// Patch status only when state or last-operation text moved relative to
    /// `previous`. Returns whether a patch landed; the copy's
    /// resourceVersion follows the patched object.
    pub async fn update_status(&self, manifest: &mut Manifest, previous: &ManifestStatus) -> LifecycleResult<bool> {
        if !manifest.status.differs_from(previous) {
            counter!("manifest_status_patch_skipped_total", 1u64);
            return Ok(false);
        }
        manifest.strip_non_patchable();
        let mut body = manifest.descriptor().to_object();
        let status = serde_json::to_value(&manifest.status)
            .map_err(|source| tether_core::CodecError::Encode { kind: "ManifestStatus", source })?;
        body.data = serde_json::json!({ "status": status });
        counter!("manifest_status_patch_total", 1u64);
        match self.store.patch_status(&body, &self.config.field_owner).await {
            Ok(patched) => {
                debug!(manifest = %manifest.key(), state = %manifest.status.state, "status patched");
                manifest.metadata.resource_version = patched.metadata.resource_version;
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(manifest = %manifest.key(), "manifest gone; status patch skipped");
                Ok(false)
            }
            Err(source) => Err(LifecycleError::PatchStatus { key: manifest.key(), source }),
        }
    }
}
