//! Companion lifecycle orchestration for a single manifest.
//!
//! Each operation is one resumable step: it reads and writes through the two
//! stores, keeps the manifest's in-memory status in sync with what happened,
//! and never retries on its own. The driver calls it again on error or
//! `Completion::Pending`.

use std::sync::Arc;

use tracing::{debug, info};

use tether_companion::{CompanionClient, CompanionOps};
use tether_core::{finalizer, Completion, LifecycleConfig, Manifest, ManifestStatus, State};
use tether_store::ResourceStore;

use crate::error::{LifecycleError, LifecycleResult};
use crate::label_removal::{LabelRemovalService, SweepReport};
use crate::manifest_client::{fail, ManifestClient};
use crate::phase::CompanionPhase;

pub const WAITING_FOR_COMPANION_DELETION: &str = "waiting for companion instance to be deleted";

pub struct ManifestLifecycle {
    manifests: Arc<ManifestClient>,
    target: Arc<dyn ResourceStore>,
    companion: Arc<dyn CompanionOps>,
    labels: LabelRemovalService,
    config: Arc<LifecycleConfig>,
}

impl ManifestLifecycle {
    /// Wire the lifecycle over a control-plane and a target-environment store.
    pub fn new(control_plane: Arc<dyn ResourceStore>, target: Arc<dyn ResourceStore>, config: LifecycleConfig) -> Self {
        let config = Arc::new(config);
        let companion: Arc<dyn CompanionOps> = Arc::new(CompanionClient::new(target.clone(), config.clone()));
        Self::with_companion(control_plane, target, companion, config)
    }

    pub fn with_companion(
        control_plane: Arc<dyn ResourceStore>,
        target: Arc<dyn ResourceStore>,
        companion: Arc<dyn CompanionOps>,
        config: Arc<LifecycleConfig>,
    ) -> Self {
        let manifests = Arc::new(ManifestClient::new(control_plane, config.clone()));
        let labels = LabelRemovalService::new(manifests.clone(), config.clone());
        Self { manifests, target, companion, labels, config }
    }

    pub fn manifests(&self) -> &ManifestClient {
        &self.manifests
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Create the companion instance, then protect it with the companion
    /// finalizer. The finalizer is only added after creation is confirmed.
    pub async fn create_companion(&self, manifest: &mut Manifest) -> LifecycleResult<()> {
        let Some(resource) = manifest.spec.resource.clone() else {
            return Ok(());
        };
        if manifest.is_deletion_requested() {
            debug!(manifest = %manifest.key(), "deletion requested; companion not created");
            return Ok(());
        }
        if let Err(e) = self.companion.create(&resource).await {
            return Err(fail(manifest, e.into()));
        }

        let mut meta = manifest.metadata.clone();
        if !finalizer::add_finalizers(&mut meta, &[self.config.companion_finalizer.as_str()]) {
            return Ok(());
        }
        let finalizers = meta.finalizers.unwrap_or_default();
        match self.manifests.apply_finalizers(manifest, finalizers, &self.config.companion_finalizer).await {
            Ok(()) => {
                info!(manifest = %manifest.key(), "companion finalizer added");
                Ok(())
            }
            Err(e) => Err(fail(manifest, e)),
        }
    }

    /// Delete the companion instance and release the companion finalizer.
    ///
    /// `Pending` while the instance still exists, and once more right after
    /// the finalizer was removed; `Done` when there is nothing left to do.
    pub async fn delete_companion(&self, manifest: &mut Manifest) -> LifecycleResult<Completion> {
        let Some(resource) = manifest.spec.resource.clone() else {
            return Ok(Completion::Done);
        };
        let present = match self.companion.exists(&resource).await {
            Ok(present) => present,
            Err(e) => return Err(fail(manifest, e.into())),
        };
        let deleted = if present {
            match self.companion.delete(&resource).await {
                Ok(deleted) => deleted,
                Err(e) => return Err(fail(manifest, e.into())),
            }
        } else {
            true
        };
        if !deleted {
            debug!(manifest = %manifest.key(), "companion instance still present");
            let status = manifest.status.clone().with_state(State::Error).with_operation(WAITING_FOR_COMPANION_DELETION);
            manifest.set_status(status);
            return Ok(Completion::Pending);
        }

        match self.remove_companion_finalizer(manifest).await {
            Ok(true) => Ok(Completion::Pending),
            Ok(false) => Ok(Completion::Done),
            Err(e) => Err(fail(manifest, e)),
        }
    }

    /// Remove the companion finalizer from a fresh copy of the manifest.
    /// Returns whether it was actually removed.
    async fn remove_companion_finalizer(&self, manifest: &mut Manifest) -> LifecycleResult<bool> {
        let key = manifest.key();
        let Some(mut current) = self.manifests.get(&key).await? else {
            debug!(manifest = %key, "manifest already gone");
            return Ok(false);
        };
        let marker = self.config.companion_finalizer.as_str();
        if !finalizer::remove_finalizers(&mut current.metadata, &[marker]) {
            return Ok(false);
        }
        match self.manifests.update(&mut current).await {
            Ok(()) => {
                info!(manifest = %key, "companion finalizer removed");
                manifest.metadata.finalizers = current.metadata.finalizers;
                manifest.metadata.resource_version = current.metadata.resource_version;
                Ok(true)
            }
            Err(LifecycleError::UpdateManifest { source, .. }) if source.is_not_found() => {
                debug!(manifest = %key, "manifest gone before finalizer removal");
                Ok(false)
            }
            Err(LifecycleError::UpdateManifest { key, source }) => {
                Err(LifecycleError::RemoveFinalizers { key, finalizers: vec![marker.to_string()], source })
            }
            Err(e) => Err(e),
        }
    }

    /// Strip the ownership label from synced resources and the companion
    /// instance, then release the label-removal finalizer.
    pub async fn remove_managed_label(&self, manifest: &mut Manifest) -> LifecycleResult<SweepReport> {
        self.labels.remove_managed_label(manifest, self.target.as_ref()).await
    }

    /// Patch status when state or last-operation text changed against `previous`.
    pub async fn update_status(&self, manifest: &mut Manifest, previous: &ManifestStatus) -> LifecycleResult<bool> {
        self.manifests.update_status(manifest, previous).await
    }

    /// Classify the manifest from both stores without writing anything.
    pub async fn observe(&self, manifest: &Manifest) -> LifecycleResult<CompanionPhase> {
        let Some(resource) = &manifest.spec.resource else {
            return Ok(CompanionPhase::NoCompanion);
        };
        let live = self.companion.get(resource).await?;
        let held = finalizer::has_finalizer(&manifest.metadata, &self.config.companion_finalizer);
        let companion = live.map(|obj| obj.metadata.deletion_timestamp.is_some());
        Ok(CompanionPhase::classify(manifest.is_deletion_requested(), companion, held))
    }
}
