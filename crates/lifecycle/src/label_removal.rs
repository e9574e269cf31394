//! Best-effort sweep of the ownership label, gated by the label-removal finalizer.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use tether_core::{finalizer, labels, LifecycleConfig, Manifest, ResourceDescriptor};
use tether_store::ResourceStore;

use crate::error::{LabelSweepError, LifecycleError, LifecycleResult, ResourceFailure};
use crate::manifest_client::{fail, ManifestClient};

/// Outcome of a sweep that touched every target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Objects whose label was stripped and persisted.
    pub updated: usize,
    /// Objects already free of the label.
    pub untouched: usize,
    /// Objects no longer present.
    pub missing: usize,
}

pub struct LabelRemovalService {
    manifests: Arc<ManifestClient>,
    config: Arc<LifecycleConfig>,
}

impl LabelRemovalService {
    pub fn new(manifests: Arc<ManifestClient>, config: Arc<LifecycleConfig>) -> Self {
        Self { manifests, config }
    }

    /// Strip the ownership label from every synced resource and the
    /// companion instance, then drop the label-removal finalizer.
    ///
    /// Per-resource failures never stop the sweep; they are joined into one
    /// error and the finalizer stays in place. A manifest without a companion
    /// descriptor is left untouched.
    pub async fn remove_managed_label(
        &self,
        manifest: &mut Manifest,
        target: &dyn ResourceStore,
    ) -> LifecycleResult<SweepReport> {
        if manifest.spec.resource.is_none() {
            debug!(manifest = %manifest.key(), "no companion descriptor; label sweep skipped");
            return Ok(SweepReport::default());
        }
        let report = match self.sweep(manifest, target).await {
            Ok(report) => report,
            Err(e) => {
                counter!("label_removal_failures_total", e.failures.len() as u64);
                return Err(fail(manifest, e.into()));
            }
        };
        info!(
            manifest = %manifest.key(),
            updated = report.updated,
            untouched = report.untouched,
            missing = report.missing,
            "ownership label sweep complete"
        );

        let marker = self.config.label_removal_finalizer.as_str();
        let before = manifest.metadata.finalizers.clone();
        if !finalizer::remove_finalizers(&mut manifest.metadata, &[marker]) {
            return Ok(report);
        }
        match self.manifests.update(manifest).await {
            Ok(()) => Ok(report),
            Err(LifecycleError::UpdateManifest { source, .. }) if source.is_not_found() => {
                debug!(manifest = %manifest.key(), "manifest already gone");
                Ok(report)
            }
            Err(LifecycleError::UpdateManifest { key, source }) => {
                manifest.metadata.finalizers = before;
                Err(fail(manifest, LifecycleError::RemoveFinalizers { key, finalizers: vec![marker.to_string()], source }))
            }
            Err(e) => {
                manifest.metadata.finalizers = before;
                Err(fail(manifest, e))
            }
        }
    }

    /// Synced resources plus the companion descriptor, deduplicated.
    fn targets(&self, manifest: &Manifest, failures: &mut Vec<ResourceFailure>) -> Vec<ResourceDescriptor> {
        let mut targets: Vec<ResourceDescriptor> = Vec::with_capacity(manifest.status.synced.len() + 1);
        for res in &manifest.status.synced {
            if !targets.contains(res) {
                targets.push(res.clone());
            }
        }
        if let Some(resource) = &manifest.spec.resource {
            match ResourceDescriptor::from_object(resource) {
                Ok(d) if !targets.contains(&d) => targets.push(d),
                Ok(_) => {}
                Err(source) => failures.push(ResourceFailure {
                    target: ResourceDescriptor::default(),
                    stage: "resolve companion descriptor",
                    source,
                }),
            }
        }
        targets
    }

    pub async fn sweep(&self, manifest: &Manifest, target: &dyn ResourceStore) -> Result<SweepReport, LabelSweepError> {
        let key = self.config.managed_by_label.as_str();
        let mut failures = Vec::new();
        let mut report = SweepReport::default();
        for res in self.targets(manifest, &mut failures) {
            let mut obj = match target.get(&res).await {
                Ok(obj) => obj,
                Err(e) if e.is_not_found() => {
                    debug!(target = %res, "resource gone; nothing to unlabel");
                    report.missing += 1;
                    continue;
                }
                Err(source) => {
                    warn!(target = %res, error = %source, "failed to fetch resource for label removal");
                    failures.push(ResourceFailure { target: res, stage: "get", source });
                    continue;
                }
            };
            if !labels::remove_label(&mut obj.metadata, key) {
                report.untouched += 1;
                continue;
            }
            match target.update(&obj).await {
                Ok(_) => report.updated += 1,
                Err(e) if e.is_not_found() => report.missing += 1,
                Err(source) => {
                    warn!(target = %res, error = %source, "failed to update resource for label removal");
                    failures.push(ResourceFailure { target: res, stage: "update", source });
                }
            }
        }
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(LabelSweepError { label: key.to_string(), failures })
        }
    }
}
