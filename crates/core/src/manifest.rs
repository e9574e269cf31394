//! The control-plane manifest entity.

use std::fmt;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::{DynamicObject, TypeMeta};
use serde::{Deserialize, Serialize};

use crate::descriptor::{ObjectKey, ResourceDescriptor};
use crate::error::CodecError;

pub const MANIFEST_GROUP: &str = "operator.tether.dev";
pub const MANIFEST_VERSION: &str = "v1alpha1";
pub const MANIFEST_KIND: &str = "Manifest";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Processing,
    Ready,
    Warning,
    Deleting,
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Processing => "Processing",
            State::Ready => "Ready",
            State::Warning => "Warning",
            State::Deleting => "Deleting",
            State::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(default)]
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<Time>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStatus {
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub last_operation: LastOperation,
    /// Resources applied to the target environment by a previous sync.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synced: Vec<ResourceDescriptor>,
}

impl ManifestStatus {
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.last_operation = LastOperation { operation: operation.into(), last_update_time: Some(Time(Utc::now())) };
        self
    }

    /// Error state carrying the failure text as last operation.
    pub fn with_err(self, err: &dyn std::error::Error) -> Self {
        self.with_state(State::Error).with_operation(err.to_string())
    }

    /// Whether a status patch is warranted against `previous`.
    pub fn differs_from(&self, previous: &ManifestStatus) -> bool {
        self.state != previous.state || self.last_operation.operation != previous.last_operation.operation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ManifestSpec {
    /// Descriptor of the companion instance; `None` disables the companion lifecycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<DynamicObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(flatten)]
    pub types: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ManifestSpec,
    #[serde(default)]
    pub status: ManifestStatus,
}

impl Manifest {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            types: Self::type_meta(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()).filter(|ns| !ns.is_empty()),
                ..Default::default()
            },
            spec: ManifestSpec::default(),
            status: ManifestStatus::default(),
        }
    }

    pub fn with_resource(mut self, resource: DynamicObject) -> Self {
        self.spec.resource = Some(resource);
        self
    }

    pub fn type_meta() -> TypeMeta {
        TypeMeta { api_version: format!("{}/{}", MANIFEST_GROUP, MANIFEST_VERSION), kind: MANIFEST_KIND.to_string() }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.as_deref(), self.metadata.name.as_deref().unwrap_or_default())
    }

    /// Descriptor addressing this manifest in the control-plane store.
    pub fn descriptor(&self) -> ResourceDescriptor {
        Self::descriptor_for(&self.key())
    }

    pub fn descriptor_for(key: &ObjectKey) -> ResourceDescriptor {
        ResourceDescriptor::new(MANIFEST_GROUP, MANIFEST_VERSION, MANIFEST_KIND, &key.name, key.namespace.as_deref())
    }

    pub fn is_deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn set_status(&mut self, status: ManifestStatus) {
        self.status = status;
    }

    pub fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or_default()
    }

    /// Clear identity fields the store refuses in an apply patch.
    pub fn strip_non_patchable(&mut self) {
        self.metadata.uid = None;
        self.metadata.managed_fields = None;
        self.metadata.resource_version = None;
    }

    pub fn from_dynamic(obj: DynamicObject) -> Result<Self, CodecError> {
        let value = serde_json::to_value(obj).map_err(|source| CodecError::Encode { kind: MANIFEST_KIND, source })?;
        serde_json::from_value(value).map_err(|source| CodecError::Decode { kind: MANIFEST_KIND, source })
    }

    pub fn to_dynamic(&self) -> Result<DynamicObject, CodecError> {
        let value = serde_json::to_value(self).map_err(|source| CodecError::Encode { kind: MANIFEST_KIND, source })?;
        serde_json::from_value(value).map_err(|source| CodecError::Decode { kind: MANIFEST_KIND, source })
    }

    /// Minimal apply body carrying only identity and finalizers, so the
    /// applying field manager claims nothing else.
    pub fn finalizer_patch(&self) -> DynamicObject {
        let mut obj = self.descriptor().to_object();
        obj.metadata.finalizers = Some(self.finalizers().to_vec());
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        let resource: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "g/v1",
            "kind": "K",
            "metadata": { "name": "n", "namespace": "ns" },
            "spec": { "replicas": 1 }
        }))
        .unwrap();
        let mut m = Manifest::new("kcp-system", "module-a").with_resource(resource);
        m.metadata.finalizers = Some(vec!["f1".into()]);
        m.status.synced.push(ResourceDescriptor::new("", "v1", "ConfigMap", "cm", Some("ns")));
        m
    }

    #[test]
    fn dynamic_conversion_preserves_spec_and_status() {
        let m = sample();
        let dynamic = m.to_dynamic().unwrap();
        assert_eq!(dynamic.types.as_ref().unwrap().kind, MANIFEST_KIND);
        assert!(dynamic.data.get("spec").and_then(|s| s.get("resource")).is_some());
        let back = Manifest::from_dynamic(dynamic).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn status_diff_ignores_timestamps_and_synced() {
        let base = ManifestStatus::default().with_state(State::Ready).with_operation("installed");
        let mut same = base.clone();
        same.last_operation.last_update_time = None;
        same.synced.push(ResourceDescriptor::new("", "v1", "ConfigMap", "x", None));
        assert!(!same.differs_from(&base));
        assert!(base.clone().with_state(State::Error).differs_from(&base));
        assert!(base.clone().with_operation("other").differs_from(&base));
    }

    #[test]
    fn strip_non_patchable_clears_identity_tokens() {
        let mut m = sample();
        m.metadata.uid = Some("u".into());
        m.metadata.resource_version = Some("7".into());
        m.metadata.managed_fields = Some(vec![Default::default()]);
        m.strip_non_patchable();
        assert!(m.metadata.uid.is_none());
        assert!(m.metadata.resource_version.is_none());
        assert!(m.metadata.managed_fields.is_none());
        assert_eq!(m.metadata.name.as_deref(), Some("module-a"));
    }

    #[test]
    fn finalizer_patch_carries_only_identity_and_finalizers() {
        let m = sample();
        let p = m.finalizer_patch();
        assert_eq!(p.metadata.finalizers, Some(vec!["f1".to_string()]));
        assert_eq!(p.metadata.namespace.as_deref(), Some("kcp-system"));
        assert_eq!(p.data, serde_json::json!({}));
    }
}
