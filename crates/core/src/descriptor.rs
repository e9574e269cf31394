//! Identity of opaquely-schemaed objects.

use std::fmt;

use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Group/version/kind plus name/namespace of an object whose schema is not
/// known at build time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ResourceDescriptor {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(group: &str, version: &str, kind: &str, name: &str, namespace: Option<&str>) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string()),
        }
    }

    /// Derive the descriptor from an object's type meta and metadata.
    pub fn from_object(obj: &DynamicObject) -> Result<Self, StoreError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| StoreError::Invalid("object missing apiVersion/kind".into()))?;
        let (group, version) = split_api_version(&types.api_version);
        if version.is_empty() || types.kind.is_empty() {
            return Err(StoreError::Invalid(format!(
                "object has incomplete type meta: apiVersion={:?} kind={:?}",
                types.api_version, types.kind
            )));
        }
        let name = obj
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StoreError::Invalid(format!("{} object missing metadata.name", types.kind)))?;
        Ok(Self::new(&group, &version, &types.kind, name, obj.metadata.namespace.as_deref()))
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// Stable key for caches, e.g. `v1/ConfigMap` or `apps/v1/Deployment`.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta { api_version: self.api_version(), kind: self.kind.clone() }
    }

    /// An empty object addressed by this descriptor, suitable as a store key.
    pub fn to_object(&self) -> DynamicObject {
        let mut obj = DynamicObject {
            types: Some(self.type_meta()),
            metadata: Default::default(),
            data: serde_json::Value::Object(Default::default()),
        };
        obj.metadata.name = Some(self.name.clone());
        obj.metadata.namespace = self.namespace.clone();
        obj
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvk_key(), ns, self.name),
            None => write!(f, "{} {}", self.gvk_key(), self.name),
        }
    }
}

/// Namespace/name of an object within a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.filter(|ns| !ns.is_empty()).map(|s| s.to_string()), name: name.to_string() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Split `group/version` (or bare core `version`) into its parts.
pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_object_reads_group_and_core_kinds() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "g/v1",
            "kind": "K",
            "metadata": { "name": "n", "namespace": "ns" }
        }))
        .unwrap();
        let d = ResourceDescriptor::from_object(&obj).unwrap();
        assert_eq!(d, ResourceDescriptor::new("g", "v1", "K", "n", Some("ns")));
        assert_eq!(d.gvk_key(), "g/v1/K");

        let cm: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "c" }
        }))
        .unwrap();
        let d = ResourceDescriptor::from_object(&cm).unwrap();
        assert_eq!(d.group, "");
        assert_eq!(d.api_version(), "v1");
        assert_eq!(d.namespace, None);
    }

    #[test]
    fn from_object_rejects_missing_identity() {
        let no_types = DynamicObject {
            types: None,
            metadata: Default::default(),
            data: serde_json::Value::Null,
        };
        assert!(matches!(ResourceDescriptor::from_object(&no_types), Err(StoreError::Invalid(_))));

        let no_name: DynamicObject =
            serde_json::from_value(serde_json::json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": {} })).unwrap();
        let err = ResourceDescriptor::from_object(&no_name).unwrap_err().to_string();
        assert!(err.contains("missing metadata.name"), "err={}", err);
    }

    #[test]
    fn empty_namespace_means_cluster_scoped() {
        let d = ResourceDescriptor::new("", "v1", "Namespace", "kube-system", Some(""));
        assert_eq!(d.namespace, None);
        assert_eq!(d.to_string(), "v1/Namespace kube-system");
    }
}
