#![allow(dead_code)]

use std::sync::Arc;

use kube::core::DynamicObject;
use tether_core::{LifecycleConfig, Manifest, ResourceDescriptor};
use tether_lifecycle::ManifestLifecycle;
use tether_store::MemoryStore;

pub struct Harness {
    pub control: Arc<MemoryStore>,
    pub target: Arc<MemoryStore>,
    pub lifecycle: ManifestLifecycle,
    pub config: LifecycleConfig,
}

pub fn harness() -> Harness {
    let control = Arc::new(MemoryStore::new());
    let target = Arc::new(MemoryStore::new());
    let config = LifecycleConfig::default();
    let lifecycle = ManifestLifecycle::new(control.clone(), target.clone(), config.clone());
    Harness { control, target, lifecycle, config }
}

pub fn companion_descriptor() -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "g/v1",
        "kind": "K",
        "metadata": { "name": "n", "namespace": "ns" },
        "spec": { "channel": "regular" }
    }))
    .unwrap()
}

pub fn companion_key() -> ResourceDescriptor {
    ResourceDescriptor::new("g", "v1", "K", "n", Some("ns"))
}

pub fn config_map(name: &str, labels: &[(&str, &str)]) -> DynamicObject {
    let labels: serde_json::Map<String, serde_json::Value> =
        labels.iter().map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string()))).collect();
    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": "ns", "labels": labels },
        "data": { "k": "v" }
    }))
    .unwrap()
}

pub fn config_map_key(name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new("", "v1", "ConfigMap", name, Some("ns"))
}

pub fn manifest(with_companion: bool, finalizers: &[&str]) -> Manifest {
    let mut m = Manifest::new("kcp-system", "module-a");
    if with_companion {
        m = m.with_resource(companion_descriptor());
    }
    m.metadata.finalizers = Some(finalizers.iter().map(|s| s.to_string()).collect());
    m
}

impl Harness {
    /// Store `m` in the control plane and return the stored copy.
    pub async fn seed(&self, m: Manifest) -> Manifest {
        let stored = self.control.insert(m.to_dynamic().unwrap()).await.unwrap();
        Manifest::from_dynamic(stored).unwrap()
    }

    pub async fn fresh(&self, m: &Manifest) -> Option<Manifest> {
        self.control.object(&m.descriptor()).await.map(|o| Manifest::from_dynamic(o).unwrap())
    }

    /// Request deletion of the stored manifest and return the fresh copy.
    pub async fn request_deletion(&self, m: &Manifest) -> Manifest {
        use tether_store::{Propagation, ResourceStore};
        self.control.delete(&m.descriptor(), Propagation::Background).await.unwrap();
        self.fresh(m).await.expect("finalized manifest must survive deletion request")
    }

    pub fn mandatory(&self) -> Vec<&str> {
        self.config.mandatory_finalizers().to_vec()
    }
}
