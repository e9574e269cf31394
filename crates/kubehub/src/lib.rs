//! Tether kubehub – `ResourceStore` over a live API server.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    config::KubeConfigOptions,
    core::{ApiResource, DynamicObject},
    discovery::{self, Scope},
    Client, Config,
};
use metrics::histogram;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use tether_core::{ResourceDescriptor, StoreError};
use tether_store::{Propagation, ResourceStore, StoreOp, StoreResult};

const DEFAULT_DEADLINE_MS: u64 = 10_000;

/// Per-call deadline from `TETHER_STORE_DEADLINE_MS`.
pub fn deadline_from_env() -> Duration {
    let ms = std::env::var("TETHER_STORE_DEADLINE_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_DEADLINE_MS);
    Duration::from_millis(ms)
}

/// Build a client for a kubeconfig context (current context when `None`).
pub async fn get_kube_client(context: Option<&str>) -> Result<Client> {
    let client = match context {
        Some(ctx) => {
            let opts = KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
            let config = Config::from_kubeconfig(&opts)
                .await
                .with_context(|| format!("loading kubeconfig context {}", ctx))?;
            Client::try_from(config).context("building kube client")?
        }
        None => Client::try_default().await.context("building kube client from default config")?,
    };
    Ok(client)
}

/// `ResourceStore` backed by a kube-rs client.
///
/// API resources are discovered once per kind and cached. Every round trip
/// runs under the store deadline; expiry is reported as `Transient`.
pub struct KubeStore {
    client: Client,
    label: String,
    deadline: Duration,
    resources: RwLock<FxHashMap<String, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client, label: &str, deadline: Duration) -> Self {
        info!(store = %label, deadline_ms = deadline.as_millis() as u64, "kube store ready");
        Self { client, label: label.to_string(), deadline, resources: RwLock::new(FxHashMap::default()) }
    }

    async fn find_api_resource(&self, target: &ResourceDescriptor) -> StoreResult<(ApiResource, bool)> {
        let key = target.gvk_key();
        if let Some(hit) = self.resources.read().await.get(&key) {
            return Ok(hit.clone());
        }
        let gvk = target.gvk();
        let found = tokio::time::timeout(self.deadline, discovery::pinned_kind(&self.client, &gvk))
            .await
            .map_err(|_| StoreError::Transient(format!("discovery of {} exceeded deadline", key)))?;
        let (ar, caps) = match found {
            Ok(v) => v,
            Err(kube::Error::Discovery(e)) => {
                return Err(StoreError::Rejected { code: 404, message: format!("kind {} not served: {}", key, e) })
            }
            Err(e) => return Err(map_kube_error(e)),
        };
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        debug!(store = %self.label, gvk = %key, plural = %ar.plural, namespaced, "api resource discovered");
        self.resources.write().await.insert(key, (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn api(&self, target: &ResourceDescriptor) -> StoreResult<Api<DynamicObject>> {
        let (ar, namespaced) = self.find_api_resource(target).await?;
        if !namespaced {
            return Ok(Api::all_with(self.client.clone(), &ar));
        }
        match target.namespace.as_deref() {
            Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
            None => Err(StoreError::Invalid(format!("namespace required for namespaced kind {}", target.gvk_key()))),
        }
    }

    async fn run<T, F>(&self, op: StoreOp, target: &ResourceDescriptor, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        debug!(store = %self.label, op = ?op, target = %target, "store call");
        within(self.deadline, op, fut).await
    }
}

/// Await `fut` under `deadline`, recording latency and mapping kube errors.
pub async fn within<T, F>(deadline: Duration, op: StoreOp, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    let t0 = Instant::now();
    let res = tokio::time::timeout(deadline, fut).await;
    histogram!("store_call_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(map_kube_error(e)),
        Err(_) => Err(StoreError::Transient(format!("{:?} exceeded deadline of {:?}", op, deadline))),
    }
}

/// Map kube-rs errors onto the store taxonomy.
pub fn map_kube_error(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) => match ae.code {
            404 => StoreError::NotFound(ae.message),
            409 if ae.reason == "AlreadyExists" => StoreError::AlreadyExists(ae.message),
            409 => StoreError::Conflict(ae.message),
            429 | 500..=599 => StoreError::Transient(format!("{} ({})", ae.message, ae.code)),
            code => StoreError::Rejected { code, message: ae.message },
        },
        kube::Error::SerdeError(e) => StoreError::Invalid(e.to_string()),
        other => StoreError::Transient(other.to_string()),
    }
}

fn object_name(obj: &DynamicObject) -> StoreResult<ResourceDescriptor> {
    ResourceDescriptor::from_object(obj)
}

/// Apply bodies must not carry managed fields.
fn apply_body(obj: &DynamicObject) -> DynamicObject {
    let mut body = obj.clone();
    body.metadata.managed_fields = None;
    body.metadata.resource_version = None;
    body.metadata.uid = None;
    body
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, target: &ResourceDescriptor) -> StoreResult<DynamicObject> {
        let api = self.api(target).await?;
        self.run(StoreOp::Get, target, api.get(&target.name)).await
    }

    async fn create(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject> {
        let target = object_name(obj)?;
        let api = self.api(&target).await?;
        let pp = PostParams { field_manager: Some(field_owner.to_string()), ..Default::default() };
        self.run(StoreOp::Create, &target, api.create(&pp, obj)).await
    }

    async fn update(&self, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let target = object_name(obj)?;
        let api = self.api(&target).await?;
        self.run(StoreOp::Update, &target, api.replace(&target.name, &PostParams::default(), obj)).await
    }

    async fn delete(&self, target: &ResourceDescriptor, propagation: Propagation) -> StoreResult<()> {
        let api = self.api(target).await?;
        let dp = match propagation {
            Propagation::Background => DeleteParams::background(),
            Propagation::Foreground => DeleteParams::foreground(),
            Propagation::Orphan => DeleteParams::orphan(),
        };
        self.run(StoreOp::Delete, target, api.delete(&target.name, &dp)).await.map(|_| ())
    }

    async fn patch_apply(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject> {
        let target = object_name(obj)?;
        let api = self.api(&target).await?;
        let pp = PatchParams::apply(field_owner).force();
        let body = apply_body(obj);
        self.run(StoreOp::PatchApply, &target, api.patch(&target.name, &pp, &Patch::Apply(&body))).await
    }

    async fn patch_status(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject> {
        let target = object_name(obj)?;
        let api = self.api(&target).await?;
        let pp = PatchParams::apply(field_owner).force();
        let body = apply_body(obj);
        self.run(StoreOp::PatchStatus, &target, api.patch_status(&target.name, &pp, &Patch::Apply(&body))).await
    }
}
