//! In-RAM `ResourceStore` with the semantics of an API server that matter to
//! lifecycle logic: optimistic concurrency, finalizer-gated deletion, apply
//! upserts and a separate status subresource.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, Time};
use kube::core::DynamicObject;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use tether_core::{ResourceDescriptor, StoreError};

use crate::{Propagation, ResourceStore, StoreOp, StoreResult};

/// One journaled store round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub target: ResourceDescriptor,
    pub field_owner: Option<String>,
    pub propagation: Option<Propagation>,
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    name: Option<String>,
    error: StoreError,
    remaining: Option<usize>,
}

#[derive(Default)]
struct Inner {
    objects: FxHashMap<ResourceDescriptor, DynamicObject>,
    rv: u64,
    calls: Vec<StoreCall>,
    faults: Vec<Fault>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without journaling; server fields are assigned as on create.
    pub async fn insert(&self, obj: DynamicObject) -> StoreResult<DynamicObject> {
        let target = ResourceDescriptor::from_object(&obj)?;
        let mut inner = self.inner.lock().await;
        let stored = inner.admit(obj, "seed", "Update");
        inner.objects.insert(target, stored.clone());
        Ok(stored)
    }

    /// Current object, bypassing journal and faults.
    pub async fn object(&self, target: &ResourceDescriptor) -> Option<DynamicObject> {
        self.inner.lock().await.objects.get(target).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.objects.len()
    }

    /// Fail every `op` against objects named `name` (any name when `None`).
    pub async fn fail_on(&self, op: StoreOp, name: Option<&str>, error: StoreError) {
        self.push_fault(op, name, error, None).await;
    }

    /// Fail only the next matching `op`.
    pub async fn fail_once(&self, op: StoreOp, name: Option<&str>, error: StoreError) {
        self.push_fault(op, name, error, Some(1)).await;
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn count(&self, op: StoreOp) -> usize {
        self.inner.lock().await.calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of journaled mutating calls.
    pub async fn writes(&self) -> usize {
        self.inner.lock().await.calls.iter().filter(|c| c.op != StoreOp::Get).count()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    async fn push_fault(&self, op: StoreOp, name: Option<&str>, error: StoreError, remaining: Option<usize>) {
        self.inner.lock().await.faults.push(Fault { op, name: name.map(|s| s.to_string()), error, remaining });
    }
}

impl Inner {
    fn enter(&mut self, call: StoreCall) -> StoreResult<()> {
        debug!(op = ?call.op, target = %call.target, "memory store call");
        let op = call.op;
        let name = call.target.name.clone();
        self.calls.push(call);
        let hit = self
            .faults
            .iter()
            .position(|f| f.op == op && f.name.as_deref().map(|n| n == name).unwrap_or(true));
        let Some(idx) = hit else { return Ok(()) };
        let error = self.faults[idx].error.clone();
        if let Some(left) = self.faults[idx].remaining.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.faults.remove(idx);
            }
        }
        Err(error)
    }

    fn next_rv(&mut self) -> String {
        self.rv += 1;
        self.rv.to_string()
    }

    /// Assign server-owned fields to a freshly stored object.
    fn admit(&mut self, mut obj: DynamicObject, manager: &str, operation: &str) -> DynamicObject {
        obj.metadata.uid = Some(Uuid::new_v4().to_string());
        obj.metadata.resource_version = Some(self.next_rv());
        obj.metadata.creation_timestamp = Some(Time(Utc::now()));
        obj.metadata.deletion_timestamp = None;
        obj.metadata.managed_fields = None;
        record_manager(&mut obj, manager, operation);
        obj
    }

    /// Persist `obj`, or drop it once a requested deletion has no finalizers left.
    fn commit(&mut self, target: ResourceDescriptor, obj: DynamicObject) -> DynamicObject {
        let finalized = obj.metadata.finalizers.as_ref().map(|f| !f.is_empty()).unwrap_or(false);
        if obj.metadata.deletion_timestamp.is_some() && !finalized {
            debug!(target = %target, "finalizers cleared; removing object");
            self.objects.remove(&target);
        } else {
            self.objects.insert(target, obj.clone());
        }
        obj
    }

    fn existing(&self, target: &ResourceDescriptor) -> StoreResult<DynamicObject> {
        self.objects.get(target).cloned().ok_or_else(|| StoreError::NotFound(target.to_string()))
    }
}

fn call(op: StoreOp, target: &ResourceDescriptor) -> StoreCall {
    StoreCall { op, target: target.clone(), field_owner: None, propagation: None }
}

fn record_manager(obj: &mut DynamicObject, manager: &str, operation: &str) {
    let api_version = obj.types.as_ref().map(|t| t.api_version.clone());
    let entries = obj.metadata.managed_fields.get_or_insert_with(Vec::new);
    let known = entries
        .iter()
        .any(|e| e.manager.as_deref() == Some(manager) && e.operation.as_deref() == Some(operation));
    if !known {
        entries.push(ManagedFieldsEntry {
            manager: Some(manager.to_string()),
            operation: Some(operation.to_string()),
            api_version,
            time: Some(Time(Utc::now())),
            ..Default::default()
        });
    }
}

fn to_json(obj: &DynamicObject) -> StoreResult<Json> {
    serde_json::to_value(obj).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn from_json(v: Json) -> StoreResult<DynamicObject> {
    serde_json::from_value(v).map_err(|e| StoreError::Invalid(e.to_string()))
}

/// Recursive merge: objects merge key by key, `null` deletes, anything else replaces.
fn merge(base: &mut Json, patch: Json) {
    match (base, patch) {
        (Json::Object(b), Json::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    b.remove(&k);
                } else {
                    merge(b.entry(k).or_insert(Json::Null), v);
                }
            }
        }
        (b, p) => *b = p,
    }
}

/// Fields an apply body may not set.
fn strip_server_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for key in ["uid", "resourceVersion", "managedFields", "creationTimestamp", "deletionTimestamp"] {
            meta.remove(key);
        }
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, target: &ResourceDescriptor) -> StoreResult<DynamicObject> {
        let mut inner = self.inner.lock().await;
        inner.enter(call(StoreOp::Get, target))?;
        inner.existing(target)
    }

    async fn create(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject> {
        let target = ResourceDescriptor::from_object(obj)?;
        let mut inner = self.inner.lock().await;
        inner.enter(StoreCall { field_owner: Some(field_owner.to_string()), ..call(StoreOp::Create, &target) })?;
        if inner.objects.contains_key(&target) {
            return Err(StoreError::AlreadyExists(target.to_string()));
        }
        let stored = inner.admit(obj.clone(), field_owner, "Update");
        Ok(inner.commit(target, stored))
    }

    async fn update(&self, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let target = ResourceDescriptor::from_object(obj)?;
        let mut inner = self.inner.lock().await;
        inner.enter(call(StoreOp::Update, &target))?;
        let current = inner.existing(&target)?;
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if current.metadata.resource_version.as_deref() != Some(rv) {
                return Err(StoreError::Conflict(format!(
                    "{}: resourceVersion {} is stale (current {})",
                    target,
                    rv,
                    current.metadata.resource_version.as_deref().unwrap_or("-")
                )));
            }
        }
        let mut next = obj.clone();
        next.metadata.uid = current.metadata.uid.clone();
        next.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        next.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        next.metadata.managed_fields = current.metadata.managed_fields.clone();
        next.metadata.resource_version = Some(inner.next_rv());
        // status is only writable through the status subresource
        if let Some(data) = next.data.as_object_mut() {
            data.remove("status");
            if let Some(status) = current.data.get("status") {
                data.insert("status".into(), status.clone());
            }
        }
        Ok(inner.commit(target, next))
    }

    async fn delete(&self, target: &ResourceDescriptor, propagation: Propagation) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.enter(StoreCall { propagation: Some(propagation), ..call(StoreOp::Delete, target) })?;
        let mut current = inner.existing(target)?;
        if current.metadata.deletion_timestamp.is_none() {
            current.metadata.deletion_timestamp = Some(Time(Utc::now()));
            current.metadata.resource_version = Some(inner.next_rv());
        }
        inner.commit(target.clone(), current);
        Ok(())
    }

    async fn patch_apply(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject> {
        let target = ResourceDescriptor::from_object(obj)?;
        let mut inner = self.inner.lock().await;
        inner.enter(StoreCall { field_owner: Some(field_owner.to_string()), ..call(StoreOp::PatchApply, &target) })?;
        let mut patch = to_json(obj)?;
        strip_server_fields(&mut patch);
        if let Some(p) = patch.as_object_mut() {
            p.remove("status");
        }
        let Some(current) = inner.objects.get(&target).cloned() else {
            let stored = inner.admit(from_json(patch)?, field_owner, "Apply");
            return Ok(inner.commit(target, stored));
        };
        let mut merged = to_json(&current)?;
        merge(&mut merged, patch);
        let mut next = from_json(merged)?;
        next.metadata.resource_version = Some(inner.next_rv());
        record_manager(&mut next, field_owner, "Apply");
        Ok(inner.commit(target, next))
    }

    async fn patch_status(&self, obj: &DynamicObject, field_owner: &str) -> StoreResult<DynamicObject> {
        let target = ResourceDescriptor::from_object(obj)?;
        let mut inner = self.inner.lock().await;
        inner.enter(StoreCall { field_owner: Some(field_owner.to_string()), ..call(StoreOp::PatchStatus, &target) })?;
        let current = inner.existing(&target)?;
        let status = obj
            .data
            .get("status")
            .cloned()
            .ok_or_else(|| StoreError::Invalid(format!("{}: status patch without status", target)))?;
        let mut merged = to_json(&current)?;
        merge(&mut merged, serde_json::json!({ "status": status }));
        let mut next = from_json(merged)?;
        next.metadata.resource_version = Some(inner.next_rv());
        record_manager(&mut next, field_owner, "Apply");
        Ok(inner.commit(target, next))
    }
}
