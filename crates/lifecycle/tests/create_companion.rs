mod common;

use common::{companion_descriptor, companion_key, harness, manifest};
use tether_core::labels::label_value;
use tether_core::{finalizer, State, StoreError};
use tether_lifecycle::LifecycleError;
use tether_store::StoreOp;

#[tokio::test]
async fn creates_labelled_companion_then_adds_finalizer() {
    let h = harness();
    let mut m = h.seed(manifest(true, &h.mandatory())).await;

    h.lifecycle.create_companion(&mut m).await.unwrap();

    let live = h.target.object(&companion_key()).await.expect("companion created");
    assert_eq!(
        label_value(&live.metadata, &h.config.managed_by_label),
        Some(h.config.managed_by_value.as_str())
    );
    assert!(finalizer::has_finalizer(&m.metadata, &h.config.companion_finalizer));
    let stored = h.fresh(&m).await.unwrap();
    assert!(finalizer::has_finalizer(&stored.metadata, &h.config.companion_finalizer));
    for f in h.mandatory() {
        assert!(stored.finalizers().iter().any(|x| x == f), "lost {f}");
    }

    let create = h.target.calls().await.into_iter().find(|c| c.op == StoreOp::Create).unwrap();
    assert_eq!(create.field_owner.as_deref(), Some(h.config.companion_finalizer.as_str()));
}

#[tokio::test]
async fn existing_companion_counts_as_created() {
    let h = harness();
    h.target.insert(companion_descriptor()).await.unwrap();
    let mut m = h.seed(manifest(true, &[])).await;

    h.lifecycle.create_companion(&mut m).await.unwrap();

    assert_eq!(h.target.len().await, 1);
    assert!(finalizer::has_finalizer(&m.metadata, &h.config.companion_finalizer));
    assert_ne!(m.status.state, State::Error);
}

#[tokio::test]
async fn repeated_create_writes_finalizer_once() {
    let h = harness();
    let mut m = h.seed(manifest(true, &[])).await;

    h.lifecycle.create_companion(&mut m).await.unwrap();
    let after_first = m.finalizers().to_vec();
    h.lifecycle.create_companion(&mut m).await.unwrap();

    assert_eq!(m.finalizers(), after_first.as_slice());
    assert_eq!(h.control.count(StoreOp::PatchApply).await, 1);
    assert_eq!(h.target.len().await, 1);
}

#[tokio::test]
async fn absent_descriptor_is_a_no_op() {
    let h = harness();
    let mut m = h.seed(manifest(false, &h.mandatory())).await;
    let before = m.finalizers().to_vec();

    h.lifecycle.create_companion(&mut m).await.unwrap();

    assert_eq!(m.finalizers(), before.as_slice());
    assert!(h.target.calls().await.is_empty());
    assert_eq!(h.control.writes().await, 0);
}

#[tokio::test]
async fn failed_create_sets_error_and_leaves_finalizers() {
    let h = harness();
    let mut m = h.seed(manifest(true, &h.mandatory())).await;
    let before = m.finalizers().to_vec();
    h.target.fail_on(StoreOp::Create, Some("n"), StoreError::Rejected { code: 403, message: "forbidden".into() }).await;

    let err = h.lifecycle.create_companion(&mut m).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Companion(_)), "err={err}");
    assert_eq!(m.status.state, State::Error);
    assert!(m.status.last_operation.operation.contains("failed to create companion instance"));
    assert_eq!(m.finalizers(), before.as_slice());
    assert_eq!(h.control.count(StoreOp::PatchApply).await, 0);
}

#[tokio::test]
async fn failed_finalizer_patch_keeps_in_memory_copy() {
    let h = harness();
    let mut m = h.seed(manifest(true, &[])).await;
    h.control.fail_once(StoreOp::PatchApply, None, StoreError::Transient("deadline exceeded".into())).await;

    let err = h.lifecycle.create_companion(&mut m).await.unwrap_err();

    assert!(matches!(err, LifecycleError::AddFinalizers { .. }), "err={err}");
    assert!(m.finalizers().is_empty());
    assert_eq!(m.status.state, State::Error);
    assert!(h.target.object(&companion_key()).await.is_some());

    // The next pass converges.
    h.lifecycle.create_companion(&mut m).await.unwrap();
    assert!(finalizer::has_finalizer(&m.metadata, &h.config.companion_finalizer));
}

#[tokio::test]
async fn deletion_requested_skips_creation() {
    let h = harness();
    let m = h.seed(manifest(true, &h.mandatory())).await;
    let mut m = h.request_deletion(&m).await;

    h.lifecycle.create_companion(&mut m).await.unwrap();

    assert!(h.target.calls().await.is_empty());
    assert!(!finalizer::has_finalizer(&m.metadata, &h.config.companion_finalizer));
}
