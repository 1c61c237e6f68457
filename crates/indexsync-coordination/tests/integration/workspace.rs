//! Index maintenance through the registry of a running coordinator.

use std::sync::Arc;

use indexsync_coordination::LocalStrategy;
use indexsync_core::{ChangeEvent, Error, IndexSyncConfig};
use indexsync_fts::{
    Capabilities, IndexBackend, MemoryBackend, SubmissionPolicy, UnsupportedPolicy,
};

use crate::common::TestHarness;

#[tokio::test]
async fn test_merge_ignored_on_backend_without_it() {
    let harness = TestHarness::new();
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;
    coordinator
        .submit(vec![ChangeEvent::insert("Customer", 7)])
        .await
        .unwrap();
    let before = harness.backend.stats();

    let workspace = harness.context.registry().workspace("people").unwrap();
    workspace
        .merge_segments(SubmissionPolicy::Blocking, UnsupportedPolicy::Ignore)
        .await
        .unwrap()
        .await
        .unwrap();

    assert_eq!(harness.backend.stats(), before);
}

#[tokio::test]
async fn test_merge_fails_on_backend_without_it() {
    let harness = TestHarness::new();
    let workspace = harness.context.registry().workspace("people").unwrap();

    let err = workspace
        .merge_segments(SubmissionPolicy::Offloading, UnsupportedPolicy::Fail)
        .await
        .unwrap()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
}

#[tokio::test]
async fn test_purge_by_routing_key() {
    let harness = TestHarness::new();
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;
    coordinator
        .submit(vec![
            ChangeEvent::insert("Customer", 7),
            ChangeEvent::insert("Customer", 8),
            ChangeEvent::insert("Customer", 9),
        ])
        .await
        .unwrap();

    let workspace = harness
        .context
        .registry()
        .workspace_for_type(&"Customer".into())
        .unwrap();
    workspace
        .purge(
            vec!["us".to_string()],
            SubmissionPolicy::Blocking,
            UnsupportedPolicy::Fail,
        )
        .await
        .unwrap()
        .await
        .unwrap();

    assert_eq!(harness.backend.document_count().await.unwrap(), 1);
    assert!(harness.indexed_name(8).await.is_some());
}

#[tokio::test]
async fn test_flush_unsupported_is_ignored_after_plan_execution() {
    let mut config = IndexSyncConfig::default();
    config.plan.force_commit = true;
    let harness = TestHarness::with_backend(
        config,
        MemoryBackend::new("people").with_capabilities(Capabilities::none()),
    );
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;

    let submission = coordinator
        .submit(vec![ChangeEvent::insert("Customer", 7)])
        .await
        .unwrap();
    assert!(submission.outcome().unwrap().is_success());
    assert_eq!(harness.backend.stats().flushes, 0);
}

#[tokio::test]
async fn test_maintenance_rejected_after_pre_stop() {
    let harness = TestHarness::new();
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;
    harness.shutdown(&coordinator).await;

    let workspace = harness.context.registry().workspace("people").unwrap();
    assert!(workspace.is_closed());
    let result = workspace
        .flush(SubmissionPolicy::Blocking, UnsupportedPolicy::Fail)
        .await;
    assert!(matches!(result, Err(Error::ShuttingDown)));
}
