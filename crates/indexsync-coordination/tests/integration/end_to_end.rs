//! Complete units of work through a running coordinator.

use std::sync::Arc;

use indexsync_coordination::{LocalStrategy, Submission};
use indexsync_core::{ChangeEvent, IndexSyncConfig};
use indexsync_fts::PlanOutcome;

use crate::common::{TestHarness, customer};

fn outcome(submission: Submission) -> PlanOutcome {
    let Submission::Executed(outcome) = submission else {
        unreachable!("the sync strategy executes before returning");
    };
    outcome
}

async fn seeded() -> (TestHarness, indexsync_coordination::Coordinator) {
    let harness = TestHarness::new();
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;
    coordinator
        .submit(vec![
            ChangeEvent::insert("Customer", 7),
            ChangeEvent::insert("Customer", 8),
        ])
        .await
        .unwrap();
    (harness, coordinator)
}

#[tokio::test]
async fn test_order_total_change_reindexes_owning_customer_only() {
    let (harness, coordinator) = seeded().await;
    let untouched = harness.backend.version_of(&harness.customer_key(8));

    harness.documents.put("Customer", 7, customer("Ada Lovelace"));
    let outcome = outcome(
        coordinator
            .submit(vec![ChangeEvent::update("Order", 42, ["total"])])
            .await
            .unwrap(),
    );

    assert_eq!(outcome.succeeded, vec![harness.customer_key(7)]);
    assert_eq!(harness.indexed_name(7).await.as_deref(), Some("Ada Lovelace"));
    assert_eq!(harness.backend.version_of(&harness.customer_key(8)), untouched);
}

#[tokio::test]
async fn test_unprojected_order_change_is_ignored() {
    let (_harness, coordinator) = seeded().await;
    let outcome = outcome(
        coordinator
            .submit(vec![ChangeEvent::update("Order", 42, ["internal_note"])])
            .await
            .unwrap(),
    );
    assert_eq!(outcome.total(), 0);
}

#[tokio::test]
async fn test_none_edge_never_reindexes() {
    let (_harness, coordinator) = seeded().await;
    let outcome = outcome(
        coordinator
            .submit(vec![ChangeEvent::insert("AuditEntry", 500)])
            .await
            .unwrap(),
    );
    assert_eq!(outcome.total(), 0);
}

#[tokio::test]
async fn test_full_edge_reindexes_on_any_change() {
    let (harness, coordinator) = seeded().await;
    let outcome = outcome(
        coordinator
            .submit(vec![ChangeEvent::update("Address", 101, ["city"])])
            .await
            .unwrap(),
    );
    assert_eq!(outcome.succeeded, vec![harness.customer_key(8)]);
}

#[tokio::test]
async fn test_events_on_one_document_collapse() {
    let (harness, coordinator) = seeded().await;
    let outcome = outcome(
        coordinator
            .submit(vec![
                ChangeEvent::update("Order", 42, ["status"]),
                ChangeEvent::update("Address", 100, ["zip"]),
                ChangeEvent::update("Customer", 7, ["name"]),
            ])
            .await
            .unwrap(),
    );
    assert_eq!(outcome.succeeded, vec![harness.customer_key(7)]);
}

#[tokio::test]
async fn test_delete_then_reinsert_is_a_single_update() {
    let (harness, coordinator) = seeded().await;
    harness.documents.put("Customer", 7, customer("Ada again"));

    let outcome = outcome(
        coordinator
            .submit(vec![
                ChangeEvent::delete("Customer", 7),
                ChangeEvent::insert("Customer", 7),
            ])
            .await
            .unwrap(),
    );

    assert_eq!(outcome.total(), 1);
    assert_eq!(harness.indexed_name(7).await.as_deref(), Some("Ada again"));
}

#[tokio::test]
async fn test_add_then_delete_writes_nothing() {
    let (harness, coordinator) = seeded().await;
    let outcome = outcome(
        coordinator
            .submit(vec![
                ChangeEvent::insert("Customer", 9),
                ChangeEvent::delete("Customer", 9),
            ])
            .await
            .unwrap(),
    );

    assert_eq!(outcome.total(), 0);
    assert!(harness.backend.version_of(&harness.customer_key(9)).is_none());
}

#[tokio::test]
async fn test_vanished_entity_is_deleted() {
    let (harness, coordinator) = seeded().await;
    harness.documents.remove("Customer", 8);

    coordinator
        .submit(vec![ChangeEvent::update("Customer", 8, ["name"])])
        .await
        .unwrap();
    assert!(harness.indexed_name(8).await.is_none());
    assert_eq!(harness.backend.stats().documents, 1);
}

#[tokio::test]
async fn test_documents_carry_routing_keys() {
    let (harness, _coordinator) = seeded().await;
    let routing: Vec<Option<String>> = harness
        .backend
        .keys()
        .into_iter()
        .map(|key| key.routing_key)
        .collect();
    assert_eq!(routing, vec![Some("us".to_string()), Some("eu".to_string())]);
}

#[tokio::test]
async fn test_partial_failure_keeps_successful_documents() {
    let (harness, coordinator) = seeded().await;
    harness.backend.reject_document("8", "mapping conflict");

    let outcome = outcome(
        coordinator
            .submit(vec![
                ChangeEvent::update("Customer", 7, ["name"]),
                ChangeEvent::update("Customer", 8, ["name"]),
            ])
            .await
            .unwrap(),
    );

    assert_eq!(outcome.succeeded, vec![harness.customer_key(7)]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].key, harness.customer_key(8));
}

#[tokio::test]
async fn test_all_or_nothing_fails_the_unit_of_work() {
    let mut config = IndexSyncConfig::default();
    config.plan.all_or_nothing = true;
    let harness = TestHarness::with_config(config);
    harness.backend.reject_document("8", "mapping conflict");
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;

    let result = coordinator
        .submit(vec![
            ChangeEvent::insert("Customer", 7),
            ChangeEvent::insert("Customer", 8),
        ])
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_commit_and_refresh_after_execution() {
    let mut config = IndexSyncConfig::default();
    config.plan.force_commit = true;
    config.plan.force_refresh = true;
    let harness = TestHarness::with_config(config);
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;

    coordinator
        .submit(vec![ChangeEvent::insert("Customer", 7)])
        .await
        .unwrap();

    let stats = harness.backend.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.refreshes, 1);
    assert_eq!(stats.pending_writes, 0);
}

#[tokio::test]
async fn test_async_workers_index_everything_before_pre_stop_completes() {
    let harness = TestHarness::new();
    let coordinator = harness
        .started(Arc::new(LocalStrategy::asynchronous(3, 2)))
        .await;

    for _ in 0..5 {
        for id in [7, 8, 9] {
            let submission = coordinator
                .submit(vec![ChangeEvent::update("Customer", id, ["name"])])
                .await
                .unwrap();
            assert!(submission.outcome().is_none());
        }
    }
    harness.shutdown(&coordinator).await;

    assert_eq!(harness.backend.stats().documents, 3);
    // Plans for one customer may race; the older one then fails with a
    // version conflict instead of overwriting the newer document.
    let stats = coordinator.stats();
    assert_eq!(stats.plans_executed, 15);
    assert_eq!(stats.documents_indexed + stats.documents_failed, 15);
}
