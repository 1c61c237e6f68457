//! Publishing to an event log and consuming it elsewhere.

use std::sync::Arc;

use indexsync_coordination::{
    Coordinator, DistributedStrategy, EventLog, FileEventLog, MemoryEventLog,
};
use indexsync_core::config::CoordinationConfig;
use indexsync_core::{ChangeEvent, IndexSyncConfig, StrategyKind};

use crate::common::TestHarness;

fn coordination(consumer_enabled: bool) -> CoordinationConfig {
    CoordinationConfig {
        strategy: StrategyKind::Distributed,
        poll_interval_ms: 5,
        retry_attempts: 2,
        retry_base_delay_ms: 1,
        consumer_enabled,
        ..CoordinationConfig::default()
    }
}

#[tokio::test]
async fn test_publisher_and_consumer_share_a_file_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("changes.jsonl");
    let harness = TestHarness::new();

    // Publisher: no consumer in this process.
    let publisher = harness
        .started(Arc::new(DistributedStrategy::new(
            Arc::new(FileEventLog::open(&path).unwrap()),
            coordination(false),
        )))
        .await;
    publisher
        .submit(vec![
            ChangeEvent::insert("Customer", 7),
            ChangeEvent::update("Order", 43, ["total"]),
        ])
        .await
        .unwrap();
    harness.shutdown(&publisher).await;
    assert_eq!(harness.backend.stats().documents, 0);

    // Consumer: a fresh process reading the same file.
    let consumer_side = TestHarness::new();
    let log = Arc::new(FileEventLog::open(&path).unwrap());
    let consumer = consumer_side
        .started(Arc::new(DistributedStrategy::new(
            log.clone(),
            coordination(true),
        )))
        .await;
    consumer_side.shutdown(&consumer).await;

    assert_eq!(consumer_side.backend.stats().documents, 2);
    assert_eq!(log.committed("indexsync").await.unwrap(), 2);
    assert!(log.offsets_path().exists());
}

#[tokio::test]
async fn test_consumer_resumes_from_committed_offset() {
    let log = Arc::new(MemoryEventLog::new());
    let harness = TestHarness::new();

    let first = harness
        .started(Arc::new(DistributedStrategy::new(
            log.clone(),
            coordination(true),
        )))
        .await;
    first
        .submit(vec![ChangeEvent::insert("Customer", 7)])
        .await
        .unwrap();
    harness.shutdown(&first).await;
    assert_eq!(first.stats().plans_executed, 1);

    let second_side = TestHarness::new();
    let second = second_side
        .started(Arc::new(DistributedStrategy::new(
            log.clone(),
            coordination(true),
        )))
        .await;
    second
        .submit(vec![ChangeEvent::insert("Customer", 9)])
        .await
        .unwrap();
    second_side.shutdown(&second).await;

    // Only the new record reached the second consumer.
    assert_eq!(second.stats().plans_executed, 1);
    assert_eq!(second_side.backend.stats().documents, 1);
    assert!(second_side.indexed_name(9).await.is_some());
    assert_eq!(log.committed("indexsync").await.unwrap(), 2);
}

#[tokio::test]
async fn test_poisoned_batch_does_not_block_the_log() {
    let harness = TestHarness::new();
    harness.backend.reject_document("8", "shard unavailable");
    let log = Arc::new(MemoryEventLog::new());
    let coordinator = harness
        .started(Arc::new(DistributedStrategy::new(
            log.clone(),
            CoordinationConfig {
                batch_size: 1,
                ..coordination(true)
            },
        )))
        .await;

    coordinator
        .submit(vec![ChangeEvent::insert("Customer", 8)])
        .await
        .unwrap();
    coordinator
        .submit(vec![ChangeEvent::insert("Customer", 7)])
        .await
        .unwrap();
    harness.shutdown(&coordinator).await;

    let stats = coordinator.stats();
    assert_eq!(stats.units_abandoned, 1);
    assert_eq!(stats.documents_indexed, 1);
    assert!(harness.indexed_name(7).await.is_some());
    assert_eq!(log.committed("indexsync").await.unwrap(), 2);
}

#[tokio::test]
async fn test_configured_file_log_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = IndexSyncConfig::default();
    config.coordination = coordination(true);
    config.coordination.event_log_path = Some(
        dir.path()
            .join("nested/changes.jsonl")
            .to_string_lossy()
            .into_owned(),
    );
    let harness = TestHarness::with_config(config.clone());

    let coordinator = Coordinator::from_config(&config).unwrap();
    coordinator
        .configure_automatic_indexing(harness.context.clone())
        .unwrap();
    coordinator.start().unwrap().await.unwrap();
    coordinator
        .submit(vec![ChangeEvent::update("Address", 100, ["street"])])
        .await
        .unwrap();
    harness.shutdown(&coordinator).await;

    assert!(dir.path().join("nested/changes.jsonl").exists());
    assert!(harness.indexed_name(7).await.is_some());
}
