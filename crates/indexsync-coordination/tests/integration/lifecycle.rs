//! Lifecycle contract of the coordinator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexsync_coordination::{Coordinator, DistributedStrategy, EventLog, LocalStrategy, LogEntry};
use indexsync_core::config::CoordinationConfig;
use indexsync_core::{ChangeEvent, ChangeRecord, Error, LifecycleState, Result};

use crate::common::TestHarness;

/// Event log whose every call fails.
struct UnreachableLog;

#[async_trait]
impl EventLog for UnreachableLog {
    async fn append(&self, _records: &[ChangeRecord]) -> Result<u64> {
        Err(Error::backend("log unreachable"))
    }

    async fn read(&self, _offset: u64, _max: usize) -> Result<Vec<LogEntry>> {
        Err(Error::backend("log unreachable"))
    }

    async fn end_offset(&self) -> Result<u64> {
        Err(Error::backend("log unreachable"))
    }

    async fn committed(&self, _consumer: &str) -> Result<u64> {
        Err(Error::backend("log unreachable"))
    }

    async fn commit(&self, _consumer: &str, _offset: u64) -> Result<()> {
        Err(Error::backend("log unreachable"))
    }
}

#[tokio::test]
async fn test_start_before_configure_is_rejected() {
    let coordinator = Coordinator::new(Arc::new(LocalStrategy::sync()));
    let err = coordinator.start().unwrap_err();
    assert!(matches!(err, Error::Lifecycle { .. }));
}

#[tokio::test]
async fn test_stop_while_pre_stop_pending_is_rejected() {
    let harness = TestHarness::new();
    let coordinator = harness
        .started(Arc::new(LocalStrategy::asynchronous(1, 4)))
        .await;

    let pre_stop = coordinator.pre_stop().unwrap();
    assert_eq!(coordinator.state(), LifecycleState::PreStopping);
    let err = coordinator.stop().unwrap_err();
    assert!(matches!(err, Error::Lifecycle { .. }));

    pre_stop.await.unwrap();
    coordinator.stop().unwrap();
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_stop_without_pre_stop_is_rejected() {
    let harness = TestHarness::new();
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;
    assert!(coordinator.stop().is_err());
    assert_eq!(coordinator.state(), LifecycleState::Running);
}

#[tokio::test]
async fn test_pre_stop_twice_is_rejected() {
    let harness = TestHarness::new();
    let coordinator = harness.started(Arc::new(LocalStrategy::sync())).await;
    coordinator.pre_stop().unwrap().await.unwrap();
    assert!(coordinator.pre_stop().is_err());
}

#[tokio::test]
async fn test_events_rejected_once_pre_stop_begins() {
    let harness = TestHarness::new();
    let coordinator = harness
        .started(Arc::new(LocalStrategy::asynchronous(2, 4)))
        .await;
    let pre_stop = coordinator.pre_stop().unwrap();

    let err = coordinator
        .submit(vec![ChangeEvent::insert("Customer", 7)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    pre_stop.await.unwrap();
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let harness = TestHarness::new();
    let coordinator = Coordinator::new(Arc::new(LocalStrategy::sync()));
    let mut states = coordinator.subscribe();

    coordinator
        .configure_automatic_indexing(harness.context.clone())
        .unwrap();
    let start = coordinator.start().unwrap();
    assert_eq!(start.phase(), "start");
    start.await.unwrap();

    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Running);
}

#[tokio::test]
async fn test_failed_start_is_reported_through_the_handle() {
    let harness = TestHarness::new();
    let strategy =
        DistributedStrategy::new(Arc::new(UnreachableLog), CoordinationConfig::default());
    let coordinator = Coordinator::new(Arc::new(strategy));
    coordinator
        .configure_automatic_indexing(harness.context.clone())
        .unwrap();

    let err = coordinator.start().unwrap().await.unwrap_err();
    assert!(matches!(err, Error::Backend { .. }));
    assert!(matches!(coordinator.state(), LifecycleState::Failed(_)));
    assert!(
        coordinator
            .wait_running(Duration::from_millis(50))
            .await
            .is_err()
    );
    assert!(coordinator.pre_stop().is_err());
}

#[tokio::test]
async fn test_unmapped_type_fails_configuration() {
    use indexsync_coordination::IndexingContext;
    use indexsync_core::IdentifierMappings;
    use indexsync_fts::{IndexRegistry, InMemoryDocuments};
    use indexsync_graph::{DependencyGraphBuilder, ObjectType, ReindexingResolver, StaticContainment};

    let (graph, _) = DependencyGraphBuilder::new()
        .add_type(ObjectType::root("Customer"))
        .build()
        .unwrap();
    let resolver = ReindexingResolver::new(
        Arc::new(graph),
        Arc::new(IdentifierMappings::new()),
        Arc::new(StaticContainment::new()),
    );
    let context = IndexingContext::new(
        resolver,
        IndexRegistry::new(&Default::default()),
        Arc::new(InMemoryDocuments::new()),
    );

    let coordinator = Coordinator::new(Arc::new(LocalStrategy::sync()));
    let err = coordinator.configure_automatic_indexing(context).unwrap_err();
    assert!(matches!(err, Error::UnmappedType { .. }));
}
