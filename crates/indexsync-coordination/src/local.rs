//! In-process coordination.
//!
//! - [`LocalMode::Sync`]: the committing task resolves and executes its plan
//!   before `submit` returns.
//! - [`LocalMode::Async`]: the committing task resolves its plan (so
//!   configuration errors still reach it) and queues it for a pool of
//!   worker tasks. The queue is bounded; a full queue makes `submit` wait.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexsync_core::config::CoordinationConfig;
use indexsync_core::{ChangeEvent, Error, Result, StrategyKind};
use indexsync_fts::IndexingPlan;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::IndexingContext;
use crate::strategy::{CoordinationStrategy, StatsCounters, StrategyStats, Submission};

/// Where local plans execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMode {
    /// In the submitting task.
    Sync,
    /// On a worker pool fed by a bounded queue.
    Async {
        /// Worker tasks.
        workers: usize,
        /// Plans queued before `submit` waits.
        queue_capacity: usize,
    },
}

type PlanReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<IndexingPlan>>>;

/// Coordination strategy executing plans in this process.
#[derive(Debug)]
pub struct LocalStrategy {
    mode: LocalMode,
    queue: Mutex<Option<mpsc::Sender<IndexingPlan>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<StatsCounters>,
}

impl LocalStrategy {
    /// Creates a strategy executing in the submitting task.
    pub fn sync() -> Self {
        Self::new(LocalMode::Sync)
    }

    /// Creates a strategy executing on `workers` tasks.
    pub fn asynchronous(workers: usize, queue_capacity: usize) -> Self {
        Self::new(LocalMode::Async {
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
        })
    }

    /// Creates the local strategy selected by the configuration.
    pub fn from_config(config: &CoordinationConfig) -> Result<Self> {
        match config.strategy {
            StrategyKind::LocalSync => Ok(Self::sync()),
            StrategyKind::LocalAsync => Ok(Self::asynchronous(
                config.workers,
                config.queue_capacity,
            )),
            StrategyKind::Distributed => Err(Error::config(
                "the distributed strategy is not a local strategy",
            )),
        }
    }

    fn new(mode: LocalMode) -> Self {
        Self {
            mode,
            queue: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Execution mode.
    pub fn mode(&self) -> LocalMode {
        self.mode
    }

    fn sender(&self) -> Result<mpsc::Sender<IndexingPlan>> {
        self.queue
            .lock()
            .map_err(|_| Error::backend("plan queue lock poisoned"))?
            .clone()
            .ok_or(Error::ShuttingDown)
    }

    fn take_workers(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut workers = self
            .workers
            .lock()
            .map_err(|_| Error::backend("worker list lock poisoned"))?;
        Ok(std::mem::take(&mut *workers))
    }
}

#[async_trait]
impl CoordinationStrategy for LocalStrategy {
    fn name(&self) -> &str {
        match self.mode {
            LocalMode::Sync => "local-sync",
            LocalMode::Async { .. } => "local-async",
        }
    }

    async fn start(&self, context: &IndexingContext) -> Result<()> {
        let LocalMode::Async {
            workers,
            queue_capacity,
        } = self.mode
        else {
            return Ok(());
        };

        let (tx, rx) = mpsc::channel(queue_capacity);
        let rx: PlanReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&rx),
                    context.clone(),
                    Arc::clone(&self.stats),
                ))
            })
            .collect();

        *self
            .queue
            .lock()
            .map_err(|_| Error::backend("plan queue lock poisoned"))? = Some(tx);
        self.workers
            .lock()
            .map_err(|_| Error::backend("worker list lock poisoned"))?
            .extend(handles);
        log::info!("Started {workers} indexing workers (queue capacity {queue_capacity})");
        Ok(())
    }

    async fn submit(
        &self,
        context: &IndexingContext,
        events: Vec<ChangeEvent>,
    ) -> Result<Submission> {
        let plan = context.plan_for(&events).await?;
        match self.mode {
            LocalMode::Sync => {
                let outcome = context.execute(plan).await?;
                self.stats.record(&outcome);
                Ok(Submission::Executed(outcome))
            }
            LocalMode::Async { .. } => {
                if !plan.is_empty() {
                    self.sender()?
                        .send(plan)
                        .await
                        .map_err(|_| Error::ShuttingDown)?;
                }
                Ok(Submission::Accepted {
                    events: events.len(),
                })
            }
        }
    }

    async fn pre_stop(&self, _context: &IndexingContext) -> Result<()> {
        // Dropping the sender lets workers drain the queue and exit.
        drop(
            self.queue
                .lock()
                .map_err(|_| Error::backend("plan queue lock poisoned"))?
                .take(),
        );

        let workers = self.take_workers()?;
        let count = workers.len();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                log::error!("Indexing worker ended abnormally: {e}");
            }
        }
        if count > 0 {
            log::info!("Drained {count} indexing workers");
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        for worker in self.take_workers()? {
            worker.abort();
        }
        Ok(())
    }

    fn stats(&self) -> StrategyStats {
        self.stats.snapshot()
    }
}

async fn run_worker(
    id: usize,
    queue: PlanReceiver,
    context: IndexingContext,
    stats: Arc<StatsCounters>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(plan) = next else {
            break;
        };
        match context.execute(plan).await {
            Ok(outcome) => {
                if !outcome.is_success() {
                    log::warn!(
                        "Worker {id}: {} of {} document operations failed",
                        outcome.failed.len(),
                        outcome.total()
                    );
                }
                stats.record(&outcome);
            }
            Err(e) => {
                log::error!("Worker {id}: plan execution failed: {e}");
                stats.abandon();
            }
        }
    }
    log::debug!("Worker {id}: queue closed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures::customers_and_orders;
    use indexsync_core::IndexSyncConfig;

    #[tokio::test]
    async fn test_sync_executes_inline() {
        let fixture = customers_and_orders(IndexSyncConfig::default());
        let strategy = LocalStrategy::sync();
        strategy.start(&fixture.context).await.unwrap();

        let submission = strategy
            .submit(&fixture.context, vec![ChangeEvent::insert("Customer", 7)])
            .await
            .unwrap();
        assert!(submission.outcome().unwrap().is_success());
        assert_eq!(fixture.backend.stats().documents, 1);
        assert_eq!(strategy.stats().plans_executed, 1);
    }

    #[tokio::test]
    async fn test_async_drains_on_pre_stop() {
        let fixture = customers_and_orders(IndexSyncConfig::default());
        let strategy = LocalStrategy::asynchronous(2, 4);
        strategy.start(&fixture.context).await.unwrap();

        for id in [7, 8] {
            let submission = strategy
                .submit(&fixture.context, vec![ChangeEvent::insert("Customer", id)])
                .await
                .unwrap();
            assert!(matches!(submission, Submission::Accepted { events: 1 }));
        }
        strategy.pre_stop(&fixture.context).await.unwrap();

        assert_eq!(fixture.backend.stats().documents, 2);
        let stats = strategy.stats();
        assert_eq!(stats.plans_executed, 2);
        assert_eq!(stats.documents_indexed, 2);

        let err = strategy
            .submit(&fixture.context, vec![ChangeEvent::insert("Customer", 7)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
        strategy.stop().unwrap();
    }

    #[tokio::test]
    async fn test_async_reports_configuration_errors_to_submitter() {
        let fixture = customers_and_orders(IndexSyncConfig::default());
        let strategy = LocalStrategy::asynchronous(1, 1);
        strategy.start(&fixture.context).await.unwrap();

        let err = strategy
            .submit(&fixture.context, vec![ChangeEvent::insert("Invoice", 1)])
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        strategy.pre_stop(&fixture.context).await.unwrap();
    }

    #[test]
    fn test_from_config() {
        let mut config = CoordinationConfig::default();
        assert_eq!(
            LocalStrategy::from_config(&config).unwrap().mode(),
            LocalMode::Sync
        );

        config.strategy = StrategyKind::LocalAsync;
        config.workers = 3;
        assert_eq!(
            LocalStrategy::from_config(&config).unwrap().mode(),
            LocalMode::Async {
                workers: 3,
                queue_capacity: 256
            }
        );

        config.strategy = StrategyKind::Distributed;
        assert!(LocalStrategy::from_config(&config).is_err());
    }
}
