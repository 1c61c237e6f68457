//! Distributed coordination over an event log.
//!
//! `submit` turns change events into [`ChangeRecord`]s stamped with a
//! logical timestamp and the unit of work they belong to, and appends them
//! to an [`EventLog`]. A consumer task (in this process when
//! `consumer_enabled`, or in another one sharing the log) reads batches from
//! its committed offset and rebuilds one plan per unit of work, versioned
//! with the unit's latest timestamp.
//!
//! Failed units are retried with exponential backoff while the failure is
//! retryable. After the last attempt the unit is abandoned and its offset
//! committed anyway, so one poisoned unit never blocks the log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use indexsync_core::config::CoordinationConfig;
use indexsync_core::{ChangeEvent, ChangeRecord, Error, Result};
use indexsync_fts::PlanOutcome;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::context::IndexingContext;
use crate::event_log::{EventLog, LogEntry};
use crate::strategy::{CoordinationStrategy, StatsCounters, StrategyStats, Submission};

/// Coordination strategy publishing changes to an event log.
pub struct DistributedStrategy {
    log: Arc<dyn EventLog>,
    config: CoordinationConfig,
    clock: AtomicU64,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<StatsCounters>,
}

impl std::fmt::Debug for DistributedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedStrategy")
            .field("consumer_name", &self.config.consumer_name)
            .field("consumer_enabled", &self.config.consumer_enabled)
            .field("clock", &self.clock.load(Ordering::Relaxed))
            .finish()
    }
}

impl DistributedStrategy {
    /// Creates a strategy over `log`.
    ///
    /// The logical clock starts at the current time in microseconds, so
    /// timestamps keep increasing across restarts.
    pub fn new(log: Arc<dyn EventLog>, config: CoordinationConfig) -> Self {
        let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or_default();
        let (shutdown, _) = watch::channel(false);
        Self {
            log,
            config,
            clock: AtomicU64::new(now),
            shutdown,
            consumer: Mutex::new(None),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// The event log.
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Next logical timestamp.
    pub fn next_timestamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn to_record(&self, context: &IndexingContext, event: &ChangeEvent) -> Result<ChangeRecord> {
        let resolver = context.resolver();
        let graph = resolver.graph();
        if !graph.contains_type(event.object_type()) {
            return Err(Error::config(format!(
                "type '{}' is not part of the dependency graph",
                event.object_type()
            )));
        }
        resolver.mappings().mapping_for(event.object_type())?;
        let routing_key = if graph.is_root(event.object_type()) {
            resolver
                .document_key(event.object_type(), event.id())?
                .routing_key
        } else {
            None
        };
        Ok(ChangeRecord::from_event(event, routing_key, self.next_timestamp()))
    }

    fn take_consumer(&self) -> Result<Option<JoinHandle<()>>> {
        Ok(self
            .consumer
            .lock()
            .map_err(|_| Error::backend("consumer handle lock poisoned"))?
            .take())
    }
}

#[async_trait]
impl CoordinationStrategy for DistributedStrategy {
    fn name(&self) -> &str {
        "distributed"
    }

    async fn start(&self, context: &IndexingContext) -> Result<()> {
        if !self.config.consumer_enabled {
            log::info!("Event log consumer disabled; publishing only");
            return Ok(());
        }
        let resume = self.log.committed(&self.config.consumer_name).await?;
        let consumer = Consumer {
            log: Arc::clone(&self.log),
            context: context.clone(),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        };
        let handle = tokio::spawn(consumer.run(self.shutdown.subscribe()));
        *self
            .consumer
            .lock()
            .map_err(|_| Error::backend("consumer handle lock poisoned"))? = Some(handle);
        log::info!(
            "Started event log consumer '{}' at offset {resume}",
            self.config.consumer_name
        );
        Ok(())
    }

    async fn submit(
        &self,
        context: &IndexingContext,
        events: Vec<ChangeEvent>,
    ) -> Result<Submission> {
        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }
        let records = events
            .iter()
            .map(|event| self.to_record(context, event))
            .collect::<Result<Vec<_>>>()?;
        if let Some(unit) = records.first().map(|r| r.timestamp) {
            let records: Vec<ChangeRecord> =
                records.into_iter().map(|r| r.in_unit(unit)).collect();
            let end = self.log.append(&records).await?;
            log::debug!("Published {} change records (log end {end})", records.len());
        }
        Ok(Submission::Accepted {
            events: events.len(),
        })
    }

    async fn pre_stop(&self, _context: &IndexingContext) -> Result<()> {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.take_consumer()? {
            handle
                .await
                .map_err(|e| Error::backend(format!("event log consumer ended abnormally: {e}")))?;
            log::info!("Event log consumer '{}' drained", self.config.consumer_name);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(handle) = self.take_consumer()? {
            handle.abort();
        }
        Ok(())
    }

    fn stats(&self) -> StrategyStats {
        self.stats.snapshot()
    }
}

// ============================================================================
// Consumer
// ============================================================================

struct Consumer {
    log: Arc<dyn EventLog>,
    context: IndexingContext,
    config: CoordinationConfig,
    stats: Arc<StatsCounters>,
}

impl Consumer {
    /// Polls until shutdown is requested and the log is drained.
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut draining = false;
        loop {
            draining |= *shutdown.borrow_and_update();
            match self.consume_batch().await {
                Ok(0) if draining => break,
                Ok(0) => {}
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("Event log consumer '{}': {e}", self.config.consumer_name);
                    if draining {
                        break;
                    }
                }
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        draining = true;
                    }
                }
            }
        }
    }

    /// Processes one batch; returns the number of records consumed.
    async fn consume_batch(&self) -> Result<usize> {
        let name = &self.config.consumer_name;
        let offset = self.log.committed(name).await?;
        let entries = self.read_whole_units(offset).await?;

        for unit in entries.chunk_by(|a, b| a.record.unit == b.record.unit) {
            let (first, next) = match (unit.first(), unit.last()) {
                (Some(first), Some(last)) => (first.offset, last.offset + 1),
                _ => continue,
            };
            let version = unit
                .iter()
                .map(|e| e.record.timestamp)
                .max()
                .unwrap_or_default();
            let events: Vec<ChangeEvent> = unit.iter().map(|e| e.record.to_event()).collect();

            match self.execute_with_retry(&events, version).await {
                Ok(outcome) => {
                    if !outcome.is_success() {
                        log::warn!(
                            "Records {first}..{next}: {} of {} document operations failed",
                            outcome.failed.len(),
                            outcome.total()
                        );
                    }
                    self.stats.record(&outcome);
                }
                Err(e) => {
                    log::error!("Giving up on records {first}..{next}: {e}");
                    self.stats.abandon();
                }
            }
            self.log.commit(name, next).await?;
        }
        Ok(entries.len())
    }

    /// Reads a batch from `offset`, extended so its last unit is complete.
    async fn read_whole_units(&self, offset: u64) -> Result<Vec<LogEntry>> {
        let batch_size = self.config.batch_size;
        let mut entries = self.log.read(offset, batch_size).await?;
        let mut full = entries.len() == batch_size;
        while full {
            let Some((unit, from)) = entries.last().map(|e| (e.record.unit, e.offset + 1)) else {
                break;
            };
            let more = self.log.read(from, batch_size).await?;
            let same_unit = more.iter().take_while(|e| e.record.unit == unit).count();
            full = same_unit == batch_size;
            entries.extend(more.into_iter().take(same_unit));
        }
        Ok(entries)
    }

    async fn execute_with_retry(
        &self,
        events: &[ChangeEvent],
        version: u64,
    ) -> Result<PlanOutcome> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_base_delay())
            .with_max_times(self.config.retry_attempts.saturating_sub(1));

        (|| self.attempt(events, version))
            .retry(backoff)
            .when(Error::is_retryable)
            .notify(|e: &Error, delay: Duration| {
                log::warn!("Retrying batch in {delay:?}: {e}");
            })
            .await
    }

    /// Executes a batch once. A retryable document failure fails the attempt.
    async fn attempt(&self, events: &[ChangeEvent], version: u64) -> Result<PlanOutcome> {
        let plan = self.context.plan_for(events).await?.with_version(version);
        let mut outcome = self.context.execute(plan).await?;
        match outcome.failed.iter().position(|f| f.error.is_retryable()) {
            None => Ok(outcome),
            Some(i) => Err(outcome.failed.swap_remove(i).error),
        }
    }
}
