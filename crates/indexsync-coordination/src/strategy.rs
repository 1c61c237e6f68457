//! The coordination strategy trait.
//!
//! A strategy decides *when and where* plans execute: inline in the
//! committing task, on an in-process worker pool, or on a consumer of an
//! external event log. The [`Coordinator`](crate::Coordinator) owns the
//! lifecycle checks; strategies only implement the phases.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use indexsync_core::{ChangeEvent, Result};
use indexsync_fts::PlanOutcome;

use crate::context::IndexingContext;

/// What happened to a submitted unit of work.
#[derive(Debug)]
pub enum Submission {
    /// The plan executed before `submit` returned.
    Executed(PlanOutcome),
    /// The work was accepted and will execute in the background.
    Accepted {
        /// Change events accepted.
        events: usize,
    },
}

impl Submission {
    /// The outcome, if the plan already executed.
    pub fn outcome(&self) -> Option<&PlanOutcome> {
        match self {
            Self::Executed(outcome) => Some(outcome),
            Self::Accepted { .. } => None,
        }
    }
}

/// Counters shared by the strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyStats {
    /// Plans executed.
    pub plans_executed: usize,
    /// Document operations that succeeded.
    pub documents_indexed: usize,
    /// Document operations that failed.
    pub documents_failed: usize,
    /// Units of work abandoned after failing.
    pub units_abandoned: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    plans_executed: AtomicUsize,
    documents_indexed: AtomicUsize,
    documents_failed: AtomicUsize,
    units_abandoned: AtomicUsize,
}

impl StatsCounters {
    pub(crate) fn record(&self, outcome: &PlanOutcome) {
        self.plans_executed.fetch_add(1, Ordering::Relaxed);
        self.documents_indexed
            .fetch_add(outcome.succeeded.len(), Ordering::Relaxed);
        self.documents_failed
            .fetch_add(outcome.failed.len(), Ordering::Relaxed);
    }

    pub(crate) fn abandon(&self) {
        self.units_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StrategyStats {
        StrategyStats {
            plans_executed: self.plans_executed.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            units_abandoned: self.units_abandoned.load(Ordering::Relaxed),
        }
    }
}

/// How change events flow into plans and plans into backends.
///
/// Phases are called by the coordinator in order, each at most once:
/// `start`, then any number of `submit`s, then `pre_stop`, then `stop`.
#[async_trait]
pub trait CoordinationStrategy: Send + Sync {
    /// Strategy name, for logs.
    fn name(&self) -> &str;

    /// Checks strategy-specific requirements at configuration time.
    fn configure(&self, _context: &IndexingContext) -> Result<()> {
        Ok(())
    }

    /// Acquires resources and spawns background work.
    async fn start(&self, context: &IndexingContext) -> Result<()>;

    /// Hands over the change events of one unit of work.
    async fn submit(
        &self,
        context: &IndexingContext,
        events: Vec<ChangeEvent>,
    ) -> Result<Submission>;

    /// Stops admitting work and drains what was accepted.
    async fn pre_stop(&self, context: &IndexingContext) -> Result<()>;

    /// Releases what is left. Called once `pre_stop` completed.
    fn stop(&self) -> Result<()>;

    /// Counters of executed work.
    fn stats(&self) -> StrategyStats;
}
