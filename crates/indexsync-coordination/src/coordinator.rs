//! Lifecycle owner of automatic indexing.
//!
//! The [`Coordinator`] enforces the phase order around a
//! [`CoordinationStrategy`]:
//!
//! ```text
//! configure_automatic_indexing ──► start ──► submit* ──► pre_stop ──► stop
//!        (sync)                  (handle)               (handle)    (sync)
//! ```
//!
//! Each phase runs at most once. A phase invoked out of order fails with
//! [`Error::Lifecycle`]; a phase that fails moves the coordinator to
//! `failed`, from which nothing restarts but `stop` still releases the
//! strategy.
//!
//! Submissions hold a shared admission guard for their whole run; `pre_stop`
//! takes it exclusively before draining, so every submission admitted while
//! running completes before the workspaces close.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use indexsync_core::{
    ChangeEvent, Error, IndexSyncConfig, LifecycleHandle, LifecycleState, Result, StrategyKind,
};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use crate::context::IndexingContext;
use crate::distributed::DistributedStrategy;
use crate::event_log::{EventLog, FileEventLog, MemoryEventLog};
use crate::local::LocalStrategy;
use crate::strategy::{CoordinationStrategy, StrategyStats, Submission};

// ============================================================================
// PhaseHandle
// ============================================================================

/// Completion of an asynchronous lifecycle phase.
///
/// Resolves once the phase finished; a failed phase resolves to its error.
#[derive(Debug)]
pub struct PhaseHandle {
    phase: &'static str,
    task: JoinHandle<Result<()>>,
}

impl PhaseHandle {
    /// Name of the phase.
    pub fn phase(&self) -> &'static str {
        self.phase
    }

    /// Returns `true` once the phase finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for PhaseHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let phase = self.phase;
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(Error::backend(format!("{phase} task ended abnormally: {e}"))),
        })
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives a coordination strategy through its lifecycle.
pub struct Coordinator {
    lifecycle: LifecycleHandle,
    strategy: Arc<dyn CoordinationStrategy>,
    context: OnceLock<IndexingContext>,
    admission: Arc<RwLock<()>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("strategy", &self.strategy.name())
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl Coordinator {
    /// Creates an unconfigured coordinator around `strategy`.
    pub fn new(strategy: Arc<dyn CoordinationStrategy>) -> Self {
        Self {
            lifecycle: LifecycleHandle::new(format!("indexing/{}", strategy.name())),
            strategy,
            context: OnceLock::new(),
            admission: Arc::new(RwLock::new(())),
        }
    }

    /// Creates a coordinator with the strategy selected by `config`.
    ///
    /// The distributed strategy uses a file event log when
    /// `coordination.event_log_path` is set, and an in-process log otherwise.
    pub fn from_config(config: &IndexSyncConfig) -> Result<Self> {
        let coordination = &config.coordination;
        let strategy: Arc<dyn CoordinationStrategy> = match coordination.strategy {
            StrategyKind::LocalSync | StrategyKind::LocalAsync => {
                Arc::new(LocalStrategy::from_config(coordination)?)
            }
            StrategyKind::Distributed => {
                let log: Arc<dyn EventLog> = match coordination.event_log_path {
                    Some(ref path) => Arc::new(FileEventLog::open(path)?),
                    None => Arc::new(MemoryEventLog::new()),
                };
                Arc::new(DistributedStrategy::new(log, coordination.clone()))
            }
        };
        Ok(Self::new(strategy))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// The lifecycle handle.
    pub fn lifecycle(&self) -> &LifecycleHandle {
        &self.lifecycle
    }

    /// Name of the strategy.
    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Counters of the strategy.
    pub fn stats(&self) -> StrategyStats {
        self.strategy.stats()
    }

    /// The configured context.
    pub fn context(&self) -> Result<&IndexingContext> {
        self.context
            .get()
            .ok_or_else(|| Error::lifecycle("access the indexing context", self.state()))
    }

    /// Waits until `start` completed.
    pub async fn wait_running(&self, timeout: Duration) -> Result<()> {
        self.lifecycle.wait_running(timeout).await
    }

    /// Validates and stores the context. Must be called once, before
    /// [`start`](Self::start).
    pub fn configure_automatic_indexing(&self, context: IndexingContext) -> Result<()> {
        const OPERATION: &str = "configure automatic indexing";
        self.lifecycle.transition(
            OPERATION,
            &[LifecycleState::Unconfigured],
            LifecycleState::Configuring,
        )?;

        if let Err(e) = context
            .validate()
            .and_then(|()| self.strategy.configure(&context))
        {
            self.lifecycle.fail(format!("configuration: {e}"));
            return Err(e);
        }
        if self.context.set(context).is_err() {
            return Err(Error::lifecycle(OPERATION, LifecycleState::Configured));
        }

        self.lifecycle.transition(
            OPERATION,
            &[LifecycleState::Configuring],
            LifecycleState::Configured,
        )
    }

    /// Starts the strategy in the background.
    ///
    /// Change events are accepted once the returned handle completed.
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<PhaseHandle> {
        self.lifecycle.transition(
            "start",
            &[LifecycleState::Configured],
            LifecycleState::Starting,
        )?;
        let context = self.context()?.clone();
        let strategy = Arc::clone(&self.strategy);
        let lifecycle = self.lifecycle.clone();

        let task = tokio::spawn(async move {
            match strategy.start(&context).await {
                Ok(()) => lifecycle.transition(
                    "complete start",
                    &[LifecycleState::Starting],
                    LifecycleState::Running,
                ),
                Err(e) => {
                    lifecycle.fail(format!("start: {e}"));
                    Err(e)
                }
            }
        });
        Ok(PhaseHandle {
            phase: "start",
            task,
        })
    }

    /// Hands over the change events of one committed unit of work.
    ///
    /// Rejected with [`Error::ShuttingDown`] once `pre_stop` was called,
    /// and with a lifecycle error before `start` completed. A submission
    /// admitted before `pre_stop` runs to completion.
    pub async fn submit(&self, events: Vec<ChangeEvent>) -> Result<Submission> {
        let _admitted = self.admission.read().await;
        match self.lifecycle.state() {
            LifecycleState::Running => {}
            LifecycleState::PreStopping | LifecycleState::PreStopped | LifecycleState::Stopped => {
                return Err(Error::ShuttingDown);
            }
            other => return Err(Error::lifecycle("submit change events", other)),
        }
        self.strategy.submit(self.context()?, events).await
    }

    /// Stops admitting events and drains accepted work in the background.
    ///
    /// Once the strategy drained, every index workspace is closed. Indexes
    /// stay readable through their backends.
    pub fn pre_stop(&self) -> Result<PhaseHandle> {
        self.lifecycle.transition(
            "pre-stop",
            &[LifecycleState::Running],
            LifecycleState::PreStopping,
        )?;
        let context = self.context()?.clone();
        let strategy = Arc::clone(&self.strategy);
        let lifecycle = self.lifecycle.clone();
        let admission = Arc::clone(&self.admission);

        let task = tokio::spawn(async move {
            // Waits for submissions admitted before the transition.
            drop(admission.write().await);
            let drained = match strategy.pre_stop(&context).await {
                Ok(()) => context.registry().close_all().await,
                Err(e) => Err(e),
            };
            match drained {
                Ok(()) => lifecycle.transition(
                    "complete pre-stop",
                    &[LifecycleState::PreStopping],
                    LifecycleState::PreStopped,
                ),
                Err(e) => {
                    lifecycle.fail(format!("pre-stop: {e}"));
                    Err(e)
                }
            }
        });
        Ok(PhaseHandle {
            phase: "pre-stop",
            task,
        })
    }

    /// Releases the strategy. Valid once `pre_stop` completed, or after a
    /// failed phase, in which case the coordinator stays `failed`.
    pub fn stop(&self) -> Result<()> {
        if let LifecycleState::Failed(reason) = self.state() {
            log::warn!(
                "Releasing strategy '{}' after failure: {reason}",
                self.strategy.name()
            );
            return self.strategy.stop();
        }
        self.lifecycle.transition(
            "stop",
            &[LifecycleState::PreStopped],
            LifecycleState::Stopped,
        )?;
        self.strategy.stop()
    }
}
