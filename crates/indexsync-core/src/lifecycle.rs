//! Lifecycle state management for automatic indexing.
//!
//! Provides [`LifecycleState`] and [`LifecycleHandle`] for tracking the
//! strictly linear lifecycle of a coordination strategy:
//!
//! ```text
//! unconfigured → configuring → configured → starting → running
//!              → pre-stopping → pre-stopped → stopped
//! ```
//!
//! Any phase may end in `failed`. Transitions are checked atomically, so an
//! entry point invoked out of order is reported as [`Error::Lifecycle`].
//!
//! # Usage
//!
//! ```rust
//! use indexsync_core::lifecycle::{LifecycleHandle, LifecycleState};
//!
//! let handle = LifecycleHandle::new("coordination");
//! assert_eq!(handle.state(), LifecycleState::Unconfigured);
//!
//! // Starting before configuring is rejected.
//! assert!(handle
//!     .transition("start", &[LifecycleState::Configured], LifecycleState::Starting)
//!     .is_err());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::{Error, Result};

// ============================================================================
// LifecycleState
// ============================================================================

/// State of a coordination strategy in its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing has been configured yet.
    Unconfigured,
    /// `configure_automatic_indexing` is running.
    Configuring,
    /// Configured, waiting for `start`.
    Configured,
    /// `start` was invoked; its handle has not completed.
    Starting,
    /// Accepting and processing change events.
    Running,
    /// `pre_stop` was invoked; in-flight work is draining.
    PreStopping,
    /// Drained; waiting for `stop`.
    PreStopped,
    /// All resources released.
    Stopped,
    /// A phase failed.
    Failed(String),
}

impl LifecycleState {
    /// Returns `true` if new change events may be admitted.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` if the lifecycle reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Configuring => write!(f, "configuring"),
            Self::Configured => write!(f, "configured"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::PreStopping => write!(f, "pre-stopping"),
            Self::PreStopped => write!(f, "pre-stopped"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

// ============================================================================
// LifecycleHandle
// ============================================================================

/// Thread-safe handle for observing and advancing lifecycle state.
///
/// Cheap to clone (Arc internals). State changes are broadcast
/// to all subscribers via a watch channel.
#[derive(Clone)]
pub struct LifecycleHandle {
    inner: Arc<LifecycleHandleInner>,
}

struct LifecycleHandleInner {
    name: String,
    tx: watch::Sender<LifecycleState>,
    created_at: Instant,
}

impl LifecycleHandle {
    /// Create a new handle with the given name.
    ///
    /// Initial state is [`LifecycleState::Unconfigured`].
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Unconfigured);
        Self {
            inner: Arc::new(LifecycleHandleInner {
                name: name.into(),
                tx,
                created_at: Instant::now(),
            }),
        }
    }

    /// Get the component name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the current state.
    pub fn state(&self) -> LifecycleState {
        self.inner.tx.borrow().clone()
    }

    /// Atomically moves to `to` if the current state is one of `from`.
    ///
    /// Otherwise returns [`Error::Lifecycle`] naming `operation` and the
    /// state the component was actually in.
    pub fn transition(
        &self,
        operation: &str,
        from: &[LifecycleState],
        to: LifecycleState,
    ) -> Result<()> {
        let mut observed = None;
        self.inner.tx.send_if_modified(|state| {
            if from.contains(state) {
                *state = to.clone();
                true
            } else {
                observed = Some(state.clone());
                false
            }
        });
        match observed {
            None => {
                log::info!("Lifecycle '{}' → {to}", self.inner.name);
                Ok(())
            }
            Some(state) => Err(Error::lifecycle(operation, state)),
        }
    }

    /// Records a failure, regardless of the current state.
    pub fn fail(&self, reason: impl Into<String>) {
        let state = LifecycleState::Failed(reason.into());
        log::error!("Lifecycle '{}' → {state}", self.inner.name);
        self.inner.tx.send_replace(state);
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.tx.subscribe()
    }

    /// Wait until the component is running, failed, or the timeout elapses.
    pub async fn wait_running(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            {
                let state = rx.borrow_and_update().clone();
                match state {
                    LifecycleState::Running => return Ok(()),
                    LifecycleState::Failed(_)
                    | LifecycleState::PreStopping
                    | LifecycleState::PreStopped
                    | LifecycleState::Stopped => {
                        return Err(Error::lifecycle("wait for running", state));
                    }
                    _ => {}
                }
            }

            tokio::select! {
                _ = &mut deadline => {
                    return Err(Error::lifecycle(
                        format!("reach running within {timeout:?}"),
                        self.state(),
                    ));
                }
                result = rx.changed() => {
                    if result.is_err() {
                        return Err(Error::lifecycle("wait for running", "closed"));
                    }
                }
            }
        }
    }

    /// Elapsed time since the handle was created.
    pub fn elapsed(&self) -> Duration {
        self.inner.created_at.elapsed()
    }
}

impl fmt::Debug for LifecycleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHandle")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
