//! Per-index maintenance workspace.
//!
//! An [`IndexWorkspace`] owns a bounded queue and one worker task per
//! physical index. Maintenance requests (`merge_segments`, `purge`, `flush`,
//! `refresh`) are queued and executed in submission order; each returns an
//! [`OperationHandle`] that resolves when the backend is done.
//!
//! Two independent policies govern every request:
//!
//! | Policy | Value | Behavior |
//! |--------|-------|----------|
//! | [`SubmissionPolicy`] | `Blocking` | wait for queue space |
//! | | `Offloading` | never wait; a full queue fails with `Backpressure` |
//! | [`UnsupportedPolicy`] | `Fail` | the handle reports `Unsupported` |
//! | | `Ignore` | the handle completes successfully, nothing runs |

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use indexsync_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::{IndexBackend, MaintenanceKind};

// ============================================================================
// Policies
// ============================================================================

/// How a maintenance request enters the workspace queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPolicy {
    /// Wait until the queue accepts the request.
    #[default]
    Blocking,
    /// Queue without waiting; fail if the queue is full.
    Offloading,
}

/// What happens when the backend lacks the requested capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedPolicy {
    /// Report an `Unsupported` error through the handle.
    #[default]
    Fail,
    /// Complete successfully without doing anything.
    Ignore,
}

// ============================================================================
// OperationHandle
// ============================================================================

enum HandleState {
    Done(Option<Result<()>>),
    Pending(oneshot::Receiver<Result<()>>),
}

/// Completion handle of a maintenance request.
///
/// Await it to get the operation's result. If the workspace is closed
/// before the request runs, the handle resolves to
/// [`Error::ShuttingDown`].
pub struct OperationHandle {
    kind: MaintenanceKind,
    state: HandleState,
}

impl OperationHandle {
    fn done(kind: MaintenanceKind, result: Result<()>) -> Self {
        Self {
            kind,
            state: HandleState::Done(Some(result)),
        }
    }

    fn pending(kind: MaintenanceKind, receiver: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            kind,
            state: HandleState::Pending(receiver),
        }
    }

    /// Operation this handle tracks.
    pub fn kind(&self) -> MaintenanceKind {
        self.kind
    }

    /// Waits for every handle; returns the first error, if any.
    pub async fn all(handles: impl IntoIterator<Item = OperationHandle>) -> Result<()> {
        let results = futures::future::join_all(handles).await;
        results.into_iter().collect()
    }
}

impl Future for OperationHandle {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Done(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            HandleState::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ShuttingDown)),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            HandleState::Done(_) => "done",
            HandleState::Pending(_) => "pending",
        };
        f.debug_struct("OperationHandle")
            .field("kind", &self.kind)
            .field("state", &state)
            .finish()
    }
}

// ============================================================================
// IndexWorkspace
// ============================================================================

#[derive(Debug)]
enum Request {
    MergeSegments,
    Purge(Vec<String>),
    Flush,
    Refresh,
}

impl Request {
    fn kind(&self) -> MaintenanceKind {
        match self {
            Self::MergeSegments => MaintenanceKind::MergeSegments,
            Self::Purge(_) => MaintenanceKind::Purge,
            Self::Flush => MaintenanceKind::Flush,
            Self::Refresh => MaintenanceKind::Refresh,
        }
    }
}

type Envelope = (Request, UnsupportedPolicy, oneshot::Sender<Result<()>>);

struct WorkspaceInner {
    name: String,
    backend: Arc<dyn IndexBackend>,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Maintenance entry point for one physical index.
///
/// Cheap to clone; clones share the queue and worker. Must be created
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct IndexWorkspace {
    inner: Arc<WorkspaceInner>,
}

impl IndexWorkspace {
    /// Creates a workspace and spawns its worker.
    pub fn new(name: impl Into<String>, backend: Arc<dyn IndexBackend>, capacity: usize) -> Self {
        let name = name.into();
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(name.clone(), Arc::clone(&backend), receiver));

        Self {
            inner: Arc::new(WorkspaceInner {
                name,
                backend,
                capacity,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The backend this workspace maintains.
    pub fn backend(&self) -> &Arc<dyn IndexBackend> {
        &self.inner.backend
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner
            .sender
            .lock()
            .map(|s| s.is_none())
            .unwrap_or(true)
    }

    /// Merges index segments.
    pub async fn merge_segments(
        &self,
        submission: SubmissionPolicy,
        unsupported: UnsupportedPolicy,
    ) -> Result<OperationHandle> {
        self.submit(Request::MergeSegments, submission, unsupported)
            .await
    }

    /// Purges documents with the given routing keys (all when empty).
    pub async fn purge(
        &self,
        routing_keys: Vec<String>,
        submission: SubmissionPolicy,
        unsupported: UnsupportedPolicy,
    ) -> Result<OperationHandle> {
        self.submit(Request::Purge(routing_keys), submission, unsupported)
            .await
    }

    /// Persists pending writes.
    pub async fn flush(
        &self,
        submission: SubmissionPolicy,
        unsupported: UnsupportedPolicy,
    ) -> Result<OperationHandle> {
        self.submit(Request::Flush, submission, unsupported).await
    }

    /// Makes persisted writes visible.
    pub async fn refresh(
        &self,
        submission: SubmissionPolicy,
        unsupported: UnsupportedPolicy,
    ) -> Result<OperationHandle> {
        self.submit(Request::Refresh, submission, unsupported)
            .await
    }

    /// Stops accepting requests, lets queued ones finish, and joins the worker.
    pub async fn close(&self) -> Result<()> {
        if let Ok(mut sender) = self.inner.sender.lock() {
            sender.take();
        }
        let worker = self.inner.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            worker.await.map_err(|e| {
                Error::backend(format!("workspace '{}' worker failed: {e}", self.inner.name))
            })?;
        }
        Ok(())
    }

    async fn submit(
        &self,
        request: Request,
        submission: SubmissionPolicy,
        unsupported: UnsupportedPolicy,
    ) -> Result<OperationHandle> {
        let kind = request.kind();
        if !self.inner.backend.capabilities().supports(kind) {
            return Ok(match unsupported {
                UnsupportedPolicy::Ignore => {
                    log::debug!(
                        "Skipping unsupported {kind} on index '{}' (backend '{}')",
                        self.inner.name,
                        self.inner.backend.name()
                    );
                    OperationHandle::done(kind, Ok(()))
                }
                UnsupportedPolicy::Fail => OperationHandle::done(
                    kind,
                    Err(Error::unsupported(kind.name(), self.inner.backend.name())),
                ),
            });
        }

        let sender = self
            .inner
            .sender
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .ok_or(Error::ShuttingDown)?;
        let (reply, receiver) = oneshot::channel();

        match submission {
            SubmissionPolicy::Blocking => sender
                .send((request, unsupported, reply))
                .await
                .map_err(|_| Error::ShuttingDown)?,
            SubmissionPolicy::Offloading => {
                sender.try_send((request, unsupported, reply)).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => Error::Backpressure {
                        capacity: self.inner.capacity,
                    },
                    mpsc::error::TrySendError::Closed(_) => Error::ShuttingDown,
                })?
            }
        }
        Ok(OperationHandle::pending(kind, receiver))
    }
}

impl std::fmt::Debug for IndexWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWorkspace")
            .field("name", &self.inner.name)
            .field("backend", &self.inner.backend.name())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

async fn run_worker(
    name: String,
    backend: Arc<dyn IndexBackend>,
    mut receiver: mpsc::Receiver<Envelope>,
) {
    while let Some((request, unsupported, reply)) = receiver.recv().await {
        let kind = request.kind();
        let mut result = match request {
            Request::MergeSegments => backend.merge_segments().await,
            Request::Purge(routing_keys) => backend.purge(&routing_keys).await,
            Request::Flush => backend.flush().await,
            Request::Refresh => backend.refresh().await,
        };
        // Backends may only discover a missing capability at run time.
        if unsupported == UnsupportedPolicy::Ignore
            && matches!(result, Err(Error::Unsupported { .. }))
        {
            log::debug!("Index '{name}': ignoring unsupported {kind}");
            result = Ok(());
        }
        if let Err(ref e) = result {
            log::warn!("Index '{name}': {kind} failed: {e}");
        }
        // The caller may have dropped its handle.
        let _ = reply.send(result);
    }
    log::debug!("Workspace worker for index '{name}' stopped");
}

// ============================================================================
// Tests
// ============================================================================
