//! Indexing plans: the pending document operations of one unit of work.
//!
//! A plan keeps at most one operation per [`DocumentKey`]. Each new call
//! combines with the pending operation for the key:
//!
//! | pending | `add` | `add_or_update` | `delete` |
//! |---------|-------|-----------------|----------|
//! | none | add | update | delete |
//! | add | add | update | *(none)* |
//! | update | update | update | delete |
//! | delete | per [`ResurrectPolicy`] | per [`ResurrectPolicy`] | delete |
//!
//! Execution builds document bodies through a [`DocumentProducer`], applies
//! the writes through the [`IndexRegistry`] with bounded concurrency, and
//! reports per-document failures. Plans never retry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indexsync_core::config::PlanConfig;
use indexsync_core::{DocumentKey, Error, OperationKind, ResurrectPolicy, Result};
use serde::{Deserialize, Serialize};

use crate::backend::{DocumentAction, DocumentWork};
use crate::producer::DocumentProducer;
use crate::registry::IndexRegistry;
use crate::workspace::{IndexWorkspace, OperationHandle, SubmissionPolicy, UnsupportedPolicy};

// ============================================================================
// Plan operations
// ============================================================================

/// Net operation of a key in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOp {
    /// Index a document that did not exist.
    Add,
    /// Rebuild a document.
    Update,
    /// Remove a document.
    Delete,
}

impl PlanOp {
    /// Returns the operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for PlanOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<OperationKind> for PlanOp {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Insert => Self::Add,
            OperationKind::Update => Self::Update,
            OperationKind::Delete => Self::Delete,
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// A document operation that did not complete.
#[derive(Debug)]
pub struct DocumentFailure {
    /// Document.
    pub key: DocumentKey,
    /// Planned operation.
    pub op: PlanOp,
    /// Cause.
    pub error: Error,
}

/// Result of executing a plan.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    /// Documents written or deleted.
    pub succeeded: Vec<DocumentKey>,
    /// Documents that failed, with their cause.
    pub failed: Vec<DocumentFailure>,
}

impl PlanOutcome {
    /// Returns `true` if every operation succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of operations attempted.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns `true` if any failure may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.failed.iter().any(|f| f.error.is_retryable())
    }

    /// Converts failures into a single plan error.
    pub fn into_result(self) -> Result<Vec<DocumentKey>> {
        match self.failed.first() {
            None => Ok(self.succeeded),
            Some(first) => Err(Error::plan(format!(
                "{} of {} document operations failed; first: {} {}: {}",
                self.failed.len(),
                self.succeeded.len() + self.failed.len(),
                first.op,
                first.key,
                first.error
            ))),
        }
    }
}

// ============================================================================
// IndexingPlan
// ============================================================================

/// Pending document operations of one unit of work.
///
/// Not shared between concurrent callers: build one plan per unit of work.
///
/// ```rust
/// use indexsync_core::DocumentKey;
/// use indexsync_core::config::PlanConfig;
/// use indexsync_fts::{IndexingPlan, PlanOp};
///
/// let key = DocumentKey::new("Customer", 7, "7");
/// let mut plan = IndexingPlan::new(PlanConfig::default());
/// plan.add(key.clone()).unwrap();
/// plan.add_or_update(key.clone()).unwrap();
/// plan.delete(key.clone()).unwrap();
/// assert_eq!(plan.operation(&key), Some(PlanOp::Delete));
/// ```
#[derive(Debug, Clone)]
pub struct IndexingPlan {
    entries: BTreeMap<DocumentKey, PlanOp>,
    config: PlanConfig,
    version: u64,
}

impl IndexingPlan {
    /// Creates an empty plan versioned with the current time in microseconds.
    pub fn new(config: PlanConfig) -> Self {
        let now = chrono::Utc::now().timestamp_micros();
        Self {
            entries: BTreeMap::new(),
            config,
            version: u64::try_from(now).unwrap_or_default(),
        }
    }

    /// Sets the version every write of this plan carries.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Version of this plan's writes.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Settings of this plan.
    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    /// Records a new document.
    pub fn add(&mut self, key: DocumentKey) -> Result<()> {
        self.push(key, PlanOp::Add)
    }

    /// Records a document to rebuild.
    pub fn add_or_update(&mut self, key: DocumentKey) -> Result<()> {
        self.push(key, PlanOp::Update)
    }

    /// Records a document to remove.
    pub fn delete(&mut self, key: DocumentKey) -> Result<()> {
        self.push(key, PlanOp::Delete)
    }

    /// Records an operation, combining it with the pending one.
    pub fn push(&mut self, key: DocumentKey, op: PlanOp) -> Result<()> {
        let pending = self.entries.get(&key).copied();
        let next = match (pending, op) {
            (None, op) => Some(op),
            (Some(PlanOp::Add), PlanOp::Add) => Some(PlanOp::Add),
            (Some(PlanOp::Add), PlanOp::Delete) => None,
            (Some(PlanOp::Add | PlanOp::Update), PlanOp::Add | PlanOp::Update) => {
                Some(PlanOp::Update)
            }
            (Some(PlanOp::Update), PlanOp::Delete) => Some(PlanOp::Delete),
            (Some(PlanOp::Delete), PlanOp::Delete) => Some(PlanOp::Delete),
            (Some(PlanOp::Delete), PlanOp::Add | PlanOp::Update) => {
                match self.config.resurrect_policy {
                    ResurrectPolicy::Update => Some(PlanOp::Update),
                    ResurrectPolicy::Reject => {
                        return Err(Error::plan(format!(
                            "{key} was deleted earlier in this unit of work; cannot {op} it again"
                        )));
                    }
                }
            }
        };

        match next {
            Some(op) => {
                self.entries.insert(key, op);
            }
            None => {
                self.entries.remove(&key);
            }
        }
        Ok(())
    }

    /// Net operation pending for a key.
    pub fn operation(&self, key: &DocumentKey) -> Option<PlanOp> {
        self.entries.get(key).copied()
    }

    /// Pending operations in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DocumentKey, PlanOp)> {
        self.entries.iter().map(|(k, op)| (k, *op))
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Executes the plan and waits for the writes (and, if configured, the
    /// flush and refresh of every touched index) to complete.
    ///
    /// Per-document failures are reported in the outcome. With
    /// `all_or_nothing`, nothing is written if any document fails to build,
    /// and any write failure fails the whole call. Configuration errors
    /// (an unrouted type, for instance) always fail the call before any
    /// write.
    pub async fn execute(
        self,
        indexes: &IndexRegistry,
        producer: Arc<dyn DocumentProducer>,
    ) -> Result<PlanOutcome> {
        let mut outcome = PlanOutcome::default();
        if self.entries.is_empty() {
            return Ok(outcome);
        }

        let mut targets = Vec::with_capacity(self.entries.len());
        for (key, op) in self.entries {
            let workspace = indexes.workspace_for_type(&key.type_name)?.clone();
            targets.push((key, op, workspace));
        }
        let concurrency = self.config.execution_concurrency.max(1);
        let version = self.version;

        // Build document bodies.
        let built: Vec<(DocumentKey, PlanOp, IndexWorkspace, Result<DocumentAction>)> =
            stream::iter(targets)
                .map(|(key, op, workspace)| {
                    let producer = Arc::clone(&producer);
                    async move {
                        let action = build_action(producer.as_ref(), &key, op).await;
                        (key, op, workspace, action)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut ready = Vec::with_capacity(built.len());
        for (key, op, workspace, action) in built {
            match action {
                Ok(action) => ready.push((key, op, workspace, action)),
                Err(error) if error.is_configuration() => return Err(error),
                Err(error) => outcome.failed.push(DocumentFailure { key, op, error }),
            }
        }
        if self.config.all_or_nothing && !outcome.failed.is_empty() {
            return outcome.into_result().map(|_| PlanOutcome::default());
        }

        // Apply writes.
        let touched: BTreeSet<String> = ready
            .iter()
            .map(|(_, _, workspace, _)| workspace.name().to_string())
            .collect();
        let applied: Vec<(DocumentKey, PlanOp, Result<()>)> = stream::iter(ready)
            .map(|(key, op, workspace, action)| async move {
                let work = DocumentWork {
                    key: key.clone(),
                    action,
                    version,
                };
                let result = workspace.backend().apply(work).await;
                (key, op, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (key, op, result) in applied {
            match result {
                Ok(()) => outcome.succeeded.push(key),
                Err(error) => {
                    log::warn!("Indexing {op} of {key} failed: {error}");
                    outcome.failed.push(DocumentFailure { key, op, error });
                }
            }
        }
        outcome.succeeded.sort();

        synchronize(indexes, &touched, &self.config).await?;

        log::debug!(
            "Executed indexing plan v{version}: {} succeeded, {} failed, {} indexes",
            outcome.succeeded.len(),
            outcome.failed.len(),
            touched.len()
        );

        if self.config.all_or_nothing && !outcome.is_success() {
            return outcome.into_result().map(|_| PlanOutcome::default());
        }
        Ok(outcome)
    }
}

async fn build_action(
    producer: &dyn DocumentProducer,
    key: &DocumentKey,
    op: PlanOp,
) -> Result<DocumentAction> {
    if op == PlanOp::Delete {
        return Ok(DocumentAction::Delete);
    }
    match producer.produce(key).await? {
        Some(document) => Ok(DocumentAction::Upsert(document)),
        None => {
            log::debug!("{key} no longer exists; its {op} becomes a delete");
            Ok(DocumentAction::Delete)
        }
    }
}

/// Flushes and refreshes touched indexes as configured. Backends without
/// the capability are skipped.
async fn synchronize(
    indexes: &IndexRegistry,
    touched: &BTreeSet<String>,
    config: &PlanConfig,
) -> Result<()> {
    if !config.force_commit && !config.force_refresh {
        return Ok(());
    }
    let mut handles: Vec<OperationHandle> = Vec::new();
    for name in touched {
        let workspace = indexes.workspace(name)?;
        if config.force_commit {
            handles.push(
                workspace
                    .flush(SubmissionPolicy::Blocking, UnsupportedPolicy::Ignore)
                    .await?,
            );
        }
        if config.force_refresh {
            handles.push(
                workspace
                    .refresh(SubmissionPolicy::Blocking, UnsupportedPolicy::Ignore)
                    .await?,
            );
        }
    }
    OperationHandle::all(handles).await
}

// ============================================================================
// Tests
// ============================================================================
