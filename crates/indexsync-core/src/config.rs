//! Configuration for automatic indexing.
//!
//! Configuration is plain serde data, loaded from TOML. Every field has a
//! default, so an empty file is a valid configuration.
//!
//! ```toml
//! [graph]
//! default_max_depth = 4
//! cycle_policy = "reject"
//!
//! [plan]
//! resurrect_policy = "update"
//! force_refresh = true
//!
//! [coordination]
//! strategy = "distributed"
//! poll_interval_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the dependency graph builder treats cycles of propagating edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Refuse to build a graph whose cycles have no explicit depth bound.
    Reject,
    /// Give unbounded edges on a cycle the graph's default max depth.
    #[default]
    Bound,
}

/// What an indexing plan does when a deleted key is added or updated again
/// within the same unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResurrectPolicy {
    /// Collapse delete-then-add into a single update (the document is
    /// replaced with the new state).
    #[default]
    Update,
    /// Reject the second operation with a plan error.
    Reject,
}

/// Which coordination strategy runs plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Execute each unit of work in the committing task.
    #[default]
    LocalSync,
    /// Queue plans for an in-process worker pool.
    LocalAsync,
    /// Append events to an external log consumed by background workers.
    Distributed,
}

/// Dependency graph settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Depth bound for cyclic edges without their own bound.
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,

    /// Cycle handling.
    #[serde(default)]
    pub cycle_policy: CyclePolicy,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_max_depth: default_max_depth(),
            cycle_policy: CyclePolicy::default(),
        }
    }
}

/// Indexing plan settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Delete-then-add handling.
    #[serde(default)]
    pub resurrect_policy: ResurrectPolicy,

    /// Fail the whole unit of work if any document fails.
    #[serde(default)]
    pub all_or_nothing: bool,

    /// Flush touched indexes after executing a plan.
    #[serde(default)]
    pub force_commit: bool,

    /// Refresh touched indexes after executing a plan.
    #[serde(default)]
    pub force_refresh: bool,

    /// Maximum document operations in flight per plan.
    #[serde(default = "default_execution_concurrency")]
    pub execution_concurrency: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            resurrect_policy: ResurrectPolicy::default(),
            all_or_nothing: false,
            force_commit: false,
            force_refresh: false,
            execution_concurrency: default_execution_concurrency(),
        }
    }
}

/// Workspace maintenance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Bound of each index's maintenance queue.
    #[serde(default = "default_workspace_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_workspace_queue_capacity(),
        }
    }
}

/// Coordination strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Strategy selection.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Worker tasks of the `local_async` strategy.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bound of the `local_async` plan queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delay between polls of an empty event log, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum records consumed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts per batch before the consumer gives up on it.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Base backoff delay between attempts, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Consumer name used to track offsets in the event log.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Run a consumer in this process (distributed strategy only).
    #[serde(default = "default_true")]
    pub consumer_enabled: bool,

    /// Path of the JSON-lines event log; in-memory when unset.
    #[serde(default)]
    pub event_log_path: Option<String>,
}

impl CoordinationConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry base delay as a duration.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            consumer_name: default_consumer_name(),
            consumer_enabled: default_true(),
            event_log_path: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSyncConfig {
    /// Dependency graph settings.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Indexing plan settings.
    #[serde(default)]
    pub plan: PlanConfig,

    /// Workspace settings.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Coordination settings.
    #[serde(default)]
    pub coordination: CoordinationConfig,
}

impl IndexSyncConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io_with_path(e, path))?;
        Self::from_toml_str(&content)
    }

    /// Rejects settings that would stall or deadlock the pipeline.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.graph.default_max_depth, "graph.default_max_depth"),
            (self.plan.execution_concurrency, "plan.execution_concurrency"),
            (self.workspace.queue_capacity, "workspace.queue_capacity"),
            (self.coordination.workers, "coordination.workers"),
            (self.coordination.queue_capacity, "coordination.queue_capacity"),
            (self.coordination.batch_size, "coordination.batch_size"),
            (self.coordination.retry_attempts, "coordination.retry_attempts"),
        ];
        for (value, key) in checks {
            if value == 0 {
                return Err(Error::config(format!("{key} must be greater than zero")));
            }
        }
        if self.coordination.consumer_name.trim().is_empty() {
            return Err(Error::config("coordination.consumer_name must not be empty"));
        }
        Ok(())
    }
}

fn default_max_depth() -> usize {
    8
}

fn default_execution_concurrency() -> usize {
    8
}

fn default_workspace_queue_capacity() -> usize {
    64
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    256
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    128
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_consumer_name() -> String {
    "indexsync".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Tests
// ============================================================================
