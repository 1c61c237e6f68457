//! Coordination of automatic indexing.
//!
//! Connects the pieces: change events from committed units of work are
//! resolved to affected documents, collected in an indexing plan, and
//! executed against the index workspaces, either in this process or through
//! an event log read by a consumer elsewhere.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  indexsync-coordination                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Coordinator (lifecycle: configure → start → pre_stop →     │
//! │               stop, PhaseHandle per async phase)            │
//! │  IndexingContext (resolver + registry + producer + config)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CoordinationStrategy trait                                 │
//! │  ├── LocalStrategy (sync, or async worker pool)             │
//! │  └── DistributedStrategy (publish + consume with retry)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EventLog trait                                             │
//! │  ├── MemoryEventLog                                         │
//! │  └── FileEventLog (JSON lines + offsets sidecar)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]

pub mod context;
pub mod coordinator;
pub mod distributed;
pub mod event_log;
pub mod local;
pub mod strategy;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod fixtures;

pub use context::IndexingContext;
pub use coordinator::{Coordinator, PhaseHandle};
pub use distributed::DistributedStrategy;
pub use event_log::{EventLog, FileEventLog, LogEntry, MemoryEventLog};
pub use local::{LocalMode, LocalStrategy};
pub use strategy::{CoordinationStrategy, StrategyStats, Submission};
