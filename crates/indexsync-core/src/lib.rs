//! Core of indexsync: shared types, errors, identifier mappings, and configuration.
//!
//! This crate provides the foundational types used across all indexsync
//! crates. It has no internal indexsync dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias
//! - [`types`]: Change events, identifiers, document keys and bodies
//! - [`identity`]: Identifier mappings between entities and documents
//! - [`lifecycle`]: Lifecycle state tracking for coordination strategies
//! - [`config`]: TOML configuration

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod types;

// Re-export key types at crate root for convenience
pub use config::{CyclePolicy, IndexSyncConfig, ResurrectPolicy, StrategyKind};
pub use error::{Error, Result};
pub use identity::{IdentifierMapping, IdentifierMappings};
pub use lifecycle::{LifecycleHandle, LifecycleState};
pub use types::{
    AffectedDocument, ChangeEvent, ChangeRecord, DirtyProperties, DocumentKey, EntityId,
    IndexDocument, OperationKind, TypeName,
};
