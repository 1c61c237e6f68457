//! Index workspaces and indexing plans for indexsync.
//!
//! This crate owns everything between "these documents are stale" and
//! "the index holds the new versions": per-index workspaces with a
//! serialized maintenance queue, and the per-unit-of-work indexing plan
//! that collapses pending operations and executes them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      indexsync-fts                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IndexingPlan (add / add_or_update / delete, supersede)     │
//! │  └── execute → DocumentProducer → IndexRegistry             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IndexRegistry (root type → index name)                     │
//! │  IndexWorkspace (bounded queue, single maintenance worker)  │
//! │  └── merge_segments / purge / flush / refresh               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IndexBackend trait                                         │
//! │  ├── MemoryBackend (always available)                       │
//! │  └── TantivyBackend (feature: fts-tantivy)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - `fts-tantivy`: enables the Tantivy backend.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use indexsync_core::config::{PlanConfig, WorkspaceConfig};
//! use indexsync_core::{DocumentKey, IndexDocument};
//! use indexsync_fts::{IndexRegistry, IndexingPlan, InMemoryDocuments, MemoryBackend};
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(MemoryBackend::new("people"));
//! let mut registry = IndexRegistry::new(&WorkspaceConfig::default());
//! registry
//!     .add_index("people", backend.clone())
//!     .unwrap()
//!     .route("Customer", "people")
//!     .unwrap();
//!
//! let documents = Arc::new(InMemoryDocuments::new());
//! documents.put("Customer", 7, IndexDocument::builder().field("name", "Ada").build());
//!
//! let mut plan = IndexingPlan::new(PlanConfig::default());
//! plan.add(DocumentKey::new("Customer", 7, "7")).unwrap();
//! let outcome = plan.execute(&registry, documents).await.unwrap();
//! assert!(outcome.is_success());
//! assert_eq!(backend.stats().documents, 1);
//! # registry.close_all().await.unwrap();
//! # });
//! ```

#![forbid(unsafe_code)]

pub mod backend;
pub mod plan;
pub mod producer;
pub mod registry;
pub mod workspace;

#[cfg(feature = "fts-tantivy")]
pub mod tantivy_backend;

#[cfg(test)]
mod proptests;

pub use backend::{
    Capabilities, DocumentAction, DocumentWork, IndexBackend, MaintenanceKind, MemoryBackend,
    MemoryBackendStats,
};
pub use plan::{DocumentFailure, IndexingPlan, PlanOp, PlanOutcome};
pub use producer::{DocumentProducer, InMemoryDocuments};
pub use registry::IndexRegistry;
pub use workspace::{IndexWorkspace, OperationHandle, SubmissionPolicy, UnsupportedPolicy};

#[cfg(feature = "fts-tantivy")]
pub use tantivy_backend::TantivyBackend;
