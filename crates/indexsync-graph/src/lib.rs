//! Reindexing dependency graph for indexsync.
//!
//! This crate answers one question: when an object changes, which index
//! documents are stale?
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    indexsync-graph                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ObjectType / Embedding / ReindexPolicy (declarations)      │
//! │  DependencyGraphBuilder (validation, cycle bounding)        │
//! │  DependencyGraph (immutable petgraph arena)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ReindexingResolver (reverse BFS over (type, id) pairs)     │
//! │  ├── ContainingEntityLookup (who embeds this instance?)     │
//! │  └── RoutingKeyProvider (where does the document live?)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use indexsync_core::identity::ScalarIdentifierMapping;
//! use indexsync_core::{ChangeEvent, EntityId, IdentifierMappings};
//! use indexsync_graph::{
//!     DependencyGraphBuilder, Embedding, ObjectType, ReindexPolicy, ReindexingResolver,
//!     StaticContainment,
//! };
//!
//! # tokio_test::block_on(async {
//! let (graph, _) = DependencyGraphBuilder::new()
//!     .add_type(ObjectType::root("Customer"))
//!     .add_type(ObjectType::embedded("Order"))
//!     .add_embedding(
//!         Embedding::new("Customer", "orders", "Order")
//!             .with_policy(ReindexPolicy::Shallow)
//!             .projecting(["total", "status"]),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut mappings = IdentifierMappings::new();
//! mappings
//!     .register("Customer", ScalarIdentifierMapping::integer("Customer"))
//!     .register("Order", ScalarIdentifierMapping::integer("Order"));
//!
//! let mut containment = StaticContainment::new();
//! containment.insert("Customer", 7, "orders", 42);
//!
//! let resolver =
//!     ReindexingResolver::new(Arc::new(graph), Arc::new(mappings), Arc::new(containment));
//! let affected = resolver
//!     .resolve(&ChangeEvent::update("Order", 42, ["total"]))
//!     .await
//!     .unwrap();
//! assert!(affected.contains("Customer", &EntityId::Int(7)));
//! # });
//! ```

#![forbid(unsafe_code)]

pub mod builder;
pub mod resolver;
pub mod types;

#[cfg(test)]
mod proptests;

pub use builder::{BuildStats, DependencyGraphBuilder, GraphDefinition};
pub use resolver::{
    ContainingEntityLookup, DocumentTrigger, ReindexingResolver, ResolvedDocuments,
    RoutingKeyProvider, StaticContainment,
};
pub use types::{DependencyGraph, Embedding, ObjectType, ReindexPolicy};
