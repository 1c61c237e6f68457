//! Shared test fixture: customers embedding their orders.

use std::sync::Arc;

use indexsync_core::config::WorkspaceConfig;
use indexsync_core::identity::ScalarIdentifierMapping;
use indexsync_core::{IdentifierMappings, IndexDocument, IndexSyncConfig};
use indexsync_fts::{IndexRegistry, InMemoryDocuments, MemoryBackend};
use indexsync_graph::{
    DependencyGraphBuilder, Embedding, ObjectType, ReindexPolicy, ReindexingResolver,
    StaticContainment,
};

use crate::context::IndexingContext;

pub(crate) struct Fixture {
    pub context: IndexingContext,
    pub backend: Arc<MemoryBackend>,
    pub documents: Arc<InMemoryDocuments>,
}

/// `Customer` (root) embeds `Order` through `orders` (SHALLOW on `total`,
/// `status`). Customer 7 owns order 42, customer 8 owns order 43.
pub(crate) fn customers_and_orders(config: IndexSyncConfig) -> Fixture {
    let (graph, _) = DependencyGraphBuilder::new()
        .add_type(ObjectType::root("Customer"))
        .add_type(ObjectType::embedded("Order"))
        .add_embedding(
            Embedding::new("Customer", "orders", "Order")
                .with_policy(ReindexPolicy::Shallow)
                .projecting(["total", "status"]),
        )
        .build()
        .unwrap();

    let mut mappings = IdentifierMappings::new();
    mappings
        .register("Customer", ScalarIdentifierMapping::integer("Customer"))
        .register("Order", ScalarIdentifierMapping::integer("Order"));

    let mut containment = StaticContainment::new();
    containment
        .insert("Customer", 7, "orders", 42)
        .insert("Customer", 8, "orders", 43);

    let resolver =
        ReindexingResolver::new(Arc::new(graph), Arc::new(mappings), Arc::new(containment));

    let backend = Arc::new(MemoryBackend::new("people"));
    let mut registry = IndexRegistry::new(&WorkspaceConfig::default());
    registry
        .add_index("people", backend.clone())
        .unwrap()
        .route("Customer", "people")
        .unwrap();

    let documents = Arc::new(InMemoryDocuments::new());
    for (id, name) in [(7, "Ada"), (8, "Grace")] {
        documents.put(
            "Customer",
            id,
            IndexDocument::builder().field("name", name).build(),
        );
    }

    let context = IndexingContext::new(resolver, registry, documents.clone()).with_config(config);
    Fixture {
        context,
        backend,
        documents,
    }
}
