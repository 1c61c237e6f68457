//! Common test utilities and harness for coordination integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use indexsync_coordination::{CoordinationStrategy, Coordinator, IndexingContext};
use indexsync_core::identity::ScalarIdentifierMapping;
use indexsync_core::{
    DocumentKey, EntityId, IdentifierMappings, IndexDocument, IndexSyncConfig, TypeName,
};
use indexsync_fts::{IndexRegistry, InMemoryDocuments, MemoryBackend};
use indexsync_graph::{
    DependencyGraphBuilder, Embedding, ObjectType, ReindexPolicy, ReindexingResolver,
    RoutingKeyProvider, StaticContainment,
};

/// Routes even customer ids to `eu`, odd ones to `us`.
pub struct RegionRouting;

impl RoutingKeyProvider for RegionRouting {
    fn routing_key(&self, _type_name: &TypeName, id: &EntityId) -> Option<String> {
        id.as_int()
            .map(|n| if n % 2 == 0 { "eu" } else { "us" }.to_string())
    }
}

/// Test harness for integration tests.
///
/// The domain:
///
/// - `Customer` (root) embeds `Order` through `orders` (SHALLOW on `total`
///   and `status`), `Address` through `address` (FULL) and `AuditEntry`
///   through `audit` (NONE).
/// - Customer 7 owns order 42, address 100 and audit entry 500.
/// - Customer 8 owns order 43 and address 101.
/// - Customers 7, 8 and 9 exist in the document source.
pub struct TestHarness {
    /// Context handed to coordinators.
    pub context: IndexingContext,
    /// The `people` index.
    pub backend: Arc<MemoryBackend>,
    /// Current state of the root entities.
    pub documents: Arc<InMemoryDocuments>,
}

impl TestHarness {
    /// Creates a harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(IndexSyncConfig::default())
    }

    /// Creates a harness with a custom configuration.
    pub fn with_config(config: IndexSyncConfig) -> Self {
        Self::with_backend(config, MemoryBackend::new("people"))
    }

    /// Creates a harness indexing into a custom backend.
    pub fn with_backend(config: IndexSyncConfig, backend: MemoryBackend) -> Self {
        let (graph, _) = DependencyGraphBuilder::new()
            .add_type(ObjectType::root("Customer"))
            .add_type(ObjectType::embedded("Order"))
            .add_type(ObjectType::embedded("Address"))
            .add_type(ObjectType::embedded("AuditEntry"))
            .add_embedding(
                Embedding::new("Customer", "orders", "Order")
                    .with_policy(ReindexPolicy::Shallow)
                    .projecting(["total", "status"]),
            )
            .add_embedding(Embedding::new("Customer", "address", "Address"))
            .add_embedding(
                Embedding::new("Customer", "audit", "AuditEntry").with_policy(ReindexPolicy::None),
            )
            .build()
            .unwrap();

        let mut mappings = IdentifierMappings::new();
        for name in ["Customer", "Order", "Address", "AuditEntry"] {
            mappings.register(name, ScalarIdentifierMapping::integer(name));
        }

        let mut containment = StaticContainment::new();
        containment
            .insert("Customer", 7, "orders", 42)
            .insert("Customer", 7, "address", 100)
            .insert("Customer", 7, "audit", 500)
            .insert("Customer", 8, "orders", 43)
            .insert("Customer", 8, "address", 101);

        let resolver =
            ReindexingResolver::new(Arc::new(graph), Arc::new(mappings), Arc::new(containment))
                .with_routing(Arc::new(RegionRouting));

        let backend = Arc::new(backend);
        let mut registry = IndexRegistry::new(&config.workspace);
        registry
            .add_index("people", backend.clone())
            .unwrap()
            .route("Customer", "people")
            .unwrap();

        let documents = Arc::new(InMemoryDocuments::new());
        for (id, name) in [(7, "Ada"), (8, "Grace"), (9, "Barbara")] {
            documents.put("Customer", id, customer(name));
        }

        let context =
            IndexingContext::new(resolver, registry, documents.clone()).with_config(config);
        Self {
            context,
            backend,
            documents,
        }
    }

    /// A configured and running coordinator around `strategy`.
    pub async fn started(&self, strategy: Arc<dyn CoordinationStrategy>) -> Coordinator {
        let coordinator = Coordinator::new(strategy);
        coordinator
            .configure_automatic_indexing(self.context.clone())
            .unwrap();
        coordinator.start().unwrap().await.unwrap();
        coordinator
            .wait_running(Duration::from_secs(1))
            .await
            .unwrap();
        coordinator
    }

    /// Drains and stops a coordinator.
    pub async fn shutdown(&self, coordinator: &Coordinator) {
        coordinator.pre_stop().unwrap().await.unwrap();
        coordinator.stop().unwrap();
    }

    /// Document key of a customer, as the resolver builds it.
    pub fn customer_key(&self, id: i64) -> DocumentKey {
        self.context
            .resolver()
            .document_key(&"Customer".into(), &EntityId::Int(id))
            .unwrap()
    }

    /// Stored `name` of a customer document.
    pub async fn indexed_name(&self, id: i64) -> Option<String> {
        use indexsync_fts::IndexBackend;

        self.backend
            .get(&self.customer_key(id))
            .await
            .unwrap()
            .and_then(|doc| doc.get("name").and_then(|v| v.as_str()).map(str::to_string))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A customer document.
pub fn customer(name: &str) -> IndexDocument {
    IndexDocument::builder().field("name", name).build()
}
