//! Property-based tests for reindexing resolution.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use indexsync_core::identity::ScalarIdentifierMapping;
    use indexsync_core::{ChangeEvent, EntityId, IdentifierMappings};
    use proptest::prelude::*;

    use crate::{
        DependencyGraphBuilder, Embedding, ObjectType, ReindexPolicy, ReindexingResolver,
        StaticContainment,
    };

    fn mappings(types: &[&str]) -> Arc<IdentifierMappings> {
        let mut mappings = IdentifierMappings::new();
        for t in types {
            mappings.register(*t, ScalarIdentifierMapping::integer(*t));
        }
        Arc::new(mappings)
    }

    /// Random parent links among `n` categories over a bounded FULL self-edge.
    fn category_resolver(links: &[(i64, i64)], depth: usize) -> ReindexingResolver {
        let (graph, _) = DependencyGraphBuilder::new()
            .with_default_max_depth(depth)
            .add_type(ObjectType::root("Category"))
            .add_embedding(Embedding::new("Category", "parent", "Category"))
            .build()
            .unwrap();
        let mut containment = StaticContainment::new();
        for &(child, parent) in links {
            containment.insert("Category", child, "parent", parent);
        }
        ReindexingResolver::new(Arc::new(graph), mappings(&["Category"]), Arc::new(containment))
    }

    proptest! {
        #[test]
        fn test_full_cycles_terminate_within_bound(
            links in proptest::collection::vec((0i64..12, 0i64..12), 0..40),
            depth in 1usize..5,
            start in 0i64..12,
        ) {
            let resolver = category_resolver(&links, depth);
            let resolved = tokio_test::block_on(
                resolver.resolve(&ChangeEvent::update("Category", start, ["name"])),
            )
            .unwrap();

            // Never more than the 12 categories, and no document is listed twice.
            prop_assert!(resolved.len() <= 12);
            let keys: Vec<_> = resolved.keys().collect();
            let mut deduped = keys.clone();
            deduped.dedup();
            prop_assert_eq!(keys.len(), deduped.len());
            prop_assert!(resolved.contains("Category", &EntityId::Int(start)));
        }

        #[test]
        fn test_none_edges_never_produce_documents(
            order_ids in proptest::collection::vec(0i64..50, 1..10),
            changed in proptest::collection::btree_set("[a-z]{1,6}", 0..4),
        ) {
            let (graph, _) = DependencyGraphBuilder::new()
                .add_type(ObjectType::root("Customer"))
                .add_type(ObjectType::embedded("Order"))
                .add_embedding(
                    Embedding::new("Customer", "orders", "Order").with_policy(ReindexPolicy::None),
                )
                .build()
                .unwrap();
            let mut containment = StaticContainment::new();
            for id in &order_ids {
                containment.insert("Customer", 1, "orders", *id);
            }
            let resolver = ReindexingResolver::new(
                Arc::new(graph),
                mappings(&["Customer", "Order"]),
                Arc::new(containment),
            );

            for id in order_ids {
                let event = ChangeEvent::update("Order", id, changed.iter().cloned());
                let resolved = tokio_test::block_on(resolver.resolve(&event)).unwrap();
                prop_assert!(resolved.is_empty());
            }
        }

        #[test]
        fn test_shallow_resolves_iff_projection_touched(
            changed in proptest::collection::btree_set("[a-f]", 0..4),
            projected in proptest::collection::btree_set("[a-f]", 0..4),
        ) {
            let (graph, _) = DependencyGraphBuilder::new()
                .add_type(ObjectType::root("Customer"))
                .add_type(ObjectType::embedded("Order"))
                .add_type(ObjectType::root("Region"))
                .add_embedding(
                    Embedding::new("Customer", "orders", "Order")
                        .with_policy(ReindexPolicy::Shallow)
                        .projecting(projected.iter().cloned()),
                )
                .add_embedding(Embedding::new("Region", "customers", "Customer"))
                .build()
                .unwrap();
            let mut containment = StaticContainment::new();
            containment
                .insert("Customer", 1, "orders", 42)
                .insert("Region", 9, "customers", 1);
            let resolver = ReindexingResolver::new(
                Arc::new(graph),
                mappings(&["Customer", "Order", "Region"]),
                Arc::new(containment),
            );

            let event = ChangeEvent::update("Order", 42, changed.iter().cloned());
            let resolved = tokio_test::block_on(resolver.resolve(&event)).unwrap();

            let expected = changed.iter().any(|p| projected.contains(p));
            prop_assert_eq!(resolved.contains("Customer", &EntityId::Int(1)), expected);
            // Shallow stops after one hop: the region is never reached.
            prop_assert!(!resolved.contains("Region", &EntityId::Int(9)));
        }
    }
}
