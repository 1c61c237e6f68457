//! Property-based tests for operation superseding in indexing plans.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use indexsync_core::DocumentKey;
    use indexsync_core::config::PlanConfig;
    use proptest::prelude::*;

    use crate::{IndexingPlan, PlanOp};

    fn op_strategy() -> impl Strategy<Value = PlanOp> {
        prop_oneof![
            Just(PlanOp::Add),
            Just(PlanOp::Update),
            Just(PlanOp::Delete),
        ]
    }

    fn key(id: i64) -> DocumentKey {
        DocumentKey::new("Customer", id, id.to_string())
    }

    proptest! {
        #[test]
        fn last_operation_decides_outcome(ops in prop::collection::vec(op_strategy(), 1..20)) {
            let mut plan = IndexingPlan::new(PlanConfig::default());
            for op in &ops {
                plan.push(key(1), *op).unwrap();
            }
            let net = plan.operation(&key(1));
            match ops.last().unwrap() {
                PlanOp::Delete => prop_assert!(matches!(net, None | Some(PlanOp::Delete))),
                _ => prop_assert!(matches!(net, Some(PlanOp::Add | PlanOp::Update))),
            }
        }

        #[test]
        fn delete_follows_only_pending_add_with_nothing(
            ops in prop::collection::vec(op_strategy(), 1..20)
        ) {
            let mut plan = IndexingPlan::new(PlanConfig::default());
            let mut before_delete = None;
            for op in &ops {
                if *op == PlanOp::Delete {
                    before_delete = plan.operation(&key(1));
                }
                plan.push(key(1), *op).unwrap();
            }
            if *ops.last().unwrap() == PlanOp::Delete {
                let expect_none = before_delete == Some(PlanOp::Add);
                prop_assert_eq!(plan.operation(&key(1)).is_none(), expect_none);
            }
        }

        #[test]
        fn at_most_one_entry_per_document(
            ops in prop::collection::vec((0i64..5, op_strategy()), 0..40)
        ) {
            let mut plan = IndexingPlan::new(PlanConfig::default());
            for (id, op) in &ops {
                plan.push(key(*id), *op).unwrap();
            }
            let distinct: HashSet<i64> = ops.iter().map(|(id, _)| *id).collect();
            prop_assert!(plan.len() <= distinct.len());
            prop_assert_eq!(plan.iter().count(), plan.len());
        }
    }
}
