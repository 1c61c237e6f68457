//! Property-based tests for core types.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::types::{ChangeEvent, ChangeRecord, EntityId, OperationKind};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_entity_id_json_roundtrip(value in any::<i64>()) {
            let id = EntityId::Int(value);
            let json = serde_json::to_string(&id).unwrap();
            let parsed: EntityId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn test_update_touches_iff_intersecting(
            changed in proptest::collection::btree_set("[a-e]", 0..4),
            projected in proptest::collection::vec("[a-e]", 0..4),
        ) {
            let event = ChangeEvent::update("Order", 1, changed.iter().cloned());
            let expected = projected.iter().any(|p| changed.contains(p));
            prop_assert_eq!(event.dirty_properties().touches_any(&projected), expected);
        }

        #[test]
        fn test_record_rebuilds_event(
            changed in proptest::collection::btree_set("[a-z]{1,6}", 0..5),
            timestamp in any::<u64>(),
        ) {
            let event = ChangeEvent::new("Order", 9, OperationKind::Update, changed);
            let record = ChangeRecord::from_event(&event, None, timestamp);
            prop_assert_eq!(record.to_event(), event);
        }
    }
}
