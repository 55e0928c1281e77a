//! Property tests for revision accounting and delta selection

use exposed_model::{ExposedModel, ModelDocument};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Add(u8, i64),
    Update(u8, i64),
    Remove(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, -50i64..50).prop_map(|(k, v)| Op::Add(k, v)),
        (0u8..6, -50i64..50).prop_map(|(k, v)| Op::Update(k, v)),
        (0u8..6).prop_map(Op::Remove),
    ]
}

fn key(k: u8) -> String {
    format!("k{}", k)
}

proptest! {
    #[test]
    fn revision_equals_committed_mutations(ops in prop::collection::vec(op(), 0..60)) {
        let model = ExposedModel::new();
        let mut committed = 0u64;
        for op in ops {
            let result = match op {
                Op::Add(k, v) => model.add_element(&key(k), v),
                Op::Update(k, v) => model.update_element(&key(k), v),
                Op::Remove(k) => model.remove_element(&key(k)),
            };
            if let Ok(revision) = result {
                committed += 1;
                prop_assert_eq!(revision, committed);
            }
        }
        prop_assert_eq!(model.current_revision(), committed);
    }

    #[test]
    fn delta_carries_exactly_the_newer_elements(
        ops in prop::collection::vec(op(), 1..60),
        cut in 0usize..60,
    ) {
        let model = ExposedModel::new();
        let mut stamps: BTreeMap<String, u64> = BTreeMap::new();
        let mut since = 0;
        for (i, op) in ops.iter().enumerate() {
            if i == cut {
                since = model.current_revision();
            }
            match op {
                Op::Add(k, v) => {
                    if let Ok(rev) = model.add_element(&key(*k), *v) {
                        stamps.insert(key(*k), rev);
                    }
                }
                Op::Update(k, v) => {
                    if let Ok(rev) = model.update_element(&key(*k), *v) {
                        stamps.insert(key(*k), rev);
                    }
                }
                Op::Remove(k) => {
                    if model.remove_element(&key(*k)).is_ok() {
                        stamps.remove(&key(*k));
                    }
                }
            }
        }

        let doc = ModelDocument::from_slice(&model.delta_document(since).unwrap()).unwrap();
        let carried: Vec<&str> = doc.keys().collect();
        let expected: Vec<&str> = stamps
            .iter()
            .filter(|(_, rev)| **rev > since)
            .map(|(k, _)| k.as_str())
            .collect();
        prop_assert_eq!(carried, expected);
        prop_assert_eq!(doc.revision, model.current_revision());
    }

    #[test]
    fn self_apply_preserves_values(values in prop::collection::vec(any::<f64>(), 1..10)) {
        let model = ExposedModel::new();
        for (i, v) in values.iter().enumerate() {
            model.add_element(&format!("f{}", i), *v).unwrap();
        }
        let full = model.full_document().unwrap();
        model.apply_document(&full).unwrap();
        for (i, v) in values.iter().enumerate() {
            let restored = model.get::<f64>(&format!("f{}", i)).unwrap();
            prop_assert!(restored == *v || (restored.is_nan() && v.is_nan()), "{} became {}", v, restored);
        }
    }
}
