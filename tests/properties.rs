//! Property-based tests for the memory tiers using proptest.
//!
//! - The short-term resident set never grows past its capacity
//! - Without gets, the survivors are exactly the last `capacity` ids added
//! - A get protects an item from the next eviction
//! - Search is read-only and bounded by `k`
//! - Filtered long-term search only returns exact metadata matches
//! - Promotion of a missing id never writes to long-term memory

use std::collections::BTreeSet;

use proptest::prelude::*;
use tiered_memory::{LongTermMemory, MemoryItem, MemoryManager, MetadataFilter, ShortTermMemory};

const DIM: usize = 3;

fn embedding() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0f32, DIM)
}

fn tag() -> impl Strategy<Value = String> {
    prop_oneof![Just("rust".to_string()), Just("python".to_string()), Just("go".to_string())]
}

/// Small id space so overwrites happen often
fn op_id() -> impl Strategy<Value = String> {
    (0u8..12).prop_map(|n| n.to_string())
}

#[derive(Debug, Clone)]
enum StmOp {
    Add(String, Vec<f32>),
    Get(String),
}

fn stm_op() -> impl Strategy<Value = StmOp> {
    prop_oneof![
        3 => (op_id(), embedding()).prop_map(|(id, e)| StmOp::Add(id, e)),
        1 => op_id().prop_map(StmOp::Get),
    ]
}

proptest! {
    #[test]
    fn resident_count_never_exceeds_capacity(
        capacity in 1usize..6,
        ops in prop::collection::vec(stm_op(), 0..60)
    ) {
        let stm = ShortTermMemory::new(capacity).unwrap();

        for op in ops {
            match op {
                StmOp::Add(id, e) => { stm.add(MemoryItem::new(id, "x", e)).unwrap(); }
                StmOp::Get(id) => { stm.get(&id).unwrap(); }
            }
            prop_assert!(stm.len().unwrap() <= capacity);
            prop_assert_eq!(stm.ids_by_recency().unwrap().len(), stm.len().unwrap());
        }
    }

    #[test]
    fn survivors_are_the_last_added(capacity in 1usize..8, extra in 1usize..10) {
        let stm = ShortTermMemory::new(capacity).unwrap();
        let n = capacity + extra;

        for i in 1..=n {
            stm.add(MemoryItem::new(i.to_string(), "x", vec![i as f32, 0.0, 1.0])).unwrap();
        }

        let expected: BTreeSet<String> = ((n - capacity + 1)..=n).map(|i| i.to_string()).collect();
        let resident: BTreeSet<String> = stm.ids_by_recency().unwrap().into_iter().collect();
        prop_assert_eq!(resident, expected);
    }

    #[test]
    fn get_protects_from_next_eviction(capacity in 2usize..8, pick in 0usize..8) {
        let stm = ShortTermMemory::new(capacity).unwrap();
        for i in 0..capacity {
            stm.add(MemoryItem::new(i.to_string(), "x", vec![1.0, i as f32, 0.0])).unwrap();
        }

        let protected = (pick % capacity).to_string();
        stm.get(&protected).unwrap();
        let evicted = stm.add(MemoryItem::new("new", "x", vec![0.0, 0.0, 1.0])).unwrap();

        prop_assert!(stm.contains(&protected).unwrap());
        let expected_victim = if protected == "0" { "1" } else { "0" };
        prop_assert_eq!(evicted.as_deref(), Some(expected_victim));
    }

    #[test]
    fn search_is_read_only_and_bounded(
        items in prop::collection::vec((op_id(), embedding()), 1..20),
        query in embedding(),
        k in 0usize..10
    ) {
        let stm = ShortTermMemory::new(5).unwrap();
        for (id, e) in items {
            stm.add(MemoryItem::new(id, "x", e)).unwrap();
        }

        let before = stm.ids_by_recency().unwrap();
        let hits = stm.search(&query, k).unwrap();
        let after = stm.ids_by_recency().unwrap();

        prop_assert_eq!(&before, &after);
        prop_assert!(hits.len() <= k);
        prop_assert_eq!(hits.len(), k.min(before.len()));
        for hit in &hits {
            prop_assert!(before.contains(&hit.item.id));
        }
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn filtered_search_only_returns_matches(
        items in prop::collection::vec((op_id(), embedding(), tag()), 0..30),
        query in embedding(),
        wanted in tag()
    ) {
        let ltm = LongTermMemory::new(DIM).unwrap();
        for (id, e, t) in items {
            ltm.add(MemoryItem::new(id, "x", e).with_tag("tag", t)).unwrap();
        }

        let filter: MetadataFilter = [("tag".to_string(), wanted.clone())].into_iter().collect();
        let hits = ltm.search(&query, 50, Some(&filter)).unwrap();

        for hit in &hits {
            prop_assert_eq!(hit.item.metadata.get("tag"), Some(&wanted));
        }
        let matching = ltm
            .items()
            .unwrap()
            .into_iter()
            .filter(|item| item.metadata.get("tag") == Some(&wanted))
            .count();
        prop_assert_eq!(hits.len(), matching);
    }

    #[test]
    fn add_get_delete_round_trip(id in op_id(), e in embedding(), content in ".{0,40}") {
        let ltm = LongTermMemory::new(DIM).unwrap();
        ltm.add(MemoryItem::new(id.clone(), content.clone(), e.clone())).unwrap();

        let item = ltm.get(&id).unwrap().unwrap();
        prop_assert_eq!(&item.content, &content);
        prop_assert_eq!(&item.embedding, &e);

        prop_assert!(ltm.delete(&id).unwrap());
        prop_assert!(ltm.get(&id).unwrap().is_none());
    }

    #[test]
    fn promoting_missing_id_never_writes(
        resident in prop::collection::vec(op_id(), 0..10),
        target in op_id()
    ) {
        let manager = MemoryManager::new(
            ShortTermMemory::with_dimensionality(3, DIM).unwrap(),
            LongTermMemory::new(DIM).unwrap(),
        );
        for id in resident {
            manager.add(MemoryItem::new(id, "x", vec![1.0, 0.0, 0.0])).unwrap();
        }

        let was_resident = manager.stm().contains(&target).unwrap();
        let promoted = manager.promote(&target, vec![0.0, 1.0, 0.0]).unwrap();

        prop_assert_eq!(promoted, was_resident);
        prop_assert_eq!(manager.get_from_ltm(&target).unwrap().is_some(), was_resident);
    }
}
