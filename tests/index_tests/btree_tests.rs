//! BTreeIndex Tests
//!
//! Tests verify:
//! - Exact, range and sorted lookups
//! - Duplicate keys share a slot
//! - Deletion keeps the tree balanced and ordered
//! - Concurrent access through the internal lock

use std::sync::Arc;
use std::thread;

use foliodb::index::{BTreeIndex, FloatKey};

// =============================================================================
// Helper Functions
// =============================================================================

fn tree_with(order: usize, keys: impl IntoIterator<Item = i64>) -> BTreeIndex<i64> {
    let tree = BTreeIndex::new(order);
    for key in keys {
        tree.insert(key, format!("r{}", key));
    }
    tree
}

fn ids(keys: impl IntoIterator<Item = i64>) -> Vec<String> {
    keys.into_iter().map(|k| format!("r{}", k)).collect()
}

/// Deterministic pseudo-random sequence (LCG)
fn sequence(seed: u64, len: usize, modulo: u64) -> Vec<i64> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) % modulo) as i64
        })
        .collect()
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_empty_tree() {
    let tree = BTreeIndex::<i64>::new(8);
    assert!(tree.is_empty());
    assert!(tree.find(&1).is_empty());
    assert!(tree.get_all_sorted().is_empty());
    assert!(!tree.remove(&1));
    assert_eq!(tree.stats().height, 0);
    tree.validate().unwrap();
}

#[test]
fn test_find_exact() {
    let tree = tree_with(4, 0..50);
    assert_eq!(tree.find(&17), vec!["r17"]);
    assert!(tree.find(&50).is_empty());
    assert!(tree.find(&-1).is_empty());
}

#[test]
fn test_duplicates_share_one_key() {
    let tree = BTreeIndex::<i64>::new(4);
    tree.insert(30, "alice");
    tree.insert(30, "bob");
    tree.insert(30, "alice");
    tree.insert(25, "carol");

    assert_eq!(tree.len(), 2);
    assert_eq!(tree.find(&30), vec!["alice", "bob"]);
    assert_eq!(tree.stats().record_id_count, 3);
    assert_eq!(tree.get_all_sorted(), vec!["carol", "alice", "bob"]);
}

#[test]
fn test_sorted_order_after_shuffled_inserts() {
    let tree = BTreeIndex::<i64>::new(6);
    for key in sequence(7, 500, 1000) {
        tree.insert(key, format!("r{}", key));
    }
    tree.validate().unwrap();

    let keys = tree.keys();
    let mut expected = keys.clone();
    expected.sort();
    expected.dedup();
    assert_eq!(keys, expected);
}

#[test]
fn test_text_and_float_keys() {
    let names = BTreeIndex::<String>::new(4);
    for name in ["mallory", "alice", "trent", "bob"] {
        names.insert(name.to_string(), name);
    }
    assert_eq!(names.get_all_sorted(), vec!["alice", "bob", "mallory", "trent"]);

    let scores = BTreeIndex::<FloatKey>::new(4);
    scores.insert(FloatKey(2.5), "b");
    scores.insert(FloatKey(-1.0), "a");
    scores.insert(FloatKey(10.0), "c");
    assert_eq!(
        scores.find_range(&FloatKey(0.0), &FloatKey(10.0)),
        vec!["b", "c"]
    );
}

// =============================================================================
// Range Tests
// =============================================================================

#[test]
fn test_range_is_inclusive() {
    let tree = tree_with(4, 0..100);
    assert_eq!(tree.find_range(&10, &15), ids(10..=15));
    assert_eq!(tree.find_range(&42, &42), ids([42]));
    assert!(tree.find_range(&15, &10).is_empty());
    assert_eq!(tree.find_range(&-5, &2), ids(0..=2));
}

#[test]
fn test_greater_and_less_than_are_strict() {
    let tree = tree_with(4, 0..20);
    assert_eq!(tree.find_greater_than(&16), ids(17..20));
    assert_eq!(tree.find_less_than(&3), ids(0..3));
    assert!(tree.find_greater_than(&19).is_empty());
    assert!(tree.find_less_than(&0).is_empty());
}

#[test]
fn test_range_partitions_all_keys() {
    let tree = tree_with(8, sequence(11, 300, 500));
    let pivot = 250;

    let mut combined = tree.find_less_than(&pivot);
    combined.extend(tree.find(&pivot));
    combined.extend(tree.find_greater_than(&pivot));
    assert_eq!(combined, tree.get_all_sorted());
}

#[test]
fn test_point_range_equals_find() {
    let tree = tree_with(4, sequence(5, 200, 100));
    tree.insert(42, "extra");
    for key in 0..100 {
        assert_eq!(tree.find_range(&key, &key), tree.find(&key));
    }
}

#[test]
fn test_range_covers_open_intersection() {
    let tree = tree_with(6, sequence(9, 400, 250));
    for (a, b) in [(10, 90), (0, 249), (120, 121), (200, 60)] {
        let range = tree.find_range(&a, &b);
        let above = tree.find_greater_than(&a);
        let below = tree.find_less_than(&b);
        for id in above.iter().filter(|id| below.contains(*id)) {
            assert!(range.contains(id), "{} missing from [{}, {}]", id, a, b);
        }
    }
}

#[test]
fn test_range_after_removing_multiples_of_three() {
    let tree = tree_with(4, 0..200);
    for key in (0..200).filter(|k| k % 3 == 0) {
        assert!(tree.remove(&key));
    }
    tree.validate().unwrap();

    let found = tree.find_range(&10, &30);
    assert_eq!(found.len(), 14);
    assert_eq!(found, ids((10..=30).filter(|k| k % 3 != 0)));
}

// =============================================================================
// Deletion Tests
// =============================================================================

#[test]
fn test_remove_most_keys_with_default_order() {
    let tree = tree_with(32, 0..100);
    for key in 0..95 {
        assert!(tree.remove(&key));
    }
    tree.validate().unwrap();

    assert_eq!(tree.get_all_sorted(), ids(95..100));
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.stats().height, 1);
}

#[test]
fn test_remove_leaves_other_keys() {
    let tree = tree_with(4, 0..64);
    for removed in (0..64).step_by(5) {
        assert!(tree.remove(&removed));
        assert!(tree.find(&removed).is_empty());
        assert_eq!(tree.find(&(removed + 1)), ids([removed + 1]));
    }
    tree.validate().unwrap();
}

#[test]
fn test_remove_missing_key() {
    let tree = tree_with(4, 0..10);
    assert!(!tree.remove(&99));
    assert_eq!(tree.len(), 10);
}

#[test]
fn test_remove_id_keeps_key_until_empty() {
    let tree = BTreeIndex::<i64>::new(4);
    tree.insert(1, "a");
    tree.insert(1, "b");

    assert!(tree.remove_id(&1, "a"));
    assert_eq!(tree.find(&1), vec!["b"]);
    assert!(!tree.remove_id(&1, "a"));

    assert!(tree.remove_id(&1, "b"));
    assert!(tree.is_empty());
    assert!(!tree.remove_id(&1, "b"));
}

#[test]
fn test_mixed_operations_keep_invariants() {
    let tree = BTreeIndex::<i64>::new(4);
    let mut model = std::collections::BTreeSet::new();

    for (step, key) in sequence(3, 2000, 300).into_iter().enumerate() {
        if step % 3 == 2 {
            assert_eq!(tree.remove(&key), model.remove(&key));
        } else {
            tree.insert(key, format!("r{}", key));
            model.insert(key);
        }
        if step % 50 == 0 {
            tree.validate().unwrap();
        }
    }

    tree.validate().unwrap();
    assert_eq!(tree.keys(), model.into_iter().collect::<Vec<_>>());
}

#[test]
fn test_clear() {
    let tree = tree_with(4, 0..100);
    tree.clear();
    assert!(tree.is_empty());
    assert_eq!(tree.stats().node_count, 0);

    tree.insert(5, "r5");
    assert_eq!(tree.find(&5), vec!["r5"]);
}

// =============================================================================
// Stats Tests
// =============================================================================

#[test]
fn test_stats() {
    let tree = tree_with(4, 0..10);
    tree.insert(3, "extra");

    let stats = tree.stats();
    assert_eq!(stats.key_count, 10);
    assert_eq!(stats.record_id_count, 11);
    assert_eq!(stats.order, 4);
    assert!(stats.height >= 2);
    assert!(stats.node_count > 1);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_inserts() {
    let tree = Arc::new(BTreeIndex::<i64>::new(8));
    let mut handles = vec![];

    for t in 0..4i64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..250 {
                let key = t * 250 + i;
                tree.insert(key, format!("r{}", key));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.len(), 1000);
    tree.validate().unwrap();
    assert_eq!(tree.get_all_sorted(), ids(0..1000));
}
