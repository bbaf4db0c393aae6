//! PageCache Tests
//!
//! Tests verify:
//! - LRU eviction order and promotion on get
//! - Independent copies
//! - Invalidation and clearing
//! - Fills racing an invalidation are dropped
//! - Hit/miss accounting

use std::sync::Arc;
use std::thread;

use foliodb::storage::PageCache;

#[test]
fn test_put_and_get() {
    let cache = PageCache::new(4);
    cache.put(1, b"one");

    assert_eq!(cache.get(1).unwrap().as_ref(), b"one");
    assert!(cache.get(2).is_none());
    assert_eq!(cache.stats(), (1, 1));
}

#[test]
fn test_eviction_after_capacity_plus_one() {
    let cache = PageCache::new(3);
    for id in 0..4u64 {
        cache.put(id, &[id as u8]);
    }

    assert!(cache.get(0).is_none());
    for id in 1..4u64 {
        assert_eq!(cache.get(id).unwrap().as_ref(), &[id as u8]);
    }
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_get_promotes_entry() {
    let cache = PageCache::new(3);
    cache.put(0, b"a");
    cache.put(1, b"b");
    cache.put(2, b"c");

    // 0 becomes most recent; 1 is now least recent
    cache.get(0).unwrap();
    cache.put(3, b"d");

    assert!(cache.contains(0));
    assert!(!cache.contains(1));
    assert!(cache.contains(2));
    assert!(cache.contains(3));
}

#[test]
fn test_put_updates_and_promotes() {
    let cache = PageCache::new(2);
    cache.put(0, b"old");
    cache.put(1, b"b");
    cache.put(0, b"new");
    cache.put(2, b"c");

    assert_eq!(cache.get(0).unwrap().as_ref(), b"new");
    assert!(!cache.contains(1));
}

#[test]
fn test_entries_are_copies() {
    let cache = PageCache::new(2);
    let mut source = vec![1u8, 2, 3];
    cache.put(0, &source);
    source[0] = 99;

    assert_eq!(cache.get(0).unwrap().as_ref(), &[1, 2, 3]);
}

#[test]
fn test_invalidate_and_clear() {
    let cache = PageCache::new(4);
    cache.put(0, b"a");
    cache.put(1, b"b");

    cache.invalidate(0);
    assert!(!cache.contains(0));
    assert!(cache.contains(1));

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn test_put_after_invalidation_is_skipped() {
    let cache = PageCache::new(4);
    cache.put(1, b"old");

    // A reader starts a file read, then a writer replaces page 1
    let epoch = cache.epoch();
    cache.invalidate(1);

    assert!(!cache.put_if_unchanged(1, b"old", epoch));
    assert!(!cache.contains(1));

    let epoch = cache.epoch();
    assert!(cache.put_if_unchanged(1, b"new", epoch));
    assert_eq!(cache.get(1).unwrap().as_ref(), b"new");
}

#[test]
fn test_clear_bumps_epoch() {
    let cache = PageCache::new(4);
    let epoch = cache.epoch();
    cache.clear();
    assert!(!cache.put_if_unchanged(2, b"stale", epoch));
    assert!(cache.is_empty());
}

#[test]
fn test_zero_capacity_holds_one() {
    let cache = PageCache::new(0);
    assert_eq!(cache.capacity(), 1);
    cache.put(0, b"a");
    cache.put(1, b"b");
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(1));
}

#[test]
fn test_concurrent_readers() {
    let cache = Arc::new(PageCache::new(16));
    for id in 0..16u64 {
        cache.put(id, &[id as u8; 8]);
    }

    let mut handles = vec![];
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || {
            for round in 0..100u64 {
                let id = round % 16;
                assert_eq!(cache.get(id).unwrap()[0], id as u8);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.stats().0, 400);
}
