//! IndexManager Tests
//!
//! Tests verify:
//! - Index registration and key type conflicts
//! - Per-record fan-out to primary and secondary indexes
//! - Rebuild from data pages
//! - Save/load with sequence stamps

use std::path::PathBuf;

use foliodb::index::{
    HashIndex, IndexDefinition, IndexManager, IndexValue, KeyType, LoadOutcome,
    PRIMARY_INDEX_FILE,
};
use foliodb::page::{Page, PagePool};
use foliodb::record::{RecordLayout, RecordPage, StoredRecord};
use foliodb::storage::FileManager;
use foliodb::FolioError;
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("users.indexes");
    (temp_dir, dir)
}

fn manager(dir: &PathBuf) -> IndexManager {
    IndexManager::new(dir, 4, PagePool::new(8))
}

fn find(manager: &IndexManager, column: &str, value: IndexValue) -> Vec<String> {
    manager.with_index(column, |index| index.find(value)).unwrap()
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_create_index_is_idempotent() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);

    assert!(indexes.create_index("age", KeyType::Int).unwrap());
    assert!(!indexes.create_index("age", KeyType::Int).unwrap());
    assert!(indexes.has_index("age"));
    assert_eq!(indexes.key_type("age"), Some(KeyType::Int));
    assert_eq!(
        indexes.definitions(),
        vec![IndexDefinition {
            column: "age".to_string(),
            key_type: KeyType::Int
        }]
    );
}

#[test]
fn test_create_index_with_other_type_fails() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);
    indexes.create_index("age", KeyType::Int).unwrap();

    let result = indexes.create_index("age", KeyType::Text);
    assert!(matches!(
        result,
        Err(FolioError::IndexTypeMismatch {
            expected: KeyType::Text,
            actual: KeyType::Int,
            ..
        })
    ));
}

#[test]
fn test_missing_index() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);
    let result = indexes.with_index("age", |_| Ok(()));
    assert!(matches!(result, Err(FolioError::IndexNotFound { .. })));
}

// =============================================================================
// Record Maintenance Tests
// =============================================================================

#[test]
fn test_index_and_remove_record() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);
    indexes.create_index("age", KeyType::Int).unwrap();
    indexes.create_index("name", KeyType::Text).unwrap();

    let alice = json!({"name": "alice", "age": 30});
    let bob = json!({"name": "bob", "age": "30"});
    indexes.index_record("u1", 3, &alice).unwrap();
    indexes.index_record("u2", 4, &bob).unwrap();

    assert_eq!(indexes.primary().get("u1"), Some(3));
    assert_eq!(find(&indexes, "age", IndexValue::Int(30)), vec!["u1", "u2"]);
    assert_eq!(
        find(&indexes, "name", IndexValue::Text("bob".into())),
        vec!["u2"]
    );

    indexes.remove_record("u1", Some(&alice)).unwrap();
    assert_eq!(indexes.primary().get("u1"), None);
    assert_eq!(find(&indexes, "age", IndexValue::Int(30)), vec!["u2"]);
    assert!(find(&indexes, "name", IndexValue::Text("alice".into())).is_empty());
}

#[test]
fn test_unconvertible_values_are_not_indexed() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);
    indexes.create_index("age", KeyType::Int).unwrap();

    indexes.index_record("u1", 1, &json!({"age": "old"})).unwrap();
    indexes.index_record("u2", 1, &json!({"name": "x"})).unwrap();
    indexes.index_record("u3", 1, &json!("plain")).unwrap();

    assert_eq!(indexes.primary().len(), 3);
    assert_eq!(indexes.stats().secondary[0].tree.key_count, 0);
}

#[test]
fn test_int_index_skips_out_of_range_numbers() {
    assert_eq!(KeyType::Int.extract(&json!(1e20)), None);
    assert_eq!(KeyType::Int.extract(&json!(-1e19)), None);
    assert_eq!(KeyType::Int.extract(&json!(2.5)), None);
    assert_eq!(KeyType::Int.extract(&json!(6e3)), Some(IndexValue::Int(6000)));

    let (_temp, dir) = setup();
    let indexes = manager(&dir);
    indexes.create_index("age", KeyType::Int).unwrap();
    indexes.index_record("u1", 1, &json!({"age": 1e20})).unwrap();
    assert_eq!(indexes.stats().secondary[0].tree.key_count, 0);
}

#[test]
fn test_lookup_with_wrong_value_type_fails() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);
    indexes.create_index("age", KeyType::Int).unwrap();

    let result = indexes.with_index("age", |index| index.find(IndexValue::Bool(true)));
    assert!(matches!(result, Err(FolioError::IndexTypeMismatch { .. })));
}

#[test]
fn test_rebuild_from_data_pages() {
    let (temp, dir) = setup();
    let file = FileManager::create(&temp.path().join("users.tbl"), PagePool::new(8)).unwrap();
    let layout = RecordLayout::Generic;

    for (page_id, keys) in [(1u64, ["a", "b"]), (2u64, ["c", "d"])] {
        let mut records = RecordPage::new(layout.page_layout());
        for (i, key) in keys.iter().enumerate() {
            let value = format!(r#"{{"age": {}}}"#, page_id * 10 + i as u64);
            records.try_add(StoredRecord::new(*key, layout.encode(key, &value).unwrap()));
        }
        let mut page = Page::new(page_id);
        records.write_to(&mut page).unwrap();
        file.write_page(&page).unwrap();
    }

    let indexes = manager(&dir);
    indexes.create_index("age", KeyType::Int).unwrap();
    indexes.primary().put("stale", 9);
    indexes.rebuild_all(&file, 3, &layout).unwrap();

    assert_eq!(indexes.primary().len(), 4);
    assert_eq!(indexes.primary().get("c"), Some(2));
    assert!(!indexes.primary().contains("stale"));
    assert_eq!(find(&indexes, "age", IndexValue::Int(21)), vec!["d"]);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_save_and_load() {
    let (_temp, dir) = setup();
    {
        let indexes = manager(&dir);
        indexes.create_index("age", KeyType::Int).unwrap();
        for i in 0..50 {
            indexes
                .index_record(&format!("u{}", i), 1 + i / 10, &json!({"age": i % 5}))
                .unwrap();
        }
        indexes.save_indexes(5).unwrap();
    }

    assert!(dir.join(PRIMARY_INDEX_FILE).exists());
    assert!(dir.join("age.idx").exists());

    let indexes = manager(&dir);
    let definitions = vec![IndexDefinition {
        column: "age".to_string(),
        key_type: KeyType::Int,
    }];
    let outcome = indexes.load_indexes(&definitions, 5).unwrap();

    assert_eq!(outcome, LoadOutcome::Loaded);
    assert_eq!(indexes.primary().len(), 50);
    assert_eq!(indexes.primary().get("u23"), Some(3));
    assert_eq!(find(&indexes, "age", IndexValue::Int(4)).len(), 10);
}

#[test]
fn test_stale_sequence_needs_rebuild() {
    let (_temp, dir) = setup();
    {
        let indexes = manager(&dir);
        indexes.create_index("age", KeyType::Int).unwrap();
        indexes.save_indexes(5).unwrap();
    }

    let indexes = manager(&dir);
    let definitions = indexes_definitions();
    let outcome = indexes.load_indexes(&definitions, 6).unwrap();
    assert!(matches!(outcome, LoadOutcome::NeedsRebuild { .. }));
}

#[test]
fn test_missing_files_need_rebuild() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);

    let outcome = indexes.load_indexes(&indexes_definitions(), 0).unwrap();
    match outcome {
        LoadOutcome::NeedsRebuild { reason } => {
            assert!(reason.contains("primary index"));
            assert!(reason.contains("age"));
        }
        LoadOutcome::Loaded => panic!("expected a rebuild"),
    }
    // Registrations survive a failed load
    assert!(indexes.has_index("age"));
}

#[test]
fn test_corrupt_primary_file() {
    let (_temp, dir) = setup();
    {
        let indexes = manager(&dir);
        indexes.index_record("u1", 1, &json!({})).unwrap();
        indexes.save_indexes(1).unwrap();
    }

    let path = dir.join(PRIMARY_INDEX_FILE);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let primary = HashIndex::new();
    primary.put("kept", 2);
    assert!(matches!(primary.load(&path), Err(FolioError::Corruption(_))));
    assert_eq!(primary.get("kept"), Some(2));

    let indexes = manager(&dir);
    let outcome = indexes.load_indexes(&[], 1).unwrap();
    assert!(matches!(outcome, LoadOutcome::NeedsRebuild { .. }));
}

#[test]
fn test_clear_all_keeps_registrations() {
    let (_temp, dir) = setup();
    let indexes = manager(&dir);
    indexes.create_index("age", KeyType::Int).unwrap();
    indexes.index_record("u1", 1, &json!({"age": 1})).unwrap();

    indexes.clear_all().unwrap();

    let stats = indexes.stats();
    assert_eq!(stats.primary_entries, 0);
    assert_eq!(stats.secondary.len(), 1);
    assert_eq!(stats.secondary[0].tree.key_count, 0);
}

fn indexes_definitions() -> Vec<IndexDefinition> {
    vec![IndexDefinition {
        column: "age".to_string(),
        key_type: KeyType::Int,
    }]
}
