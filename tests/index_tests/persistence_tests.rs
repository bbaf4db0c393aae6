//! B-tree Persistence Tests
//!
//! Tests verify:
//! - Save/load preserves keys, duplicate ids and shape
//! - Nodes larger than a page span several pages
//! - Corrupt or mistyped files are rejected without touching the tree

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use foliodb::index::{BTreeIndex, IndexMetadata, KeyType};
use foliodb::page::{PagePool, PAGE_SIZE};
use foliodb::storage::FileManager;
use foliodb::FolioError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("age.idx");
    (temp_dir, path)
}

fn save<K: foliodb::IndexKey>(tree: &BTreeIndex<K>, path: &PathBuf, key_type: KeyType) -> IndexMetadata {
    let file = FileManager::open_or_create(path, PagePool::new(8)).unwrap();
    let mut metadata = IndexMetadata::new("age", key_type, tree.order());
    metadata.table_sequence = 7;
    tree.save_to_file(&file, &mut metadata).unwrap();
    metadata
}

fn open(path: &PathBuf) -> FileManager {
    FileManager::open(path, PagePool::new(8)).unwrap()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_save_and_load() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    for i in 0..300 {
        tree.insert(i % 100, format!("r{}", i));
    }
    let saved = save(&tree, &path, KeyType::Int);

    let loaded = BTreeIndex::<i64>::new(4);
    let metadata = loaded.load_from_file(&open(&path)).unwrap();

    assert_eq!(metadata, saved);
    assert_eq!(metadata.column_name, "age");
    assert_eq!(metadata.index_kind, "btree");
    assert_eq!(metadata.table_sequence, 7);
    assert_eq!(metadata.key_count, 100);
    assert_eq!(loaded.stats(), tree.stats());
    assert_eq!(loaded.find(&42), vec!["r42", "r142", "r242"]);
    assert_eq!(loaded.get_all_sorted(), tree.get_all_sorted());
    loaded.validate().unwrap();
}

#[test]
fn test_loaded_tree_stays_mutable() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    for i in 0..50 {
        tree.insert(i, format!("r{}", i));
    }
    save(&tree, &path, KeyType::Int);

    let loaded = BTreeIndex::<i64>::new(4);
    loaded.load_from_file(&open(&path)).unwrap();
    for i in 0..40 {
        assert!(loaded.remove(&i));
    }
    loaded.insert(1000, "r1000");
    loaded.validate().unwrap();
    assert_eq!(loaded.len(), 11);
}

#[test]
fn test_metadata_is_json() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    tree.insert(1, "a");
    save(&tree, &path, KeyType::Int);

    let mut bytes = vec![0u8; 4];
    std::fs::File::open(&path)
        .unwrap()
        .read_exact(&mut bytes)
        .unwrap();
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;

    let raw = std::fs::read(&path).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&raw[4..4 + len]).unwrap();
    assert_eq!(json["column_name"], "age");
    assert_eq!(json["key_type"], "Int");
    assert_eq!(json["key_count"], 1);
}

#[test]
fn test_empty_tree_round_trip() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<String>::new(8);
    let saved = save(&tree, &path, KeyType::Text);
    assert_eq!(saved.root_page_id, -1);
    assert_eq!(saved.node_count, 0);

    let loaded = BTreeIndex::<String>::new(8);
    loaded.insert("stale".to_string(), "x");
    loaded.load_from_file(&open(&path)).unwrap();
    assert!(loaded.is_empty());
}

#[test]
fn test_node_larger_than_a_page() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    let long_id = |n: usize| format!("{}-{}", n, "x".repeat(30_000));
    for n in 0..5 {
        tree.insert(1, long_id(n));
    }
    tree.insert(2, "short");
    save(&tree, &path, KeyType::Int);

    let file_len = std::fs::metadata(&path).unwrap().len();
    assert!(file_len > 3 * PAGE_SIZE as u64);

    let loaded = BTreeIndex::<i64>::new(4);
    loaded.load_from_file(&open(&path)).unwrap();
    assert_eq!(loaded.find(&1), (0..5).map(long_id).collect::<Vec<_>>());
    assert_eq!(loaded.find(&2), vec!["short"]);
}

#[test]
fn test_resave_shrinks_file() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    for i in 0..500 {
        tree.insert(i, format!("r{}", i));
    }
    save(&tree, &path, KeyType::Int);
    let large = std::fs::metadata(&path).unwrap().len();

    tree.clear();
    tree.insert(1, "r1");
    save(&tree, &path, KeyType::Int);
    let small = std::fs::metadata(&path).unwrap().len();

    assert!(small < large);
    let loaded = BTreeIndex::<i64>::new(4);
    loaded.load_from_file(&open(&path)).unwrap();
    assert_eq!(loaded.len(), 1);
}

// =============================================================================
// Rejection Tests
// =============================================================================

#[test]
fn test_corrupt_node_is_rejected() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    for i in 0..20 {
        tree.insert(i, format!("r{}", i));
    }
    save(&tree, &path, KeyType::Int);

    // Flip a byte inside the first node's body (page 1, past its header)
    {
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let offset = PAGE_SIZE as u64 + 12;
        let mut byte = [0u8; 1];
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.read_exact(&mut byte).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[byte[0] ^ 0xFF]).unwrap();
    }

    let loaded = BTreeIndex::<i64>::new(4);
    loaded.insert(99, "kept");
    let result = loaded.load_from_file(&open(&path));

    assert!(matches!(result, Err(FolioError::Corruption(_))));
    assert_eq!(loaded.find(&99), vec!["kept"]);
    assert_eq!(loaded.len(), 1);
}

#[test]
fn test_key_type_mismatch_is_rejected() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    tree.insert(1, "a");
    save(&tree, &path, KeyType::Int);

    let loaded = BTreeIndex::<String>::new(4);
    let result = loaded.load_from_file(&open(&path));
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
fn test_missing_metadata_is_rejected() {
    let (_temp, path) = setup();
    let file = FileManager::create(&path, PagePool::new(8)).unwrap();

    let loaded = BTreeIndex::<i64>::new(4);
    assert!(matches!(
        loaded.load_from_file(&file),
        Err(FolioError::Corruption(_))
    ));
}

#[test]
fn test_truncated_file_is_rejected() {
    let (_temp, path) = setup();
    let tree = BTreeIndex::<i64>::new(4);
    for i in 0..100 {
        tree.insert(i, format!("r{}", i));
    }
    save(&tree, &path, KeyType::Int);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(3 * PAGE_SIZE as u64).unwrap();
    drop(file);

    let loaded = BTreeIndex::<i64>::new(4);
    assert!(loaded.load_from_file(&open(&path)).is_err());
    assert!(loaded.is_empty());
}
