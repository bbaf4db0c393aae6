//! B-tree persistence
//!
//! ## Index File Format
//! ```text
//! Page 0:  [len: u32 LE][IndexMetadata as JSON]
//! Page 1+: node extents, children before parents
//!
//! Node extent (starts on a page boundary, may span pages):
//! ┌──────────────┬──────────────┬────────────────────────────────┐
//! │ Length (4)   │ CRC32 (4)    │ BTreeNodeData<K> (bincode)     │
//! └──────────────┴──────────────┴────────────────────────────────┘
//! ```
//!
//! A node's page id is the first page of its extent. Parents store the page
//! ids of their children; the root's page id lives in the metadata.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::tree::{BTree, Node, NodeId};
use crate::error::{FolioError, Result};
use crate::index::{IndexKey, KeyType};
use crate::page::{Page, PageId, METADATA_PAGE_ID, PAGE_SIZE};
use crate::storage::FileManager;

/// Extent header: length (4) + crc32 (4)
const EXTENT_HEADER_SIZE: usize = 8;

/// Deepest tree a load will follow
const MAX_LOAD_DEPTH: usize = 64;

/// Index kind recorded for B-tree index files
pub const BTREE_INDEX_KIND: &str = "btree";

/// Page 0 header of an index file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub column_name: String,
    pub index_kind: String,
    pub key_type: KeyType,
    pub order: usize,
    /// Page id of the root node, -1 for an empty tree
    pub root_page_id: i64,
    pub node_count: u64,
    pub key_count: u64,
    /// Table flush sequence the index was saved at
    pub table_sequence: u64,
    /// Unix millis
    pub created_at: u64,
    pub updated_at: u64,
}

impl IndexMetadata {
    pub fn new(column: impl Into<String>, key_type: KeyType, order: usize) -> Self {
        let now = crate::unix_millis();
        Self {
            column_name: column.into(),
            index_kind: BTREE_INDEX_KIND.to_string(),
            key_type,
            order,
            root_page_id: -1,
            node_count: 0,
            key_count: 0,
            table_sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read the metadata page of an index file
    pub fn read_from(file: &FileManager) -> Result<Self> {
        let page = file.read_page(METADATA_PAGE_ID)?;
        let payload = page.read_prefixed()?;
        if payload.is_empty() {
            return Err(FolioError::Corruption(format!(
                "index file {} has no metadata",
                file.path().display()
            )));
        }
        Ok(serde_json::from_slice(payload)?)
    }

    fn write_to(&self, file: &FileManager) -> Result<()> {
        let payload = serde_json::to_vec(self)?;
        let mut page = Page::pooled(METADATA_PAGE_ID, file.pool());
        page.write_prefixed(&payload)?;
        file.write_page_owned(page)
    }
}

/// Serialized form of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BTreeNodeData<K> {
    pub page_id: PageId,
    pub is_leaf: bool,
    pub keys: Vec<K>,
    pub record_ids: Vec<Vec<String>>,
    pub child_page_ids: Vec<PageId>,
}

// =============================================================================
// Save
// =============================================================================

/// Write `tree` into `file`, replacing its previous contents
pub(crate) fn save<K: IndexKey>(
    tree: &BTree<K>,
    file: &FileManager,
    metadata: &mut IndexMetadata,
) -> Result<()> {
    // Drop whatever a previous save left behind
    file.truncate(0)?;

    let mut writer = ExtentWriter {
        file,
        next_page: METADATA_PAGE_ID + 1,
        nodes: 0,
    };
    let root_page = match tree.root() {
        Some(root) => Some(writer.save_node(tree, root)?),
        None => None,
    };

    metadata.key_type = K::KEY_TYPE;
    metadata.order = tree.order();
    metadata.root_page_id = root_page.map(|p| p as i64).unwrap_or(-1);
    metadata.node_count = writer.nodes;
    metadata.key_count = tree.key_count() as u64;
    metadata.updated_at = crate::unix_millis();
    metadata.write_to(file)?;

    file.flush()?;
    Ok(())
}

struct ExtentWriter<'a> {
    file: &'a FileManager,
    next_page: PageId,
    nodes: u64,
}

impl ExtentWriter<'_> {
    /// Save children first, then the node; returns the node's page id
    fn save_node<K: IndexKey>(&mut self, tree: &BTree<K>, id: NodeId) -> Result<PageId> {
        let node = tree.node(id);
        let child_page_ids = node
            .children
            .iter()
            .map(|&child| self.save_node(tree, child))
            .collect::<Result<Vec<_>>>()?;

        let page_id = self.next_page;
        let data = BTreeNodeData {
            page_id,
            is_leaf: node.leaf,
            keys: node.keys.clone(),
            record_ids: node.ids.clone(),
            child_page_ids,
        };
        let body = bincode::serialize(&data)?;
        self.write_extent(page_id, &body)?;
        self.nodes += 1;
        Ok(page_id)
    }

    fn write_extent(&mut self, start: PageId, body: &[u8]) -> Result<()> {
        let len = u32::try_from(body.len()).map_err(|_| {
            FolioError::Corruption(format!("b-tree node of {} bytes is too large", body.len()))
        })?;

        let mut bytes = Vec::with_capacity(EXTENT_HEADER_SIZE + body.len());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(body).to_le_bytes());
        bytes.extend_from_slice(body);

        let mut page_id = start;
        for chunk in bytes.chunks(PAGE_SIZE) {
            let mut page = Page::pooled(page_id, self.file.pool());
            page.write(0, chunk)?;
            self.file.write_page_owned(page)?;
            page_id += 1;
        }
        self.next_page = page_id;
        Ok(())
    }
}

// =============================================================================
// Load
// =============================================================================

/// Rebuild a tree from `file`
///
/// Every node is checksummed, visited at most once and the result must pass
/// `BTree::validate` plus agree with the metadata counts.
pub(crate) fn load<K: IndexKey>(file: &FileManager) -> Result<(BTree<K>, IndexMetadata)> {
    let metadata = IndexMetadata::read_from(file)?;

    if metadata.key_type != K::KEY_TYPE {
        return Err(FolioError::IndexTypeMismatch {
            column: metadata.column_name.clone(),
            expected: K::KEY_TYPE,
            actual: metadata.key_type,
        });
    }
    if metadata.order < 4 || metadata.order % 2 != 0 {
        return Err(FolioError::Corruption(format!(
            "index '{}' has invalid order {}",
            metadata.column_name, metadata.order
        )));
    }

    let mut tree = BTree::new(metadata.order);
    if metadata.root_page_id >= 0 {
        let mut reader = ExtentReader {
            file,
            page_count: file.page_count(),
            budget: metadata.node_count,
            visited: HashSet::new(),
        };
        let root = reader.load_node(&mut tree, metadata.root_page_id as PageId, 0)?;
        tree.set_root(Some(root));
    }
    tree.recount();

    if tree.node_count() as u64 != metadata.node_count
        || tree.key_count() as u64 != metadata.key_count
    {
        return Err(FolioError::Corruption(format!(
            "index '{}' holds {} nodes / {} keys, metadata records {} / {}",
            metadata.column_name,
            tree.node_count(),
            tree.key_count(),
            metadata.node_count,
            metadata.key_count
        )));
    }
    tree.validate()?;

    Ok((tree, metadata))
}

struct ExtentReader<'a> {
    file: &'a FileManager,
    page_count: u64,
    /// Nodes left to load before the file is considered corrupt
    budget: u64,
    visited: HashSet<PageId>,
}

impl ExtentReader<'_> {
    fn load_node<K: IndexKey>(
        &mut self,
        tree: &mut BTree<K>,
        page_id: PageId,
        depth: usize,
    ) -> Result<NodeId> {
        if depth > MAX_LOAD_DEPTH {
            return Err(FolioError::Corruption(format!(
                "b-tree deeper than {} levels",
                MAX_LOAD_DEPTH
            )));
        }
        if page_id == METADATA_PAGE_ID || page_id >= self.page_count {
            return Err(FolioError::Corruption(format!(
                "b-tree node page {} outside index file",
                page_id
            )));
        }
        if !self.visited.insert(page_id) {
            return Err(FolioError::Corruption(format!(
                "b-tree node page {} referenced twice",
                page_id
            )));
        }
        if self.budget == 0 {
            return Err(FolioError::Corruption(
                "b-tree holds more nodes than its metadata records".to_string(),
            ));
        }
        self.budget -= 1;

        let body = self.read_extent(page_id)?;
        let data: BTreeNodeData<K> = bincode::deserialize(&body)?;
        if data.page_id != page_id {
            return Err(FolioError::Corruption(format!(
                "b-tree node at page {} claims page {}",
                page_id, data.page_id
            )));
        }
        if data.is_leaf != data.child_page_ids.is_empty() {
            return Err(FolioError::Corruption(format!(
                "b-tree node at page {} has inconsistent leaf flag",
                page_id
            )));
        }

        let children = data
            .child_page_ids
            .iter()
            .map(|&child| self.load_node(tree, child, depth + 1))
            .collect::<Result<Vec<_>>>()?;

        Ok(tree.alloc(Node {
            keys: data.keys,
            ids: data.record_ids,
            children,
            leaf: data.is_leaf,
        }))
    }

    fn read_extent(&self, start: PageId) -> Result<Vec<u8>> {
        let first = self.file.read_page(start)?;
        let mut header = [0u8; EXTENT_HEADER_SIZE];
        first.read(0, &mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let total = EXTENT_HEADER_SIZE + len;
        let pages = total.div_ceil(PAGE_SIZE) as u64;
        if start + pages > self.page_count {
            return Err(FolioError::Corruption(format!(
                "b-tree node at page {} runs past end of file",
                start
            )));
        }

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&first.data()[..total.min(PAGE_SIZE)]);
        let mut page_id = start + 1;
        while bytes.len() < total {
            let page = self.file.read_page(page_id)?;
            let take = (total - bytes.len()).min(PAGE_SIZE);
            bytes.extend_from_slice(&page.data()[..take]);
            page_id += 1;
        }

        let body = bytes.split_off(EXTENT_HEADER_SIZE);
        if crc32fast::hash(&body) != crc {
            return Err(FolioError::Corruption(format!(
                "checksum mismatch in b-tree node at page {}",
                start
            )));
        }
        Ok(body)
    }
}
