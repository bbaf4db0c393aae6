//! Arena-backed B-tree
//!
//! Nodes live in a vector and refer to their children by arena index.
//! Freed slots are recycled through a free list.
//!
//! Invariants (checked by `validate`):
//! - keys strictly ascending within a node, one id list per key
//! - at most `order - 1` keys per node
//! - every non-root node holds at least `(order - 1) / 2` keys
//! - a non-leaf node with `k` keys has exactly `k + 1` children
//! - all leaves at the same depth

use std::cmp::Ordering;
use std::ops::Bound;

use crate::error::{FolioError, Result};

pub(crate) type NodeId = usize;

#[derive(Debug, Clone)]
pub(crate) struct Node<K> {
    pub(crate) keys: Vec<K>,
    /// Record ids, parallel to `keys`
    pub(crate) ids: Vec<Vec<String>>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) leaf: bool,
}

impl<K> Default for Node<K> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            ids: Vec::new(),
            children: Vec::new(),
            leaf: true,
        }
    }
}

impl<K> Node<K> {
    pub(crate) fn leaf(keys: Vec<K>, ids: Vec<Vec<String>>) -> Self {
        Self {
            keys,
            ids,
            children: Vec::new(),
            leaf: true,
        }
    }
}

pub(crate) struct BTree<K> {
    order: usize,
    nodes: Vec<Node<K>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    key_count: usize,
}

impl<K: Ord + Clone> BTree<K> {
    pub(crate) fn new(order: usize) -> Self {
        Self {
            order,
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            key_count: 0,
        }
    }

    pub(crate) fn order(&self) -> usize {
        self.order
    }

    fn max_keys(&self) -> usize {
        self.order - 1
    }

    pub(crate) fn min_keys(&self) -> usize {
        (self.order - 1) / 2
    }

    pub(crate) fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node<K> {
        &self.nodes[id]
    }

    pub(crate) fn key_count(&self) -> usize {
        self.key_count
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub(crate) fn alloc(&mut self, node: Node<K>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = Node::default();
        self.free.push(id);
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.key_count = 0;
    }

    /// Recompute the key count after the node graph was assembled externally
    pub(crate) fn recount(&mut self) {
        self.key_count = match self.root {
            Some(root) => self.count_keys(root),
            None => 0,
        };
    }

    fn count_keys(&self, id: NodeId) -> usize {
        let node = &self.nodes[id];
        node.keys.len() + node.children.iter().map(|&c| self.count_keys(c)).sum::<usize>()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub(crate) fn find(&self, key: &K) -> Option<&[String]> {
        let mut id = self.root?;
        loop {
            let node = &self.nodes[id];
            match node.keys.binary_search(key) {
                Ok(i) => return Some(&node.ids[i]),
                Err(i) if !node.leaf => id = node.children[i],
                Err(_) => return None,
            }
        }
    }

    /// Collect (key, ids) for keys within the bounds, ascending
    pub(crate) fn collect(&self, lower: Bound<&K>, upper: Bound<&K>, out: &mut Vec<(K, Vec<String>)>) {
        if is_empty_range(lower, upper) {
            return;
        }
        if let Some(root) = self.root {
            self.collect_from(root, lower, upper, out);
        }
    }

    fn collect_from(
        &self,
        id: NodeId,
        lower: Bound<&K>,
        upper: Bound<&K>,
        out: &mut Vec<(K, Vec<String>)>,
    ) {
        let node = &self.nodes[id];
        for (i, key) in node.keys.iter().enumerate() {
            // child i only holds keys below keys[i]
            if !node.leaf && !at_or_below_lower(key, lower) {
                self.collect_from(node.children[i], lower, upper, out);
            }
            if within(key, lower, upper) {
                out.push((key.clone(), node.ids[i].clone()));
            }
            if at_or_above_upper(key, upper) {
                return;
            }
        }
        if !node.leaf {
            if let Some(&last) = node.children.last() {
                self.collect_from(last, lower, upper, out);
            }
        }
    }

    // =========================================================================
    // Insertion (top-down splitting)
    // =========================================================================

    pub(crate) fn insert(&mut self, key: K, record_id: String) {
        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.alloc(Node::leaf(vec![key], vec![vec![record_id]]));
                self.root = Some(root);
                self.key_count = 1;
                return;
            }
        };

        let root = if self.nodes[root].keys.len() >= self.max_keys() {
            let new_root = self.alloc(Node {
                keys: Vec::new(),
                ids: Vec::new(),
                children: vec![root],
                leaf: false,
            });
            self.split_child(new_root, 0);
            self.root = Some(new_root);
            new_root
        } else {
            root
        };

        self.insert_non_full(root, key, record_id);
    }

    fn insert_non_full(&mut self, mut id: NodeId, key: K, record_id: String) {
        loop {
            let pos = self.nodes[id].keys.binary_search(&key);
            let mut i = match pos {
                Ok(i) => {
                    push_unique(&mut self.nodes[id].ids[i], record_id);
                    return;
                }
                Err(i) => i,
            };

            if self.nodes[id].leaf {
                let node = &mut self.nodes[id];
                node.keys.insert(i, key);
                node.ids.insert(i, vec![record_id]);
                self.key_count += 1;
                return;
            }

            let child = self.nodes[id].children[i];
            if self.nodes[child].keys.len() >= self.max_keys() {
                self.split_child(id, i);
                match key.cmp(&self.nodes[id].keys[i]) {
                    Ordering::Equal => {
                        push_unique(&mut self.nodes[id].ids[i], record_id);
                        return;
                    }
                    Ordering::Greater => i += 1,
                    Ordering::Less => {}
                }
            }
            id = self.nodes[id].children[i];
        }
    }

    /// Split the full child `i` of `parent`, lifting its median into `parent`
    fn split_child(&mut self, parent: NodeId, i: usize) {
        let child_id = self.nodes[parent].children[i];
        let mid = self.max_keys() / 2;

        let child = &mut self.nodes[child_id];
        let right_keys = child.keys.split_off(mid + 1);
        let right_ids = child.ids.split_off(mid + 1);
        let right_children = if child.leaf {
            Vec::new()
        } else {
            child.children.split_off(mid + 1)
        };
        let leaf = child.leaf;
        let (median_key, median_ids) = match (child.keys.pop(), child.ids.pop()) {
            (Some(k), Some(ids)) => (k, ids),
            _ => return,
        };

        let right = self.alloc(Node {
            keys: right_keys,
            ids: right_ids,
            children: right_children,
            leaf,
        });

        let parent = &mut self.nodes[parent];
        parent.keys.insert(i, median_key);
        parent.ids.insert(i, median_ids);
        parent.children.insert(i + 1, right);
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Remove `key`, returning every id it held
    pub(crate) fn remove(&mut self, key: &K) -> Option<Vec<String>> {
        let root = self.root?;
        let removed = self.delete_from(root, key);
        if removed.is_some() {
            self.key_count -= 1;
        }

        if self.nodes[root].keys.is_empty() {
            if self.nodes[root].leaf {
                self.release(root);
                self.root = None;
            } else {
                let child = self.nodes[root].children[0];
                self.release(root);
                self.root = Some(child);
            }
        }
        removed
    }

    /// Remove a single id from `key`; drops the key once its list is empty
    pub(crate) fn remove_id(&mut self, key: &K, record_id: &str) -> bool {
        let Some(root) = self.root else {
            return false;
        };

        let mut id = root;
        let emptied = loop {
            let node = &mut self.nodes[id];
            match node.keys.binary_search(key) {
                Ok(i) => {
                    let ids = &mut node.ids[i];
                    let Some(pos) = ids.iter().position(|r| r == record_id) else {
                        return false;
                    };
                    ids.remove(pos);
                    break ids.is_empty();
                }
                Err(i) if !node.leaf => id = node.children[i],
                Err(_) => return false,
            }
        };

        if emptied {
            self.remove(key);
        }
        true
    }

    fn delete_from(&mut self, id: NodeId, key: &K) -> Option<Vec<String>> {
        let (idx, found) = match self.nodes[id].keys.binary_search(key) {
            Ok(i) => (i, true),
            Err(i) => (i, false),
        };

        if found {
            if self.nodes[id].leaf {
                let node = &mut self.nodes[id];
                node.keys.remove(idx);
                return Some(node.ids.remove(idx));
            }
            return Some(self.delete_internal(id, idx));
        }

        if self.nodes[id].leaf {
            return None;
        }

        let was_last = idx == self.nodes[id].keys.len();
        let child = self.nodes[id].children[idx];
        if self.nodes[child].keys.len() <= self.min_keys() {
            self.fill(id, idx);
        }

        // Filling the last child may have merged it into its left sibling
        let next = if was_last && idx > self.nodes[id].keys.len() {
            self.nodes[id].children[idx - 1]
        } else {
            self.nodes[id].children[idx]
        };
        self.delete_from(next, key)
    }

    /// Remove key `idx` from a non-leaf node
    fn delete_internal(&mut self, id: NodeId, idx: usize) -> Vec<String> {
        let left = self.nodes[id].children[idx];
        let right = self.nodes[id].children[idx + 1];
        let min = self.min_keys();

        if self.nodes[left].keys.len() > min {
            let pred = self.rightmost_key(left);
            let pred_ids = self.delete_from(left, &pred).unwrap_or_default();
            let node = &mut self.nodes[id];
            node.keys[idx] = pred;
            return std::mem::replace(&mut node.ids[idx], pred_ids);
        }

        if self.nodes[right].keys.len() > min {
            let succ = self.leftmost_key(right);
            let succ_ids = self.delete_from(right, &succ).unwrap_or_default();
            let node = &mut self.nodes[id];
            node.keys[idx] = succ;
            return std::mem::replace(&mut node.ids[idx], succ_ids);
        }

        let key = self.nodes[id].keys[idx].clone();
        self.merge(id, idx);
        self.delete_from(left, &key).unwrap_or_default()
    }

    fn rightmost_key(&self, mut id: NodeId) -> K {
        loop {
            let node = &self.nodes[id];
            match node.children.last() {
                Some(&child) if !node.leaf => id = child,
                _ => return node.keys[node.keys.len() - 1].clone(),
            }
        }
    }

    fn leftmost_key(&self, mut id: NodeId) -> K {
        loop {
            let node = &self.nodes[id];
            match node.children.first() {
                Some(&child) if !node.leaf => id = child,
                _ => return node.keys[0].clone(),
            }
        }
    }

    /// Bring child `idx` of `id` above minimum fill before descending into it
    fn fill(&mut self, id: NodeId, idx: usize) {
        let min = self.min_keys();
        let key_len = self.nodes[id].keys.len();

        if idx != 0 && self.nodes[self.nodes[id].children[idx - 1]].keys.len() > min {
            self.borrow_from_prev(id, idx);
        } else if idx != key_len && self.nodes[self.nodes[id].children[idx + 1]].keys.len() > min {
            self.borrow_from_next(id, idx);
        } else if idx != key_len {
            self.merge(id, idx);
        } else {
            self.merge(id, idx - 1);
        }
    }

    fn borrow_from_prev(&mut self, id: NodeId, idx: usize) {
        let child = self.nodes[id].children[idx];
        let sibling = self.nodes[id].children[idx - 1];

        let sib = &mut self.nodes[sibling];
        let (Some(sib_key), Some(sib_ids)) = (sib.keys.pop(), sib.ids.pop()) else {
            return;
        };
        let sib_child = if sib.leaf { None } else { sib.children.pop() };

        let parent = &mut self.nodes[id];
        let parent_key = std::mem::replace(&mut parent.keys[idx - 1], sib_key);
        let parent_ids = std::mem::replace(&mut parent.ids[idx - 1], sib_ids);

        let node = &mut self.nodes[child];
        node.keys.insert(0, parent_key);
        node.ids.insert(0, parent_ids);
        if let Some(moved) = sib_child {
            node.children.insert(0, moved);
        }
    }

    fn borrow_from_next(&mut self, id: NodeId, idx: usize) {
        let child = self.nodes[id].children[idx];
        let sibling = self.nodes[id].children[idx + 1];

        let sib = &mut self.nodes[sibling];
        let sib_key = sib.keys.remove(0);
        let sib_ids = sib.ids.remove(0);
        let sib_child = if sib.leaf {
            None
        } else {
            Some(sib.children.remove(0))
        };

        let parent = &mut self.nodes[id];
        let parent_key = std::mem::replace(&mut parent.keys[idx], sib_key);
        let parent_ids = std::mem::replace(&mut parent.ids[idx], sib_ids);

        let node = &mut self.nodes[child];
        node.keys.push(parent_key);
        node.ids.push(parent_ids);
        if let Some(moved) = sib_child {
            node.children.push(moved);
        }
    }

    /// Merge child `idx + 1` and separator `idx` into child `idx`
    fn merge(&mut self, id: NodeId, idx: usize) {
        let parent = &mut self.nodes[id];
        let child = parent.children[idx];
        let sibling = parent.children.remove(idx + 1);
        let sep_key = parent.keys.remove(idx);
        let sep_ids = parent.ids.remove(idx);

        let sib = std::mem::take(&mut self.nodes[sibling]);
        self.release(sibling);

        let node = &mut self.nodes[child];
        node.keys.push(sep_key);
        node.ids.push(sep_ids);
        node.keys.extend(sib.keys);
        node.ids.extend(sib.ids);
        node.children.extend(sib.children);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub(crate) fn height(&self) -> usize {
        let Some(mut id) = self.root else {
            return 0;
        };
        let mut height = 1;
        while !self.nodes[id].leaf {
            id = self.nodes[id].children[0];
            height += 1;
        }
        height
    }

    pub(crate) fn record_id_count(&self) -> usize {
        match self.root {
            Some(root) => self.count_ids(root),
            None => 0,
        }
    }

    fn count_ids(&self, id: NodeId) -> usize {
        let node = &self.nodes[id];
        node.ids.iter().map(Vec::len).sum::<usize>()
            + node.children.iter().map(|&c| self.count_ids(c)).sum::<usize>()
    }

    /// Check every structural invariant, reporting the first violation
    pub(crate) fn validate(&self) -> Result<()> {
        let Some(root) = self.root else {
            if self.key_count != 0 {
                return Err(corrupt(format!(
                    "empty tree reports {} keys",
                    self.key_count
                )));
            }
            return Ok(());
        };

        let mut leaf_depth = None;
        let counted = self.validate_node(root, 0, None, None, &mut leaf_depth)?;
        if counted != self.key_count {
            return Err(corrupt(format!(
                "tree holds {} keys but reports {}",
                counted, self.key_count
            )));
        }
        Ok(())
    }

    fn validate_node(
        &self,
        id: NodeId,
        depth: usize,
        lower: Option<&K>,
        upper: Option<&K>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<usize> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| corrupt(format!("dangling node reference {}", id)))?;
        let is_root = Some(id) == self.root;

        if node.keys.len() != node.ids.len() {
            return Err(corrupt(format!(
                "node {} has {} keys but {} id lists",
                id,
                node.keys.len(),
                node.ids.len()
            )));
        }
        if node.keys.len() > self.max_keys() {
            return Err(corrupt(format!(
                "node {} holds {} keys, above the maximum {}",
                id,
                node.keys.len(),
                self.max_keys()
            )));
        }
        if !is_root && node.keys.len() < self.min_keys() {
            return Err(corrupt(format!(
                "node {} holds {} keys, below the minimum {}",
                id,
                node.keys.len(),
                self.min_keys()
            )));
        }
        if is_root && node.keys.is_empty() {
            return Err(corrupt("root node is empty".to_string()));
        }
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt(format!("node {} keys are not strictly ascending", id)));
        }
        if node.ids.iter().any(Vec::is_empty) {
            return Err(corrupt(format!("node {} has a key with no record ids", id)));
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first <= lo {
                return Err(corrupt(format!("node {} has a key below its separator", id)));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last >= hi {
                return Err(corrupt(format!("node {} has a key above its separator", id)));
            }
        }

        if node.leaf {
            if !node.children.is_empty() {
                return Err(corrupt(format!("leaf node {} has children", id)));
            }
            match *leaf_depth {
                Some(d) if d != depth => {
                    return Err(corrupt(format!(
                        "leaf node {} at depth {}, expected {}",
                        id, depth, d
                    )))
                }
                Some(_) => {}
                None => *leaf_depth = Some(depth),
            }
            return Ok(node.keys.len());
        }

        if node.children.len() != node.keys.len() + 1 {
            return Err(corrupt(format!(
                "node {} has {} keys but {} children",
                id,
                node.keys.len(),
                node.children.len()
            )));
        }

        let mut total = node.keys.len();
        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = if i == node.keys.len() {
                upper
            } else {
                Some(&node.keys[i])
            };
            total += self.validate_node(child, depth + 1, lo, hi, leaf_depth)?;
        }
        Ok(total)
    }
}

fn corrupt(message: String) -> FolioError {
    FolioError::Corruption(format!("b-tree: {}", message))
}

fn push_unique(ids: &mut Vec<String>, record_id: String) {
    if !ids.contains(&record_id) {
        ids.push(record_id);
    }
}

/// True if no key below or at `key` can satisfy the lower bound
fn at_or_below_lower<K: Ord>(key: &K, lower: Bound<&K>) -> bool {
    match lower {
        Bound::Included(lo) | Bound::Excluded(lo) => key <= lo,
        Bound::Unbounded => false,
    }
}

/// True if no key above `key` can satisfy the upper bound
fn at_or_above_upper<K: Ord>(key: &K, upper: Bound<&K>) -> bool {
    match upper {
        Bound::Included(hi) | Bound::Excluded(hi) => key >= hi,
        Bound::Unbounded => false,
    }
}

fn within<K: Ord>(key: &K, lower: Bound<&K>, upper: Bound<&K>) -> bool {
    let above = match lower {
        Bound::Included(lo) => key >= lo,
        Bound::Excluded(lo) => key > lo,
        Bound::Unbounded => true,
    };
    let below = match upper {
        Bound::Included(hi) => key <= hi,
        Bound::Excluded(hi) => key < hi,
        Bound::Unbounded => true,
    };
    above && below
}

fn is_empty_range<K: Ord>(lower: Bound<&K>, upper: Bound<&K>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi))
        | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        _ => false,
    }
}
