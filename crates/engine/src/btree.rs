//! A minimal B+Tree implementing [`vtree_core::traits::BTree`] on top of
//! [`NodeRepository`] — the concrete B-tree algorithm the core spec names as
//! an external seam (§1 Non-goals) but never specifies.
//!
//! Leaves hold items directly; internal nodes hold sorted separator keys
//! and child logical IDs, with `keys[i]` the smallest key reachable through
//! `children[i + 1]`. Overflowing leaves/internal nodes split in two;
//! removal never merges or redistributes underflowed siblings — this tree
//! only ever shrinks by item count, never by height. The root's logical ID
//! never changes: a root split rewrites the root node in place as an
//! `Internal` pointing at two fresh children, instead of allocating a new
//! top node and republishing `StoreInfo::root_node_id`.
//!
//! The very first item ever added to an empty store is a special case:
//! nothing is registered under `root_node_id` yet, so that first leaf is
//! staged as an `Add` (not an `Update`) and flagged via
//! [`StrataBTree::take_new_root_pending`] so the owning backend can route
//! it through `commitNewRootNodes`'s register-if-absent race guard (§4.C)
//! instead of the unconditional `commitAddedNodes` path.

use serde::de::DeserializeOwned;
use serde::Serialize;
use vtree_core::error::{Error, Result};
use vtree_core::traits::BTree;
use vtree_core::{Item, LogicalId, PhysicalId, StoreInfo};
use vtree_storage::{Node, NodeRepository};

use crate::payload::NodePayload;

struct Cursor<K, V> {
    leaf_id: LogicalId,
    index: usize,
    items: Vec<Item<K, V>>,
}

/// A single open B+Tree backed by a [`NodeRepository`] over
/// [`NodePayload`].
pub struct StrataBTree<K, V> {
    node_repo: NodeRepository<NodePayload<K, V>>,
    root_id: LogicalId,
    slot_length: usize,
    is_unique: bool,
    new_root_pending: bool,
    cursor: Option<Cursor<K, V>>,
}

impl<K, V> StrataBTree<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Build a tree rooted at `root_id`, reading/writing through `node_repo`.
    pub fn new(node_repo: NodeRepository<NodePayload<K, V>>, root_id: LogicalId, slot_length: usize, is_unique: bool) -> Self {
        StrataBTree { node_repo, root_id, slot_length: slot_length.max(2), is_unique, new_root_pending: false, cursor: None }
    }

    /// This store's fixed root logical ID.
    pub fn root_id(&self) -> LogicalId {
        self.root_id
    }

    /// Borrow the underlying node repository (for commit/rollback wiring).
    pub fn node_repo(&self) -> &NodeRepository<NodePayload<K, V>> {
        &self.node_repo
    }

    /// Mutably borrow the underlying node repository.
    pub fn node_repo_mut(&mut self) -> &mut NodeRepository<NodePayload<K, V>> {
        &mut self.node_repo
    }

    /// Consume and clear this attempt's "the root was just created" flag.
    pub fn take_new_root_pending(&mut self) -> bool {
        std::mem::take(&mut self.new_root_pending)
    }

    fn descend(&mut self, key: &K) -> Result<(Vec<(LogicalId, usize)>, Option<Node<NodePayload<K, V>>>)> {
        let mut path = Vec::new();
        let mut current = match self.node_repo.get(self.root_id)? {
            Some(n) => n,
            None => return Ok((path, None)),
        };
        loop {
            match current.payload {
                NodePayload::Leaf(_) => return Ok((path, Some(current))),
                NodePayload::Internal { ref keys, ref children } => {
                    let idx = keys.partition_point(|k| k <= key);
                    let child_id = children[idx];
                    path.push((current.id, idx));
                    current = self
                        .node_repo
                        .get(child_id)?
                        .ok_or_else(|| Error::Resource(format!("missing child node {child_id}")))?;
                }
            }
        }
    }

    fn leaf_items(node: Node<NodePayload<K, V>>) -> Result<Vec<Item<K, V>>> {
        match node.payload {
            NodePayload::Leaf(items) => Ok(items),
            NodePayload::Internal { .. } => Err(Error::Resource("expected a leaf node".into())),
        }
    }

    fn split_leaf(&mut self, mut leaf: Node<NodePayload<K, V>>, path: Vec<(LogicalId, usize)>) -> Result<()> {
        let items = match std::mem::replace(&mut leaf.payload, NodePayload::Leaf(Vec::new())) {
            NodePayload::Leaf(items) => items,
            NodePayload::Internal { .. } => return Err(Error::Resource("expected a leaf node".into())),
        };
        let mid = items.len() / 2;
        let right_items: Vec<_> = items[mid..].to_vec();
        let left_items: Vec<_> = items[..mid].to_vec();
        let split_key = right_items[0].key.clone();

        if leaf.id == self.root_id {
            let left_id = LogicalId::new();
            let right_id = LogicalId::new();
            self.node_repo.stage_add(Node::new(left_id, NodePayload::Leaf(left_items)));
            self.node_repo.stage_add(Node::new(right_id, NodePayload::Leaf(right_items)));
            leaf.payload = NodePayload::Internal { keys: vec![split_key], children: vec![left_id, right_id] };
            self.node_repo.stage_update(leaf);
            Ok(())
        } else {
            let right_id = LogicalId::new();
            leaf.payload = NodePayload::Leaf(left_items);
            self.node_repo.stage_update(leaf);
            self.node_repo.stage_add(Node::new(right_id, NodePayload::Leaf(right_items)));
            self.insert_into_parent(path, split_key, right_id)
        }
    }

    fn split_internal(&mut self, node: Node<NodePayload<K, V>>, path: Vec<(LogicalId, usize)>) -> Result<()> {
        let (keys, children) = match node.payload {
            NodePayload::Internal { keys, children } => (keys, children),
            NodePayload::Leaf(_) => return Err(Error::Resource("expected an internal node".into())),
        };
        let mid = keys.len() / 2;
        let up_key = keys[mid].clone();
        let left_keys = keys[..mid].to_vec();
        let right_keys = keys[mid + 1..].to_vec();
        let left_children = children[..=mid].to_vec();
        let right_children = children[mid + 1..].to_vec();

        if node.id == self.root_id {
            let left_id = LogicalId::new();
            let right_id = LogicalId::new();
            self.node_repo.stage_add(Node::new(left_id, NodePayload::Internal { keys: left_keys, children: left_children }));
            self.node_repo.stage_add(Node::new(right_id, NodePayload::Internal { keys: right_keys, children: right_children }));
            let mut new_root = node;
            new_root.payload = NodePayload::Internal { keys: vec![up_key], children: vec![left_id, right_id] };
            self.node_repo.stage_update(new_root);
            Ok(())
        } else {
            let right_id = LogicalId::new();
            let mut left_node = node;
            left_node.payload = NodePayload::Internal { keys: left_keys, children: left_children };
            self.node_repo.stage_update(left_node);
            self.node_repo
                .stage_add(Node::new(right_id, NodePayload::Internal { keys: right_keys, children: right_children }));
            self.insert_into_parent(path, up_key, right_id)
        }
    }

    fn insert_into_parent(&mut self, mut path: Vec<(LogicalId, usize)>, key: K, new_child_id: LogicalId) -> Result<()> {
        let (parent_id, child_idx) = path.pop().ok_or_else(|| Error::Resource("split with no parent on path".into()))?;
        let mut parent = self
            .node_repo
            .get(parent_id)?
            .ok_or_else(|| Error::Resource(format!("missing parent node {parent_id}")))?;
        let overflowed = match &mut parent.payload {
            NodePayload::Internal { keys, children } => {
                keys.insert(child_idx, key);
                children.insert(child_idx + 1, new_child_id);
                keys.len() > self.slot_length
            }
            NodePayload::Leaf(_) => return Err(Error::Resource("expected an internal node".into())),
        };
        if overflowed {
            self.split_internal(parent, path)
        } else {
            self.node_repo.stage_update(parent);
            Ok(())
        }
    }
}

impl<K, V> BTree<K, V> for StrataBTree<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send,
    V: Clone + Serialize + DeserializeOwned + Send,
{
    fn add(&mut self, key: K, value: V) -> Result<bool> {
        self.add_item(Item::new(key, value))
    }

    fn add_item(&mut self, item: Item<K, V>) -> Result<bool> {
        let (path, leaf_opt) = self.descend(&item.key)?;
        let inserted = match leaf_opt {
            None => {
                let leaf = Node::new(self.root_id, NodePayload::Leaf(vec![item.clone()]));
                self.node_repo.stage_add(leaf);
                self.new_root_pending = true;
                true
            }
            Some(leaf) => {
                if self.is_unique {
                    let items = Self::leaf_items(leaf.clone())?;
                    if items.iter().any(|it| it.key == item.key) {
                        return Ok(false);
                    }
                }
                let mut leaf = leaf;
                let overflowed = match &mut leaf.payload {
                    NodePayload::Leaf(items) => {
                        let pos = items.partition_point(|it| it.key < item.key);
                        items.insert(pos, item.clone());
                        items.len() > self.slot_length
                    }
                    NodePayload::Internal { .. } => return Err(Error::Resource("expected a leaf node".into())),
                };
                if overflowed {
                    self.split_leaf(leaf, path)?;
                } else {
                    self.node_repo.stage_update(leaf);
                }
                true
            }
        };
        if inserted {
            self.find(&item.key)?;
        }
        Ok(inserted)
    }

    fn find(&mut self, key: &K) -> Result<bool> {
        let (_, leaf_opt) = self.descend(key)?;
        match leaf_opt {
            None => {
                self.cursor = None;
                Ok(false)
            }
            Some(leaf) => {
                let leaf_id = leaf.id;
                let items = Self::leaf_items(leaf)?;
                match items.iter().position(|it| &it.key == key) {
                    Some(index) => {
                        self.cursor = Some(Cursor { leaf_id, index, items });
                        Ok(true)
                    }
                    None => {
                        self.cursor = None;
                        Ok(false)
                    }
                }
            }
        }
    }

    fn find_with_id(&mut self, key: &K, id: PhysicalId) -> Result<bool> {
        if !self.find(key)? {
            return Ok(false);
        }
        if self.get_current_item()?.id != id {
            self.cursor = None;
            return Ok(false);
        }
        Ok(true)
    }

    fn get_current_item(&self) -> Result<Item<K, V>> {
        let cursor = self.cursor.as_ref().ok_or_else(|| Error::Usage("no cursor positioned".into()))?;
        Ok(cursor.items[cursor.index].clone())
    }

    fn update_current_item(&mut self, value: V) -> Result<()> {
        let cursor = self.cursor.as_mut().ok_or_else(|| Error::Usage("no cursor positioned".into()))?;
        cursor.items[cursor.index].value = Some(value);
        let items = cursor.items.clone();
        let leaf_id = cursor.leaf_id;
        let mut node = self
            .node_repo
            .get(leaf_id)?
            .ok_or_else(|| Error::Resource("cursor leaf missing from staging".into()))?;
        node.payload = NodePayload::Leaf(items);
        self.node_repo.stage_update(node);
        Ok(())
    }

    fn update_current_node_item(&mut self, item: Item<K, V>) -> Result<()> {
        let cursor = self.cursor.as_mut().ok_or_else(|| Error::Usage("no cursor positioned".into()))?;
        cursor.items[cursor.index] = item;
        let items = cursor.items.clone();
        let leaf_id = cursor.leaf_id;
        let mut node = self
            .node_repo
            .get(leaf_id)?
            .ok_or_else(|| Error::Resource("cursor leaf missing from staging".into()))?;
        node.payload = NodePayload::Leaf(items);
        self.node_repo.stage_update(node);
        Ok(())
    }

    fn remove_current_item(&mut self) -> Result<()> {
        let cursor = self.cursor.take().ok_or_else(|| Error::Usage("no cursor positioned".into()))?;
        let mut items = cursor.items;
        items.remove(cursor.index);
        let mut node = self
            .node_repo
            .get(cursor.leaf_id)?
            .ok_or_else(|| Error::Resource("cursor leaf missing from staging".into()))?;
        node.payload = NodePayload::Leaf(items);
        self.node_repo.stage_update(node);
        Ok(())
    }

    fn refresh_root(&mut self, info: &StoreInfo) -> Result<()> {
        self.root_id = info.root_node_id;
        self.slot_length = (info.slot_length as usize).max(2);
        self.is_unique = info.is_unique;
        self.new_root_pending = false;
        self.cursor = None;
        Ok(())
    }
}
