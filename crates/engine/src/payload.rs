//! Opaque B-tree node payload (spec §1: the tree algorithm itself is named
//! but not specified; this is the concrete shape [`crate::btree::StrataBTree`]
//! needs to actually run end to end).

use serde::{Deserialize, Serialize};
use vtree_core::{Item, LogicalId};

/// A node's content: either a leaf holding items directly, or an internal
/// node holding separator keys and child pointers.
///
/// `keys.len() + 1 == children.len()` always holds for `Internal`: `keys[i]`
/// is the smallest key reachable through `children[i + 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodePayload<K, V> {
    /// A leaf node's items, kept sorted by key.
    Leaf(Vec<Item<K, V>>),
    /// An internal node's separator keys and child logical IDs.
    Internal {
        /// Separator keys, sorted, one fewer than `children`.
        keys: Vec<K>,
        /// Child logical IDs.
        children: Vec<LogicalId>,
    },
}
