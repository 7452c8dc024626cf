//! Node and staged-mutation types (spec §3 `Node`, `CachedNode`)
//!
//! The B-tree algorithm itself is out of scope (spec §1): this crate never
//! splits, balances, or searches a node. It only needs enough of a node's
//! shape to stage it, serialize it to a blob, and track what a transaction
//! intends to do with it. `P` is the opaque B-tree payload type the (out of
//! scope) tree library owns.

use serde::{Deserialize, Serialize};
use vtree_core::item::CacheAction;
use vtree_core::types::LogicalId;

/// A B-tree node, owned by exactly one [`vtree_core::Handle`] through its
/// active physical ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node<P> {
    /// The node's logical identity.
    pub id: LogicalId,
    /// Monotonically increasing version, compared against the owning
    /// handle's version to detect concurrent modification.
    pub version: u64,
    /// Opaque B-tree payload (child pointers, keys, slots — the out of
    /// scope tree library's business).
    pub payload: P,
}

impl<P> Node<P> {
    /// Construct a fresh node at version 0.
    pub fn new(id: LogicalId, payload: P) -> Self {
        Node { id, version: 0, payload }
    }
}

/// Per-transaction staging record for one node (spec §3 `CachedNode`).
#[derive(Debug, Clone)]
pub struct CachedNode<P> {
    /// What this transaction intends to do with the node.
    pub action: CacheAction,
    /// The staged node content; `None` only for a `Remove` action, where
    /// the prior content is no longer held locally.
    pub node: Option<Node<P>>,
}

impl<P> CachedNode<P> {
    /// Stage a `get`/`add`/`update` action with its node content.
    pub fn with_node(action: CacheAction, node: Node<P>) -> Self {
        CachedNode { action, node: Some(node) }
    }

    /// Stage a `remove` action with no retained content.
    pub fn removed() -> Self {
        CachedNode { action: CacheAction::Remove, node: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_at_version_zero() {
        let n = Node::new(LogicalId::new(), "payload".to_string());
        assert_eq!(n.version, 0);
    }

    #[test]
    fn removed_cached_node_has_no_content() {
        let cached: CachedNode<String> = CachedNode::removed();
        assert!(cached.node.is_none());
        assert_eq!(cached.action, CacheAction::Remove);
    }
}
