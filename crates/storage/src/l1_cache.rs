//! Process-wide L1 cache: handle map + node MRU (spec §4.C, §9 "Global
//! mutable state")
//!
//! This is the one piece of process-wide shared state in the whole
//! engine. It must be constructed once, from a `(L2 cache, min capacity,
//! max capacity)` triple, before any transaction begins, and then shared
//! via `Arc` across every [`crate::node_repo::NodeRepository`] in the
//! process. The `L2Cache` handle is carried for a future distributed
//! invalidation broadcast (when an L1 entry is evicted or overwritten, a
//! production deployment would fan that out to peers); the in-memory
//! reference implementation here doesn't need it yet, so it's unused
//! beyond being held alive.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use vtree_core::traits::L2Cache;
use vtree_core::{Handle, LogicalId};

use crate::node::Node;

/// Process-wide cache of registry handles and recently-touched nodes.
pub struct L1Cache<P> {
    #[allow(dead_code)]
    l2: Arc<dyn L2Cache>,
    min_capacity: usize,
    max_capacity: usize,
    handles: Mutex<std::collections::HashMap<LogicalId, Handle>>,
    nodes: Mutex<LruCache<LogicalId, Node<P>>>,
}

impl<P: Clone> L1Cache<P> {
    /// Construct the L1 cache. `min_capacity` is advisory (a floor below
    /// which the node MRU is never shrunk by a future eviction policy);
    /// `max_capacity` bounds the node MRU's retained entries.
    pub fn new(l2: Arc<dyn L2Cache>, min_capacity: usize, max_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(max_capacity.max(1)).expect("max_capacity must be > 0");
        L1Cache {
            l2,
            min_capacity,
            max_capacity,
            handles: Mutex::new(std::collections::HashMap::new()),
            nodes: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Configured floor on retained node entries.
    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    /// Configured ceiling on retained node entries.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Look up a cached handle.
    pub fn get_handle(&self, id: LogicalId) -> Option<Handle> {
        self.handles.lock().get(&id).cloned()
    }

    /// Insert or overwrite a cached handle.
    pub fn put_handle(&self, handle: Handle) {
        self.handles.lock().insert(handle.logical_id, handle);
    }

    /// Evict a handle entry (e.g. after a logical ID is unregistered).
    pub fn remove_handle(&self, id: LogicalId) {
        self.handles.lock().remove(&id);
    }

    /// Look up a cached node, only returning it if its version matches
    /// `expected_version` — a stale MRU entry from a since-superseded
    /// write must miss rather than serve the wrong content.
    pub fn get_node(&self, id: LogicalId, expected_version: u64) -> Option<Node<P>> {
        let mut nodes = self.nodes.lock();
        match nodes.get(&id) {
            Some(node) if node.version == expected_version => Some(node.clone()),
            _ => None,
        }
    }

    /// Insert or overwrite a cached node.
    pub fn put_node(&self, node: Node<P>) {
        self.nodes.lock().put(node.id, node);
    }

    /// Evict a cached node (e.g. after it's rolled back or superseded).
    pub fn remove_node(&self, id: LogicalId) {
        self.nodes.lock().pop(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vtree_core::error::Result;
    use vtree_core::traits::LockOutcome;
    use vtree_core::TransactionId;

    struct NoopL2;
    impl L2Cache for NoopL2 {
        fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            Ok(())
        }
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn get_ex(&self, _key: &str, _ttl: Duration) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            Ok(vec![None; keys.len()])
        }
        fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        fn lock(&self, _keys: &[String], _owner: TransactionId, _ttl: Duration) -> Result<LockOutcome> {
            Ok(LockOutcome { acquired: true, confirmed: true })
        }
        fn unlock(&self, _keys: &[String], _owner: TransactionId) -> Result<()> {
            Ok(())
        }
        fn is_locked(&self, _keys: &[String], _owner: TransactionId) -> Result<bool> {
            Ok(true)
        }
        fn lock_owner(&self, _key: &str) -> Result<Option<TransactionId>> {
            Ok(None)
        }
    }

    #[test]
    fn node_lookup_misses_on_version_drift() {
        let cache: L1Cache<String> = L1Cache::new(Arc::new(NoopL2), 8, 64);
        let id = LogicalId::new();
        cache.put_node(Node { id, version: 3, payload: "v3".into() });
        assert!(cache.get_node(id, 3).is_some());
        assert!(cache.get_node(id, 4).is_none());
    }

    #[test]
    fn handle_round_trips() {
        let cache: L1Cache<String> = L1Cache::new(Arc::new(NoopL2), 8, 64);
        let handle = Handle::new(LogicalId::new(), vtree_core::PhysicalId::new());
        cache.put_handle(handle.clone());
        assert_eq!(cache.get_handle(handle.logical_id), Some(handle.clone()));
        cache.remove_handle(handle.logical_id);
        assert_eq!(cache.get_handle(handle.logical_id), None);
    }

    #[test]
    fn node_mru_evicts_past_capacity() {
        let cache: L1Cache<String> = L1Cache::new(Arc::new(NoopL2), 1, 2);
        let a = LogicalId::new();
        let b = LogicalId::new();
        let c = LogicalId::new();
        cache.put_node(Node { id: a, version: 0, payload: "a".into() });
        cache.put_node(Node { id: b, version: 0, payload: "b".into() });
        cache.put_node(Node { id: c, version: 0, payload: "c".into() });
        assert!(cache.get_node(a, 0).is_none());
        assert!(cache.get_node(c, 0).is_some());
    }
}
