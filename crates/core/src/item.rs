//! Tracked items and their externalized-value bookkeeping (spec §3, §4.B)

use crate::lock::LockRecord;
use crate::types::PhysicalId;
use serde::{Deserialize, Serialize};

/// What a transaction intends to do with a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheAction {
    /// Read-only; no mutation intended.
    Get,
    /// Insert a brand-new item.
    Add,
    /// Modify an existing item.
    Update,
    /// Delete an existing item.
    Remove,
}

/// An item visible to a B-tree, with value either inline or externalized.
///
/// `value_needs_fetch` is the discriminator: when true, `value` is stale
/// (cleared) and the real payload lives in the blob store keyed by `id`,
/// possibly mirrored in the L2 cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item<K, V> {
    /// Physical identifier of this item's value blob (stable across
    /// updates unless value externalization reassigns it).
    pub id: PhysicalId,
    /// The item's key.
    pub key: K,
    /// The item's value, or a stale placeholder when externalized.
    pub value: Option<V>,
    /// Monotonically increasing version.
    pub version: u64,
    /// True when `value` must be fetched from the blob store / L2 cache.
    pub value_needs_fetch: bool,
}

impl<K, V> Item<K, V> {
    /// Construct a new, non-externalized item at version 0.
    pub fn new(key: K, value: V) -> Self {
        Item {
            id: PhysicalId::new(),
            key,
            value: Some(value),
            version: 0,
            value_needs_fetch: false,
        }
    }

    /// Clear the inline value and mark it as needing an external fetch.
    pub fn externalize(&mut self) {
        self.value = None;
        self.value_needs_fetch = true;
    }

    /// Resolve an externalized value, clearing the fetch flag.
    pub fn resolve(&mut self, value: V) {
        self.value = Some(value);
        self.value_needs_fetch = false;
    }
}

/// Per-transaction tracker record for one item (spec's `CacheItem`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem<K, V> {
    /// The distributed lock record taken (or attempted) for this item.
    pub lock_record: LockRecord,
    /// The tracked item itself.
    pub item: Item<K, V>,
    /// The version observed when this item entered tracking; used for the
    /// optimistic version check at commit time.
    pub version_in_db: u64,
    /// The physical ID under which this item lives in the B-tree right
    /// now, before any value externalization this transaction performs
    /// reassigns `item.id` to a fresh blob. The refetch-and-merge closure
    /// locates the tree's current entry by this ID, not by `item.id`,
    /// since by the time a conflict forces a refetch `item.id` may already
    /// point at a value this attempt wrote but never committed.
    pub original_id: PhysicalId,
    /// True once this transaction has confirmed it owns the distributed lock.
    pub is_lock_owner: bool,
    /// True once this item's externalized value has been written to the
    /// blob store (and cache, if configured) during commit.
    pub persisted: bool,
}

impl<K, V> CacheItem<K, V> {
    /// Start tracking an item under the given lock record, recording its
    /// current version and physical location for later comparison.
    pub fn new(lock_record: LockRecord, item: Item<K, V>) -> Self {
        let version_in_db = item.version;
        let original_id = item.id;
        CacheItem {
            lock_record,
            item,
            version_in_db,
            original_id,
            is_lock_owner: false,
            persisted: false,
        }
    }

    /// True if the item's current version still matches what was observed
    /// when tracking began.
    pub fn is_version_unchanged(&self) -> bool {
        self.item.version == self.version_in_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockAction;
    use crate::types::TransactionId;

    #[test]
    fn new_item_is_inline_by_default() {
        let item: Item<String, Vec<u8>> = Item::new("k".into(), vec![1, 2, 3]);
        assert!(!item.value_needs_fetch);
        assert_eq!(item.value, Some(vec![1, 2, 3]));
    }

    #[test]
    fn externalize_then_resolve_round_trips() {
        let mut item: Item<String, Vec<u8>> = Item::new("k".into(), vec![9]);
        item.externalize();
        assert!(item.value_needs_fetch);
        assert!(item.value.is_none());
        item.resolve(vec![9]);
        assert!(!item.value_needs_fetch);
        assert_eq!(item.value, Some(vec![9]));
    }

    #[test]
    fn cache_item_tracks_version_in_db_at_creation() {
        let item: Item<String, u32> = Item::new("k".into(), 1);
        let lock = LockRecord::new(TransactionId::new(), LockAction::Get);
        let tracked = CacheItem::new(lock, item);
        assert!(tracked.is_version_unchanged());
    }

    #[test]
    fn version_drift_is_detected() {
        let item: Item<String, u32> = Item::new("k".into(), 1);
        let lock = LockRecord::new(TransactionId::new(), LockAction::Update);
        let mut tracked = CacheItem::new(lock, item);
        tracked.item.version += 1;
        assert!(!tracked.is_version_unchanged());
    }
}
