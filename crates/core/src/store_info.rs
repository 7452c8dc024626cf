//! Per-store metadata and cache configuration (spec §3, §9)
//!
//! `StoreInfo` is the one piece of per-B-tree state the `StoreRepository`
//! owns outside the registry; it is mutated only by phase-1's
//! `commitStoreInfo` stage. Item-value storage is a three-way choice
//! (`ValueStorageMode`), an enumerated discriminator rather than three
//! separate StoreInfo types, so `Add`/`Update`/`Remove`/
//! `commitTrackedItemsValues` can all branch on a single field.

use crate::types::LogicalId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where an item's value physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueStorageMode {
    /// The value is stored inline in the B-tree node segment.
    InNode,
    /// The value is externalized to the blob store lazily, at commit time.
    SeparateLazy,
    /// The value is externalized to the blob store eagerly, as soon as the
    /// item is added, ahead of the numbered commit stages.
    SeparateActivelyPersisted,
}

impl ValueStorageMode {
    /// True unless the value lives in the node segment itself.
    pub fn is_externalized(self) -> bool {
        !matches!(self, ValueStorageMode::InNode)
    }

    /// True only for the eager, pre-commit externalization mode.
    pub fn is_actively_persisted(self) -> bool {
        matches!(self, ValueStorageMode::SeparateActivelyPersisted)
    }
}

/// TTLs and capacity bounds for the L2 distributed cache and the
/// process-wide L1 cache, per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when populating the L2 cache.
    pub l2_ttl: Duration,
    /// TTL applied to distributed lock records.
    pub lock_ttl: Duration,
    /// Lower bound on the process-wide L1 node cache's retained entries.
    pub l1_min_capacity: usize,
    /// Upper bound on the process-wide L1 node cache's retained entries.
    pub l1_max_capacity: usize,
}

impl CacheConfig {
    /// `defaultLockDuration = 5 min` per spec §4; a generous L2 TTL and a
    /// modest L1 capacity window.
    pub const fn default_lock_duration() -> Duration {
        Duration::from_secs(5 * 60)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            l2_ttl: Duration::from_secs(60),
            lock_ttl: Self::default_lock_duration(),
            l1_min_capacity: 64,
            l1_max_capacity: 4096,
        }
    }
}

/// Per-B-tree metadata owned by the `StoreRepository`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// The store's unique name.
    pub name: String,
    /// Fixed B-tree node fan-out / slot count.
    pub slot_length: u16,
    /// Whether keys must be unique.
    pub is_unique: bool,
    /// Logical ID of the current root node.
    pub root_node_id: LogicalId,
    /// Number of items currently in the store.
    pub count: u64,
    /// Name of the registry table/namespace this store's handles live in.
    pub registry_table: String,
    /// Name of the blob store table/namespace this store's blobs live in.
    pub blob_table: String,
    /// Cache TTLs and capacity bounds for this store.
    pub cache_config: CacheConfig,
    /// How item values are stored.
    pub value_storage_mode: ValueStorageMode,
    /// Whether this store's values are mirrored in the L2 distributed cache.
    pub is_value_data_globally_cached: bool,
}

impl StoreInfo {
    /// Construct a fresh, empty store description.
    pub fn new(name: impl Into<String>, slot_length: u16, is_unique: bool, root_node_id: LogicalId) -> Self {
        let name = name.into();
        StoreInfo {
            registry_table: format!("{name}/registry"),
            blob_table: format!("{name}/blobs"),
            name,
            slot_length,
            is_unique,
            root_node_id,
            count: 0,
            cache_config: CacheConfig::default(),
            value_storage_mode: ValueStorageMode::InNode,
            is_value_data_globally_cached: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_node_values_are_not_externalized() {
        assert!(!ValueStorageMode::InNode.is_externalized());
        assert!(ValueStorageMode::SeparateLazy.is_externalized());
        assert!(ValueStorageMode::SeparateActivelyPersisted.is_externalized());
    }

    #[test]
    fn only_actively_persisted_is_actively_persisted() {
        assert!(!ValueStorageMode::SeparateLazy.is_actively_persisted());
        assert!(ValueStorageMode::SeparateActivelyPersisted.is_actively_persisted());
    }

    #[test]
    fn default_cache_config_uses_five_minute_lock_ttl() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.lock_ttl, Duration::from_secs(300));
    }

    #[test]
    fn new_store_info_is_empty_and_in_node() {
        let si = StoreInfo::new("orders", 64, true, LogicalId::new());
        assert_eq!(si.count, 0);
        assert_eq!(si.value_storage_mode, ValueStorageMode::InNode);
        assert_eq!(si.registry_table, "orders/registry");
    }
}
