//! Item Action Tracker (spec §4.B)
//!
//! One tracker per open B-tree per transaction: the per-item staging area
//! for `get`/`add`/`update`/`remove` intents, their distributed lock
//! protocol, and the value-externalization bookkeeping that drives the
//! commit's `commitTrackedItemsValues` stage.

use std::collections::HashMap;
use std::sync::Arc;
use vtree_core::error::{Error, Result};
use vtree_core::item::{CacheItem, Item};
use vtree_core::lock::{LockAction, LockRecord};
use vtree_core::payload::{BlobsPayload, TrackedValuePayload};
use vtree_core::traits::{BTree, BlobStore, L2Cache};
use vtree_core::{PhysicalId, StoreInfo, TransactionId};
use vtree_durability::{encode_payload, TransactionLogger};
use vtree_core::Stage;

fn lock_key(store_info: &StoreInfo, id: PhysicalId) -> String {
    format!("{}/{}", store_info.registry_table, id)
}

/// Staging area for one B-tree's tracked items within one transaction.
pub struct ItemActionTracker<K, V> {
    store_info: StoreInfo,
    blob_store: Arc<dyn BlobStore>,
    cache: Arc<dyn L2Cache>,
    items: HashMap<PhysicalId, CacheItem<K, V>>,
    for_deletion_items: Vec<PhysicalId>,
    /// Accumulated during `commit_tracked_items_values`; both
    /// `get_for_rollback_tracked_items_values` and
    /// `get_obsolete_tracked_items_values` read from the same set (spec
    /// §4.B: the rollback set *is* the obsolete set — an aborted commit
    /// undoes the new externalization, a landed one reclaims the old).
    obsolete_values: Vec<TrackedValuePayload>,
}

impl<K, V> ItemActionTracker<K, V>
where
    K: Clone,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned,
{
    /// Construct an empty tracker bound to one store's externalization
    /// configuration and collaborators.
    pub fn new(store_info: StoreInfo, blob_store: Arc<dyn BlobStore>, cache: Arc<dyn L2Cache>) -> Self {
        ItemActionTracker {
            store_info,
            blob_store,
            cache,
            items: HashMap::new(),
            for_deletion_items: Vec::new(),
            obsolete_values: Vec::new(),
        }
    }

    fn encode_value(value: &V) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| Error::Resource(format!("item value encode: {e}")))
    }

    fn decode_value(bytes: &[u8]) -> Result<V> {
        bincode::deserialize(bytes).map_err(|e| Error::Resource(format!("item value decode: {e}")))
    }

    fn resolve_value(&self, tracked: &mut CacheItem<K, V>) -> Result<()> {
        if !tracked.item.value_needs_fetch {
            return Ok(());
        }
        let key = tracked.item.id.to_string();
        if self.store_info.is_value_data_globally_cached {
            if let Ok(Some(bytes)) = self.cache.get_ex(&key, self.store_info.cache_config.l2_ttl) {
                if let Ok(value) = Self::decode_value(&bytes) {
                    tracked.item.resolve(value);
                    return Ok(());
                }
            }
        }
        if let Some(bytes) = self.blob_store.get_one(&self.store_info.blob_table, tracked.item.id)? {
            let value = Self::decode_value(&bytes)?;
            tracked.item.resolve(value);
        }
        Ok(())
    }

    /// `Get(item)` (spec §4.B): track for re-validation, resolving an
    /// externalized value on first sight. A no-op for already-tracked
    /// items.
    pub fn get(&mut self, item: Item<K, V>, transaction_id: TransactionId) -> Result<()> {
        if self.items.contains_key(&item.id) {
            return Ok(());
        }
        let lock = LockRecord::new(transaction_id, LockAction::Get);
        let mut tracked = CacheItem::new(lock, item);
        self.resolve_value(&mut tracked)?;
        self.items.insert(tracked.item.id, tracked);
        Ok(())
    }

    /// `Add(item)` (spec §4.B): track a brand-new item, eagerly
    /// externalizing its value and pre-commit logging the blob if the
    /// store is actively persisted.
    pub fn add(&mut self, mut item: Item<K, V>, transaction_id: TransactionId, logger: &mut TransactionLogger) -> Result<()> {
        item.version += 1;
        let lock = LockRecord::new(transaction_id, LockAction::Add);
        let mut tracked = CacheItem::new(lock, item);
        if self.store_info.value_storage_mode.is_actively_persisted() {
            self.externalize_actively_persisted(&mut tracked, logger)?;
        }
        self.items.insert(tracked.item.id, tracked);
        Ok(())
    }

    /// `Update(item)` (spec §4.B): re-track an `add` as a rewrite;
    /// otherwise stage an update, bumping the version exactly once per
    /// transaction (only on the transition from the originally-observed
    /// version).
    pub fn update(&mut self, item: Item<K, V>, transaction_id: TransactionId, logger: &mut TransactionLogger) -> Result<()> {
        if let Some(existing) = self.items.get(&item.id) {
            if existing.lock_record.action == LockAction::Add {
                let mut tracked = CacheItem::new(LockRecord::new(transaction_id, LockAction::Add), item);
                if self.store_info.value_storage_mode.is_actively_persisted() {
                    self.externalize_actively_persisted(&mut tracked, logger)?;
                }
                self.items.insert(tracked.item.id, tracked);
                return Ok(());
            }
        }
        let version_in_db = self.items.get(&item.id).map(|t| t.version_in_db).unwrap_or(item.version);
        let mut item = item;
        if item.version == version_in_db {
            item.version += 1;
        }
        let lock = LockRecord::new(transaction_id, LockAction::Update);
        let mut tracked = CacheItem::new(lock, item);
        tracked.version_in_db = version_in_db;
        if self.store_info.value_storage_mode.is_actively_persisted() {
            self.externalize_actively_persisted(&mut tracked, logger)?;
        }
        self.items.insert(tracked.item.id, tracked);
        Ok(())
    }

    /// `Remove(item)` (spec §4.B): drop an untracked-commit `add`, else
    /// stage a removal — re-tagging the item if it was already tracked
    /// (as a `get` or `update`), or tracking it fresh if this is the first
    /// time this transaction has touched it — and, if actively persisted,
    /// queue the blob for deletion.
    pub fn remove(&mut self, item: Item<K, V>, transaction_id: TransactionId) {
        let item_id = item.id;
        if let Some(existing) = self.items.get(&item_id) {
            if existing.lock_record.action == LockAction::Add {
                self.items.remove(&item_id);
                return;
            }
        }
        let lock = LockRecord::new(transaction_id, LockAction::Remove);
        match self.items.get(&item_id) {
            Some(existing) => {
                let mut tracked = existing.clone();
                tracked.lock_record = lock;
                self.items.insert(item_id, tracked);
            }
            None => {
                let tracked = CacheItem::new(lock, item);
                self.items.insert(item_id, tracked);
            }
        }
        if self.store_info.value_storage_mode.is_actively_persisted() {
            self.for_deletion_items.push(item_id);
        }
    }

    fn externalize_actively_persisted(&mut self, tracked: &mut CacheItem<K, V>, logger: &mut TransactionLogger) -> Result<()> {
        let bytes = tracked.item.value.as_ref().map(Self::encode_value).transpose()?.unwrap_or_default();
        self.blob_store.add(&self.store_info.blob_table, tracked.item.id, bytes.clone())?;
        if self.store_info.is_value_data_globally_cached {
            self.cache.set(&tracked.item.id.to_string(), bytes, Some(self.store_info.cache_config.l2_ttl))?;
        }
        tracked.item.externalize();
        tracked.persisted = true;
        let payload = BlobsPayload::new(self.store_info.blob_table.clone(), vec![tracked.item.id]);
        logger.log(Stage::AddActivelyPersistedItem, encode_payload(&payload)?)?;
        Ok(())
    }

    /// `checkTrackedItems` / `lock` (spec §4.B): for every tracked item
    /// whose action isn't `Get`, attempt (or re-validate) the distributed
    /// lock. `attempt_ownership = true` is `lock`; `false` is the
    /// re-validation-only `checkTrackedItems`.
    pub fn lock_or_check(&mut self, attempt_ownership: bool) -> Result<()> {
        let ids: Vec<PhysicalId> = self
            .items
            .iter()
            .filter(|(_, t)| t.lock_record.action != LockAction::Get)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            let key = lock_key(&self.store_info, id);
            let existing = vtree_core::codec::get_struct::<LockRecord>(self.cache.as_ref(), &key)?;
            let our_record = self.items.get(&id).expect("id came from items").lock_record;
            match existing {
                None => {
                    if attempt_ownership {
                        vtree_core::codec::set_struct(self.cache.as_ref(), &key, &our_record, Some(self.store_info.cache_config.lock_ttl))?;
                        let confirmed = vtree_core::codec::get_struct::<LockRecord>(self.cache.as_ref(), &key)?;
                        match confirmed {
                            Some(rec) if rec.lock_id == our_record.lock_id => {
                                if let Some(t) = self.items.get_mut(&id) {
                                    t.is_lock_owner = true;
                                }
                            }
                            _ => return Err(Error::Conflict(format!("can't attain a lock for {key}"))),
                        }
                    }
                }
                Some(other) if other.lock_id == our_record.lock_id => {
                    if attempt_ownership {
                        if let Some(t) = self.items.get_mut(&id) {
                            t.is_lock_owner = true;
                        }
                    }
                }
                Some(other) if other.compatible_with(&our_record) => {}
                Some(_) => return Err(Error::Conflict(format!("lock conflict on {key}"))),
            }
        }
        Ok(())
    }

    /// `unlock`: delete only the distributed lock keys this transaction
    /// actually owns.
    pub fn unlock(&mut self) -> Result<()> {
        let owned: Vec<String> = self
            .items
            .iter()
            .filter(|(_, t)| t.is_lock_owner)
            .map(|(id, _)| lock_key(&self.store_info, *id))
            .collect();
        for key in owned {
            self.cache.delete(&key)?;
        }
        Ok(())
    }

    /// True if this tracker has any item with a non-`Get` action — the
    /// orchestrator only runs the lock protocol for backends that do.
    pub fn has_trackable_writes(&self) -> bool {
        self.items.values().any(|t| t.lock_record.action != LockAction::Get)
    }

    /// `commitTrackedItemsValues` (spec §4.B): externalize add/update
    /// values that aren't already actively persisted, assigning the
    /// in-flight record a fresh physical ID and recording the superseded
    /// one as obsolete.
    pub fn commit_tracked_items_values(&mut self) -> Result<()> {
        if matches!(self.store_info.value_storage_mode, vtree_core::store_info::ValueStorageMode::InNode)
            || self.store_info.value_storage_mode.is_actively_persisted()
        {
            return Ok(());
        }
        let ids: Vec<PhysicalId> = self
            .items
            .iter()
            .filter(|(_, t)| matches!(t.lock_record.action, LockAction::Add | LockAction::Update) && !t.persisted)
            .map(|(id, _)| *id)
            .collect();
        for old_id in ids {
            let mut tracked = self.items.remove(&old_id).expect("id came from items");
            let is_update = tracked.lock_record.action == LockAction::Update;
            let new_id = PhysicalId::new();
            let bytes = tracked.item.value.as_ref().map(Self::encode_value).transpose()?.unwrap_or_default();
            self.blob_store.add(&self.store_info.blob_table, new_id, bytes.clone())?;
            let is_cached = self.store_info.is_value_data_globally_cached;
            if is_cached {
                self.cache.set(&new_id.to_string(), bytes, Some(self.store_info.cache_config.l2_ttl))?;
            }
            if is_update {
                self.obsolete_values.push(TrackedValuePayload {
                    is_cached,
                    blobs: BlobsPayload::new(self.store_info.blob_table.clone(), vec![old_id]),
                });
            }
            tracked.item.id = new_id;
            tracked.item.externalize();
            tracked.persisted = true;
            self.items.insert(new_id, tracked);
        }
        Ok(())
    }

    /// `getForRollbackTrackedItemsValues` (spec §4.B): `None` when values
    /// live in-node (nothing was externalized to undo).
    pub fn get_for_rollback_tracked_items_values(&self) -> Option<Vec<TrackedValuePayload>> {
        if matches!(self.store_info.value_storage_mode, vtree_core::store_info::ValueStorageMode::InNode) {
            None
        } else {
            Some(self.obsolete_values.clone())
        }
    }

    /// `getObsoleteTrackedItemsValues` (spec §4.B): the same accumulated
    /// set, read by phase-2 once the commit has landed.
    pub fn get_obsolete_tracked_items_values(&self) -> Option<Vec<TrackedValuePayload>> {
        self.get_for_rollback_tracked_items_values()
    }

    /// The logical IDs queued for deletion by `remove` on an
    /// actively-persisted store.
    pub fn for_deletion_items(&self) -> &[PhysicalId] {
        &self.for_deletion_items
    }

    /// `deleteTrackedItemsValues` (spec §4.B / §4.E phase-2 cleanup):
    /// purge a set of previously-externalized values — either the
    /// rollback set (an aborted commit undoing its own externalization)
    /// or the obsolete set (a landed commit reclaiming what it
    /// superseded). Best-effort: logs and continues past individual
    /// failures so one missing blob can't block the rest of the cleanup.
    pub fn delete_tracked_items_values(&self, payloads: &[TrackedValuePayload]) -> Result<()> {
        let mut last_err = None;
        for payload in payloads {
            for id in &payload.blobs.ids {
                if let Err(e) = self.blob_store.remove(&payload.blobs.table, *id) {
                    tracing::warn!(error = %e, table = %payload.blobs.table, blob = %id, "failed to remove tracked value blob");
                    last_err = Some(e);
                }
                if payload.is_cached {
                    if let Err(e) = self.cache.delete(&id.to_string()) {
                        tracing::warn!(error = %e, blob = %id, "failed to evict tracked value from cache");
                        last_err = Some(e);
                    }
                }
            }
        }
        last_err.map_or(Ok(()), Err)
    }

    /// Purge the blobs for items that were staged for deletion by
    /// `remove` on an actively-persisted store — the part of
    /// `commitRemovedNodes`'s cleanup that belongs to the item tracker
    /// rather than the node repository.
    pub fn delete_for_deletion_items(&self) -> Result<()> {
        let mut last_err = None;
        for id in &self.for_deletion_items {
            if let Err(e) = self.blob_store.remove(&self.store_info.blob_table, *id) {
                tracing::warn!(error = %e, blob = %id, "failed to remove item staged for deletion");
                last_err = Some(e);
            }
            if self.store_info.is_value_data_globally_cached {
                if let Err(e) = self.cache.delete(&id.to_string()) {
                    tracing::warn!(error = %e, blob = %id, "failed to evict deleted item from cache");
                    last_err = Some(e);
                }
            }
        }
        last_err.map_or(Ok(()), Err)
    }

    /// The refetch-and-merge closure's item replay (spec §4.F step 3):
    /// re-applies every tracked intent against a freshly re-rooted tree,
    /// adds first so a fresh add is visible to this same replay's later
    /// lookups of the same key. Locates each existing item by
    /// [`CacheItem::original_id`] rather than `item.id`, since a prior
    /// attempt's (now rolled-back) `commit_tracked_items_values` may
    /// already have reassigned `item.id` to a blob this attempt wrote but
    /// never committed.
    pub fn replay_after_refetch<T: BTree<K, V>>(&mut self, tree: &mut T) -> Result<()> {
        let in_node = matches!(self.store_info.value_storage_mode, vtree_core::store_info::ValueStorageMode::InNode);
        let ids: Vec<PhysicalId> = self.items.keys().copied().collect();
        let (adds, rest): (Vec<PhysicalId>, Vec<PhysicalId>) =
            ids.into_iter().partition(|id| self.items[id].lock_record.action == LockAction::Add);

        for id in adds {
            let tracked = self.items.get(&id).expect("id came from items");
            let key = tracked.item.key.clone();
            let merged = if in_node {
                let value = tracked.item.value.clone().expect("in-node add carries its value inline");
                tree.add(key, value)?
            } else {
                tree.add_item(tracked.item.clone())?
            };
            if !merged {
                return Err(Error::Conflict(format!("failed to merge add item {id}: duplicate key on a unique tree")));
            }
        }

        for id in rest {
            let tracked = self.items.get(&id).expect("id came from items");
            let key = tracked.item.key.clone();
            if !tree.find_with_id(&key, tracked.original_id)? {
                return Err(Error::Conflict(format!("tracked item {id} no longer resolves at its original location")));
            }
            let current = tree.get_current_item()?;
            if current.version != tracked.version_in_db {
                return Err(Error::Conflict(format!("tracked item {id} changed version underneath this transaction")));
            }
            match tracked.lock_record.action {
                LockAction::Get => {}
                LockAction::Update => {
                    if in_node {
                        let value = tracked.item.value.clone().expect("in-node update carries its value inline");
                        tree.update_current_item(value)?;
                    } else {
                        tree.update_current_node_item(tracked.item.clone())?;
                    }
                }
                LockAction::Remove => tree.remove_current_item()?,
                LockAction::Add => unreachable!("adds were partitioned out above"),
            }
        }
        Ok(())
    }

    /// Borrow a tracked item by its physical ID, if tracked.
    pub fn get_tracked(&self, id: PhysicalId) -> Option<&CacheItem<K, V>> {
        self.items.get(&id)
    }

    /// Number of items currently tracked.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if no items are tracked.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
