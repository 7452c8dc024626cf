//! Wiring one open B-tree's [`StrataBTree`] and [`ItemActionTracker`]
//! together behind both a typed user-facing API and the type-erased
//! [`StoreBackend`] seam the orchestrator drives (spec §9).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use vtree_core::error::{Error, Result};
use vtree_core::traits::{BTree, Registry, StoreRepository};
use vtree_core::{CacheAction, Handle, LogicalId, StoreInfo, TransactionId};
use vtree_core::payload::{AddedNodesPayload, TrackedValuePayload};
use vtree_core::store_info::ValueStorageMode;
use vtree_storage::{AddedCommit, RemovedCommit, UpdatedCommit};
use vtree_concurrency::{ItemActionTracker, StoreBackend};
use vtree_durability::TransactionLogger;

use crate::btree::StrataBTree;

/// One open B-tree within one transaction: the typed cursor operations a
/// caller drives plus, once done, the type-erased commit surface the
/// orchestrator drives.
pub struct Tree<K, V> {
    store_name: String,
    store_repo: Arc<dyn StoreRepository>,
    registry: Arc<dyn Registry>,
    store_info: StoreInfo,
    btree: StrataBTree<K, V>,
    tracker: ItemActionTracker<K, V>,
}

impl<K, V> Tree<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// Wrap an already-constructed tree/tracker pair bound to one store's
    /// current metadata. Used by [`crate::database::TypedStore::attach`].
    pub fn new(
        store_name: String,
        store_repo: Arc<dyn StoreRepository>,
        registry: Arc<dyn Registry>,
        store_info: StoreInfo,
        btree: StrataBTree<K, V>,
        tracker: ItemActionTracker<K, V>,
    ) -> Self {
        Tree { store_name, store_repo, registry, store_info, btree, tracker }
    }

    /// `Get` (spec §4.B): read a key's current value, tracking it for
    /// re-validation at commit time.
    pub fn get(&mut self, key: &K, transaction_id: TransactionId) -> Result<Option<V>> {
        if !self.btree.find(key)? {
            return Ok(None);
        }
        let item = self.btree.get_current_item()?;
        let id = item.id;
        self.tracker.get(item, transaction_id)?;
        Ok(self.tracker.get_tracked(id).and_then(|t| t.item.value.clone()))
    }

    /// `Add` (spec §4.B): insert a brand-new key, tracking it for the
    /// value-externalization and lock protocol. Returns `false` without
    /// tracking anything if the store is unique and the key already exists.
    pub fn add(&mut self, key: K, value: V, transaction_id: TransactionId, logger: &mut TransactionLogger) -> Result<bool> {
        let in_node = matches!(self.store_info.value_storage_mode, ValueStorageMode::InNode);
        let item = vtree_core::Item::new(key.clone(), value.clone());
        let inserted = if in_node { self.btree.add(key, value)? } else { self.btree.add_item(item.clone())? };
        if inserted {
            self.tracker.add(item, transaction_id, logger)?;
        }
        Ok(inserted)
    }

    /// `Update` (spec §4.B): rewrite an existing key's value. Returns
    /// `false` without tracking anything if the key doesn't exist.
    pub fn update(&mut self, key: &K, value: V, transaction_id: TransactionId, logger: &mut TransactionLogger) -> Result<bool> {
        if !self.btree.find(key)? {
            return Ok(false);
        }
        let mut current = self.btree.get_current_item()?;
        current.value = Some(value.clone());
        let id = current.id;
        self.tracker.update(current, transaction_id, logger)?;
        let synced = self.tracker.get_tracked(id).map(|t| t.item.clone()).expect("just tracked");
        if matches!(self.store_info.value_storage_mode, ValueStorageMode::InNode) {
            self.btree.update_current_item(value)?;
        } else {
            self.btree.update_current_node_item(synced)?;
        }
        Ok(true)
    }

    /// `Remove` (spec §4.B): delete an existing key. Returns `false`
    /// without tracking anything if the key doesn't exist.
    pub fn remove(&mut self, key: &K, transaction_id: TransactionId) -> Result<bool> {
        if !self.btree.find(key)? {
            return Ok(false);
        }
        let item = self.btree.get_current_item()?;
        self.tracker.remove(item, transaction_id);
        self.btree.remove_current_item()?;
        Ok(true)
    }
}

impl<K, V> StoreBackend for Tree<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    fn store_name(&self) -> &str {
        &self.store_name
    }

    fn enter_commit_phase(&mut self) {
        self.btree.node_repo_mut().enter_commit_phase();
    }

    fn has_trackable_writes(&self) -> bool {
        self.tracker.has_trackable_writes()
    }

    fn lock_tracked_items(&mut self) -> Result<()> {
        self.tracker.lock_or_check(true)
    }

    fn check_tracked_items(&mut self) -> Result<()> {
        self.tracker.lock_or_check(false)
    }

    fn unlock_tracked_items(&mut self) -> Result<()> {
        self.tracker.unlock()
    }

    fn commit_tracked_items_values(&mut self) -> Result<()> {
        self.tracker.commit_tracked_items_values()
    }

    fn tracked_items_values_for_cleanup(&self) -> Option<Vec<TrackedValuePayload>> {
        self.tracker.get_for_rollback_tracked_items_values()
    }

    fn delete_tracked_items_values(&mut self, payloads: &[TrackedValuePayload]) -> Result<()> {
        self.tracker.delete_tracked_items_values(payloads)
    }

    fn delete_for_deletion_items(&mut self) -> Result<()> {
        self.tracker.delete_for_deletion_items()
    }

    fn get_action_versions(&self) -> Vec<(LogicalId, u64)> {
        self.btree.node_repo().get_action_versions()
    }

    fn are_fetched_items_intact(&mut self) -> Result<bool> {
        let versions = self.btree.node_repo().get_action_versions();
        if versions.is_empty() {
            return Ok(true);
        }
        let ids: Vec<LogicalId> = versions.iter().map(|(id, _)| *id).collect();
        let current = self.registry.get(&ids)?;
        for ((_, expected_version), handle) in versions.iter().zip(current.iter()) {
            match handle {
                Some(h) if h.version == *expected_version => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn commit_new_root_nodes(&mut self) -> Result<Option<AddedCommit>> {
        if !self.btree.take_new_root_pending() {
            return Ok(None);
        }
        let root_id = self.btree.root_id();
        let root_node = self
            .btree
            .node_repo_mut()
            .get(root_id)?
            .ok_or_else(|| Error::Resource("pending new root missing from staging".into()))?;
        match self.btree.node_repo_mut().commit_new_root_nodes(std::slice::from_ref(&root_node))? {
            Some(commit) => Ok(Some(commit)),
            None => Err(Error::Conflict(format!("{}: root already created by another writer", self.store_name))),
        }
    }

    fn commit_added_nodes(&mut self) -> Result<AddedCommit> {
        let root_id = self.btree.root_id();
        let nodes: Vec<_> = self.btree.node_repo().staged_by_action(CacheAction::Add).into_iter().filter(|n| n.id != root_id).collect();
        self.btree.node_repo_mut().commit_added_nodes(&nodes)
    }

    fn commit_updated_nodes(&mut self) -> Result<Option<UpdatedCommit>> {
        let nodes = self.btree.node_repo().staged_by_action(CacheAction::Update);
        self.btree.node_repo_mut().commit_updated_nodes(&nodes)
    }

    fn commit_removed_nodes(&mut self) -> Result<Option<RemovedCommit>> {
        let nodes = self.btree.node_repo().staged_by_action(CacheAction::Remove);
        self.btree.node_repo_mut().commit_removed_nodes(&nodes)
    }

    fn rollback_added_nodes(&mut self, payload: &AddedNodesPayload) -> Result<()> {
        self.btree.node_repo_mut().rollback_added_nodes(payload)
    }

    fn rollback_new_root_nodes(&mut self, payload: &AddedNodesPayload, was_registered: bool) -> Result<()> {
        self.btree.node_repo_mut().rollback_new_root_nodes(payload, was_registered)
    }

    fn rollback_updated_nodes(&mut self, nodes_are_locked: bool, commit: &UpdatedCommit) -> Result<()> {
        self.btree.node_repo_mut().rollback_updated_nodes(nodes_are_locked, commit)
    }

    fn rollback_removed_nodes(&mut self, nodes_are_locked: bool, commit: &RemovedCommit) -> Result<()> {
        self.btree.node_repo_mut().rollback_removed_nodes(nodes_are_locked, commit)
    }

    fn touch_nodes(&self, handles: &[Handle]) -> Vec<Handle> {
        self.btree.node_repo().touch_nodes(handles)
    }

    fn activate_inactive_nodes(&self, staged_handles: &[Handle]) -> Vec<Handle> {
        self.btree.node_repo().activate_inactive_nodes(staged_handles)
    }

    fn publish_finalized_handles(&mut self, handles: &[Handle]) -> Result<()> {
        self.registry.update_no_locks(false, handles)
    }

    fn delete_obsolete_entries(&mut self, payload: &AddedNodesPayload) -> Result<()> {
        self.btree.node_repo_mut().delete_obsolete_entries(payload)
    }

    fn store_info(&self) -> StoreInfo {
        self.store_info.clone()
    }

    fn commit_store_info(&mut self, info: StoreInfo) -> Result<()> {
        self.store_repo.update(info.clone())?;
        self.store_info = info;
        Ok(())
    }

    fn restore_store_info(&mut self, info: StoreInfo) -> Result<()> {
        self.store_repo.update(info.clone())?;
        self.store_info = info;
        Ok(())
    }

    fn refetch_and_merge(&mut self) -> Result<()> {
        self.btree.node_repo_mut().clear();
        let info = self
            .store_repo
            .get_with_ttl(&self.store_name)?
            .ok_or_else(|| Error::Usage(format!("store {} has no metadata to refetch", self.store_name)))?;
        self.btree.refresh_root(&info)?;
        self.tracker.replay_after_refetch(&mut self.btree)?;
        self.store_info = info;
        Ok(())
    }
}
