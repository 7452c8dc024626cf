//! Node Repository (spec §4.C)
//!
//! Staging cache of node mutations, plus the phase-1 staged commits that
//! reconcile them against the registry and blob store. One repository
//! exists per open B-tree per transaction; the shared [`L1Cache`] is the
//! only state that crosses transaction boundaries.
//!
//! **Implementer decision (recorded in full in `DESIGN.md`)**: §4.A's
//! `Activate()` (flip + version bump + WIP stamp) and §4.C's
//! `rollbackUpdatedNodes` ("clear inactive IDs and WIP") read, taken
//! together, as if rollback should undo an already-published flip by
//! *not* flipping back — which would leave the new content visible after
//! an aborted commit. We resolve this by having every staged commit
//! capture the pre-stage handles (`original_handles`) alongside the
//! post-`Activate()` ones (`staged_handles`): rollback republishes the
//! originals verbatim (trivially monotonic, trivially correct), and
//! phase-2 finalization clears the WIP marker on the staged copies
//! (`Handle::clear_wip`) rather than re-deriving the flip — and also
//! frees the inactive slot the flip consumed (`Handle::clear_inactive_id`),
//! since `allocate_inactive_id` otherwise refuses a second update forever.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use vtree_core::clock::Clock;
use vtree_core::error::{Error, Result};
use vtree_core::payload::{AddedNodesPayload, BlobsPayload, RegistryPayload, RemovedNodesPayload, UpdatedNodesPayload};
use vtree_core::traits::{BlobStore, Registry};
use vtree_core::{CacheAction, Handle, LogicalId, PhysicalId, StoreInfo};

use crate::l1_cache::L1Cache;
use crate::node::{CachedNode, Node};

/// Outcome of a successful `commitAddedNodes` / `commitNewRootNodes` call.
#[derive(Debug, Clone)]
pub struct AddedCommit {
    /// Freshly-registered handles, one per added node.
    pub handles: Vec<Handle>,
    /// Log payload recording what to undo on rollback.
    pub payload: AddedNodesPayload,
}

/// Outcome of a successful `commitUpdatedNodes` call.
#[derive(Debug, Clone)]
pub struct UpdatedCommit {
    /// Handles as read before staging — rollback republishes these as-is.
    pub original_handles: Vec<Handle>,
    /// Handles after `Activate()` (flipped, version bumped, WIP stamped)
    /// — what phase-1 actually wrote to the registry, and what phase-2
    /// clears the WIP marker on.
    pub staged_handles: Vec<Handle>,
    /// Log payload naming the newly-written shadow blobs.
    pub payload: UpdatedNodesPayload,
}

/// Outcome of a successful `commitRemovedNodes` call.
#[derive(Debug, Clone)]
pub struct RemovedCommit {
    /// Handles as read before staging.
    pub original_handles: Vec<Handle>,
    /// Handles with `is_deleted = true` and WIP stamped.
    pub staged_handles: Vec<Handle>,
    /// Log payload naming the logical IDs marked deleted.
    pub payload: RemovedNodesPayload,
}

/// Staging cache of node mutations for one B-tree within one transaction.
pub struct NodeRepository<P> {
    store_info: StoreInfo,
    registry: Arc<dyn Registry>,
    blob_store: Arc<dyn BlobStore>,
    l1: Arc<L1Cache<P>>,
    clock: Arc<dyn Clock>,
    local_cache: HashMap<LogicalId, CachedNode<P>>,
    read_nodes_cache: LruCache<LogicalId, Node<P>>,
    /// `0` while the transaction is still accumulating user operations
    /// (pre-commit); bumped once phase-1 begins. Mirrors the orchestrator's
    /// `phaseDone` but only cares about the `0` vs `>0` distinction for
    /// deciding whether the L1 MRU is worth consulting.
    phase: u8,
}

impl<P> NodeRepository<P>
where
    P: Clone + serde::Serialize + serde::de::DeserializeOwned,
{
    /// Construct a repository for one open B-tree.
    pub fn new(
        store_info: StoreInfo,
        registry: Arc<dyn Registry>,
        blob_store: Arc<dyn BlobStore>,
        l1: Arc<L1Cache<P>>,
        clock: Arc<dyn Clock>,
        read_cache_capacity: usize,
    ) -> Self {
        let cap = NonZeroUsize::new(read_cache_capacity.max(1)).expect("capacity must be > 0");
        NodeRepository {
            store_info,
            registry,
            blob_store,
            l1,
            clock,
            local_cache: HashMap::new(),
            read_nodes_cache: LruCache::new(cap),
            phase: 0,
        }
    }

    /// Mark phase-1 (or later) has begun; the L1 MRU shortcut in `get` is
    /// only valid pre-commit.
    pub fn enter_commit_phase(&mut self) {
        self.phase = 1;
    }

    fn encode(node: &Node<P>) -> Result<Vec<u8>> {
        bincode::serialize(node).map_err(|e| Error::Resource(format!("node encode: {e}")))
    }

    fn decode(bytes: &[u8]) -> Result<Node<P>> {
        bincode::deserialize(bytes).map_err(|e| Error::Resource(format!("node decode: {e}")))
    }

    /// Stage a `get` intent: records that the node was read for the
    /// `areFetchedItemsIntact` re-validation, without changing content.
    pub fn stage_get(&mut self, node: Node<P>) {
        self.local_cache.entry(node.id).or_insert_with(|| CachedNode::with_node(CacheAction::Get, node));
    }

    /// Stage an `add` intent (a brand-new node the out-of-scope B-tree
    /// library just allocated).
    pub fn stage_add(&mut self, node: Node<P>) {
        self.local_cache.insert(node.id, CachedNode::with_node(CacheAction::Add, node));
    }

    /// Stage an `update` intent.
    pub fn stage_update(&mut self, node: Node<P>) {
        let id = node.id;
        match self.local_cache.get(&id) {
            Some(existing) if existing.action == CacheAction::Add => {
                self.local_cache.insert(id, CachedNode::with_node(CacheAction::Add, node));
            }
            _ => {
                self.local_cache.insert(id, CachedNode::with_node(CacheAction::Update, node));
            }
        }
    }

    /// Stage a `remove` intent (spec §4.C `remove`). Keeps the cached
    /// node's content (rather than the nil-node `CachedNode::removed()`
    /// shape) so `commit_removed_nodes`'s version check has something to
    /// compare against.
    pub fn remove(&mut self, id: LogicalId) {
        if let Some(existing) = self.local_cache.get(&id) {
            if existing.action == CacheAction::Add {
                self.local_cache.remove(&id);
                return;
            }
        }
        if let Some(node) = self.read_nodes_cache.peek(&id).cloned() {
            self.local_cache.insert(id, CachedNode::with_node(CacheAction::Remove, node));
        }
    }

    /// All nodes currently staged under the given action, for the
    /// orchestrator to hand to the matching `commit_*_nodes` call without
    /// itself knowing node internals.
    pub fn staged_by_action(&self, action: CacheAction) -> Vec<Node<P>> {
        self.local_cache.values().filter(|c| c.action == action).filter_map(|c| c.node.clone()).collect()
    }

    /// `(logical_id, version)` for every node staged with a `get` action —
    /// the set `areFetchedItemsIntact` (spec §4.E) re-validates against
    /// the registry after node locks are acquired.
    pub fn get_action_versions(&self) -> Vec<(LogicalId, u64)> {
        self.local_cache
            .values()
            .filter(|c| c.action == CacheAction::Get)
            .filter_map(|c| c.node.as_ref().map(|n| (n.id, n.version)))
            .collect()
    }

    /// Discard all per-transaction staging (spec §4.F refetch-and-merge
    /// step 1: "clear the node repository's `localCache` and
    /// `readNodesCache`").
    pub fn clear(&mut self) {
        self.local_cache.clear();
        self.read_nodes_cache.clear();
    }

    /// Fetch a node by logical ID (spec §4.C `get`).
    pub fn get(&mut self, id: LogicalId) -> Result<Option<Node<P>>> {
        if let Some(cached) = self.local_cache.get(&id) {
            if cached.action == CacheAction::Remove {
                return Ok(None);
            }
            if let Some(node) = &cached.node {
                return Ok(Some(node.clone()));
            }
        }
        if let Some(node) = self.read_nodes_cache.get(&id) {
            return Ok(Some(node.clone()));
        }
        if self.phase == 0 {
            if let Some(handle) = self.l1.get_handle(id) {
                if let Some(node) = self.l1.get_node(id, handle.version) {
                    self.read_nodes_cache.put(id, node.clone());
                    return Ok(Some(node));
                }
            }
        }
        let handles = self.registry.get(&[id])?;
        let handle = match handles.into_iter().next().flatten() {
            Some(h) => h,
            None => return Ok(None),
        };
        let bytes = self.blob_store.get_one(&self.store_info.blob_table, handle.get_active_id())?;
        let node = match bytes {
            Some(bytes) => Self::decode(&bytes)?,
            None => return Ok(None),
        };
        self.read_nodes_cache.put(id, node.clone());
        self.l1.put_handle(handle);
        self.l1.put_node(node.clone());
        Ok(Some(node))
    }

    /// `commitAddedNodes` (spec §4.C): register brand-new nodes. No
    /// version check — these logical IDs never existed before.
    pub fn commit_added_nodes(&mut self, nodes: &[Node<P>]) -> Result<AddedCommit> {
        let mut handles = Vec::with_capacity(nodes.len());
        let mut registry_entries = Vec::with_capacity(nodes.len());
        let mut blob_ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            let physical_id = PhysicalId::new();
            self.blob_store.add(&self.store_info.blob_table, physical_id, Self::encode(node)?)?;
            handles.push(Handle::new(node.id, physical_id));
            registry_entries.push(RegistryPayload::new(node.id, physical_id));
            blob_ids.push(physical_id);
        }
        self.registry.add(&handles)?;
        Ok(AddedCommit {
            handles,
            payload: AddedNodesPayload {
                registry: registry_entries,
                blobs: vec![BlobsPayload::new(self.store_info.blob_table.clone(), blob_ids)],
            },
        })
    }

    /// `commitNewRootNodes` (spec §4.C): register a brand-new root, but
    /// only if no Handle is already registered for it — another writer
    /// racing to create the store's first root wins otherwise.
    pub fn commit_new_root_nodes(&mut self, nodes: &[Node<P>]) -> Result<Option<AddedCommit>> {
        let ids: Vec<LogicalId> = nodes.iter().map(|n| n.id).collect();
        let existing = self.registry.get(&ids)?;
        if existing.iter().any(|h| h.is_some()) {
            return Ok(None);
        }
        self.commit_added_nodes(nodes).map(Some)
    }

    /// `commitUpdatedNodes` (spec §4.C): shadow-write new content to an
    /// inactive slot and flip active, conditional on every handle's
    /// version still matching the caller's view.
    pub fn commit_updated_nodes(&mut self, nodes: &[Node<P>]) -> Result<Option<UpdatedCommit>> {
        let ids: Vec<LogicalId> = nodes.iter().map(|n| n.id).collect();
        let current = self.registry.get(&ids)?;
        let mut originals = Vec::with_capacity(nodes.len());
        for (node, handle) in nodes.iter().zip(current.iter()) {
            match handle {
                Some(h) if h.version == node.version => originals.push(h.clone()),
                _ => return Ok(None),
            }
        }

        let mut staged = Vec::with_capacity(nodes.len());
        let mut new_blob_ids = Vec::with_capacity(nodes.len());
        for (node, original) in nodes.iter().zip(originals.iter()) {
            let mut copy = original.clone();
            copy.allocate_inactive_id().map_err(|e| Error::Resource(e.to_string()))?;
            let new_id = copy.get_inactive_id().expect("just allocated");
            self.blob_store.add(&self.store_info.blob_table, new_id, Self::encode(node)?)?;
            copy.activate(self.clock.as_ref()).map_err(|e| Error::Resource(e.to_string()))?;
            new_blob_ids.push(new_id);
            staged.push(copy);
        }

        self.registry.update_no_locks(true, &staged)?;

        Ok(Some(UpdatedCommit {
            original_handles: originals,
            staged_handles: staged,
            payload: UpdatedNodesPayload {
                inactive_blobs: vec![BlobsPayload::new(self.store_info.blob_table.clone(), new_blob_ids)],
            },
        }))
    }

    /// `commitRemovedNodes` (spec §4.C): mark handles logically deleted,
    /// conditional on no prior deletion and a matching version.
    pub fn commit_removed_nodes(&mut self, nodes: &[Node<P>]) -> Result<Option<RemovedCommit>> {
        let ids: Vec<LogicalId> = nodes.iter().map(|n| n.id).collect();
        let current = self.registry.get(&ids)?;
        let mut originals = Vec::with_capacity(nodes.len());
        for (node, handle) in nodes.iter().zip(current.iter()) {
            match handle {
                Some(h) if !h.is_deleted && h.version == node.version => originals.push(h.clone()),
                _ => return Ok(None),
            }
        }
        let staged: Vec<Handle> = originals
            .iter()
            .map(|h| {
                let mut c = h.clone();
                c.is_deleted = true;
                c.work_in_progress_timestamp = self.clock.now_millis();
                c
            })
            .collect();
        self.registry.update_no_locks(true, &staged)?;
        Ok(Some(RemovedCommit {
            original_handles: originals,
            staged_handles: staged.clone(),
            payload: RemovedNodesPayload {
                registry: staged.iter().map(|h| RegistryPayload::new(h.logical_id, h.get_active_id())).collect(),
            },
        }))
    }

    /// Undo `commitAddedNodes`: unregister and remove blobs, tolerating
    /// individual failures and surfacing the last one observed.
    ///
    /// Takes the wire payload rather than the live [`AddedCommit`] so the
    /// same method serves both the in-process optimistic-retry rollback
    /// and the durability layer's crash-recovery log replay, which only
    /// ever has the persisted payload to work from.
    pub fn rollback_added_nodes(&mut self, payload: &AddedNodesPayload) -> Result<()> {
        self.unregister_and_purge(payload)
    }

    /// `deleteObsoleteEntries` (spec §4.E phase-2 cleanup): once a commit
    /// has finalized, remove the registry entries and blobs the commit
    /// made obsolete — the removed nodes' entries and dead active blobs,
    /// plus updated nodes' superseded pre-flip active blobs (tracked as
    /// `payload.blobs` groups, not tied 1:1 to a registry entry). The
    /// on-wire shape is identical to a `commitAddedNodes` rollback's undo
    /// set, so both share `unregister_and_purge`.
    pub fn delete_obsolete_entries(&mut self, payload: &AddedNodesPayload) -> Result<()> {
        self.unregister_and_purge(payload)
    }

    fn unregister_and_purge(&mut self, payload: &AddedNodesPayload) -> Result<()> {
        let mut last_err = None;
        for entry in &payload.registry {
            if let Err(e) = self.registry.remove(&[entry.logical_id]) {
                last_err = Some(e);
            }
            self.evict(entry.logical_id);
        }
        if let Err(e) = self.remove_nodes(&payload.blobs) {
            last_err = Some(e);
        }
        last_err.map_or(Ok(()), Err)
    }

    /// Undo `commitNewRootNodes`: always removes blobs and evicts caches;
    /// only unregisters the Handles if the transaction got far enough
    /// that they were durably registered (spec §4.C `rollbackNewRootNodes`).
    pub fn rollback_new_root_nodes(&mut self, payload: &AddedNodesPayload, was_registered: bool) -> Result<()> {
        let mut last_err = None;
        if was_registered {
            for entry in &payload.registry {
                if let Err(e) = self.registry.remove(&[entry.logical_id]) {
                    last_err = Some(e);
                }
            }
        }
        for entry in &payload.registry {
            self.evict(entry.logical_id);
        }
        if let Err(e) = self.remove_nodes(&payload.blobs) {
            last_err = Some(e);
        }
        last_err.map_or(Ok(()), Err)
    }

    /// Undo `commitUpdatedNodes`: republish the pre-stage handles and
    /// purge the shadow blobs written this attempt.
    pub fn rollback_updated_nodes(&mut self, nodes_are_locked: bool, commit: &UpdatedCommit) -> Result<()> {
        if nodes_are_locked {
            self.registry.update_no_locks(false, &commit.original_handles)?;
        } else {
            self.registry.update(&commit.original_handles)?;
        }
        let result = self.remove_nodes(&commit.payload.inactive_blobs);
        for h in &commit.original_handles {
            self.evict(h.logical_id);
        }
        result
    }

    /// Undo `commitRemovedNodes`: republish the pre-stage handles
    /// (clearing `is_deleted` and the WIP marker).
    pub fn rollback_removed_nodes(&mut self, nodes_are_locked: bool, commit: &RemovedCommit) -> Result<()> {
        if nodes_are_locked {
            self.registry.update_no_locks(false, &commit.original_handles)?;
        } else {
            self.registry.update(&commit.original_handles)?;
        }
        for h in &commit.original_handles {
            self.evict(h.logical_id);
        }
        Ok(())
    }

    /// Undo `commitRemovedNodes` from a persisted log payload rather than
    /// a live [`RemovedCommit`]: the wire payload only names the logical
    /// IDs that were marked deleted, not their pre-stage handle snapshot,
    /// so this re-fetches the current (staged) handle and clears
    /// `is_deleted` and the WIP marker directly rather than republishing
    /// an original. Used by the durability layer's crash-recovery replay.
    pub fn rollback_removed_nodes_from_payload(&mut self, nodes_are_locked: bool, payload: &RemovedNodesPayload) -> Result<()> {
        let ids: Vec<LogicalId> = payload.registry.iter().map(|e| e.logical_id).collect();
        let current = self.registry.get(&ids)?;
        let mut restored = Vec::with_capacity(ids.len());
        for handle in current.into_iter().flatten() {
            let mut c = handle;
            c.is_deleted = false;
            c.clear_wip();
            restored.push(c);
        }
        if restored.is_empty() {
            return Ok(());
        }
        if nodes_are_locked {
            self.registry.update_no_locks(false, &restored)?;
        } else {
            self.registry.update(&restored)?;
        }
        for h in &restored {
            self.evict(h.logical_id);
        }
        Ok(())
    }

    /// Delete a batch of blobs (used by `rollbackUpdatedNodes` and
    /// directly by the durability layer's stage-specific rollback for
    /// `commitUpdatedNodes` log entries).
    pub fn remove_nodes(&mut self, blobs: &[BlobsPayload<PhysicalId>]) -> Result<()> {
        let mut last_err = None;
        for group in blobs {
            for id in &group.ids {
                if let Err(e) = self.blob_store.remove(&group.table, *id) {
                    last_err = Some(e);
                }
            }
        }
        last_err.map_or(Ok(()), Err)
    }

    /// Finalize added nodes after phase-1 succeeds fully: version 0 -> 1,
    /// confirming no WIP marker lingers (spec §4.C `touchNodes`).
    pub fn touch_nodes(&self, handles: &[Handle]) -> Vec<Handle> {
        handles
            .iter()
            .map(|h| {
                let mut c = h.clone();
                c.touch();
                c
            })
            .collect()
    }

    /// Finalize updated/removed nodes after phase-1 succeeds fully: clear
    /// the WIP marker the staged handle carried, and free the inactive
    /// slot the flip consumed (spec §4.C `activateInactiveNodes`; see the
    /// module decision note for why this doesn't re-flip or re-bump).
    /// Freeing the inactive slot matters beyond bookkeeping:
    /// `Handle::allocate_inactive_id` permanently refuses to allocate
    /// while it's still populated, so without this a node could only ever
    /// be updated once.
    pub fn activate_inactive_nodes(&self, staged_handles: &[Handle]) -> Vec<Handle> {
        staged_handles
            .iter()
            .map(|h| {
                let mut c = h.clone();
                c.clear_wip();
                c.clear_inactive_id();
                c
            })
            .collect()
    }

    fn evict(&mut self, id: LogicalId) {
        self.local_cache.remove(&id);
        self.read_nodes_cache.pop(&id);
        self.l1.remove_handle(id);
        self.l1.remove_node(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory_blob_store::InMemoryBlobStore;
    use crate::in_memory_registry::InMemoryRegistry;
    use vtree_core::clock::ManualClock;
    use vtree_core::traits::L2Cache;

    struct NoopL2;
    impl L2Cache for NoopL2 {
        fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<std::time::Duration>) -> Result<()> {
            Ok(())
        }
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn get_ex(&self, _key: &str, _ttl: std::time::Duration) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            Ok(vec![None; keys.len()])
        }
        fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        fn lock(
            &self,
            _keys: &[String],
            _owner: vtree_core::TransactionId,
            _ttl: std::time::Duration,
        ) -> Result<vtree_core::traits::LockOutcome> {
            Ok(vtree_core::traits::LockOutcome { acquired: true, confirmed: true })
        }
        fn unlock(&self, _keys: &[String], _owner: vtree_core::TransactionId) -> Result<()> {
            Ok(())
        }
        fn is_locked(&self, _keys: &[String], _owner: vtree_core::TransactionId) -> Result<bool> {
            Ok(true)
        }
        fn lock_owner(&self, _key: &str) -> Result<Option<vtree_core::TransactionId>> {
            Ok(None)
        }
    }

    fn fixture() -> NodeRepository<String> {
        let store_info = StoreInfo::new("orders", 4, true, LogicalId::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let l1 = Arc::new(L1Cache::new(Arc::new(NoopL2), 8, 64));
        let clock = Arc::new(ManualClock::new(1000));
        NodeRepository::new(store_info, registry, blob_store, l1, clock, 16)
    }

    #[test]
    fn commit_added_then_get_round_trips() {
        let mut repo = fixture();
        let node = Node::new(LogicalId::new(), "leaf-a".to_string());
        let commit = repo.commit_added_nodes(&[node.clone()]).unwrap();
        assert_eq!(commit.handles.len(), 1);
        let fetched = repo.get(node.id).unwrap();
        assert_eq!(fetched, Some(node));
    }

    #[test]
    fn new_root_fails_when_already_registered() {
        let mut repo = fixture();
        let node = Node::new(LogicalId::new(), "root".to_string());
        repo.commit_new_root_nodes(&[node.clone()]).unwrap();
        let second = repo.commit_new_root_nodes(&[node]).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn updated_nodes_conflict_on_version_mismatch() {
        let mut repo = fixture();
        let node = Node::new(LogicalId::new(), "v0".to_string());
        repo.commit_added_nodes(&[node.clone()]).unwrap();
        let mut stale = node.clone();
        stale.version = 7;
        let result = repo.commit_updated_nodes(&[stale]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn updated_nodes_commit_then_rollback_restores_original() {
        let mut repo = fixture();
        let node = Node::new(LogicalId::new(), "v0".to_string());
        let added = repo.commit_added_nodes(&[node.clone()]).unwrap();
        let original_before = added.handles[0].clone();

        let mut updated = node.clone();
        updated.payload = "v1".to_string();
        let commit = repo.commit_updated_nodes(&[updated]).unwrap().expect("no conflict");
        assert_eq!(commit.original_handles[0], original_before);
        assert_ne!(commit.staged_handles[0].active_is_a, original_before.active_is_a);

        repo.rollback_updated_nodes(true, &commit).unwrap();
        let restored = repo.registry.get(&[node.id]).unwrap().into_iter().next().unwrap().unwrap();
        assert_eq!(restored, original_before);
    }

    #[test]
    fn removed_nodes_conflict_when_already_deleted() {
        let mut repo = fixture();
        let node = Node::new(LogicalId::new(), "v0".to_string());
        repo.commit_added_nodes(&[node.clone()]).unwrap();
        let first = repo.commit_removed_nodes(&[node.clone()]).unwrap();
        assert!(first.is_some());
        let second = repo.commit_removed_nodes(&[node]).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn remove_downgrades_only_when_read_cached() {
        let mut repo = fixture();
        let id = LogicalId::new();
        repo.remove(id);
        assert!(repo.local_cache.get(&id).is_none());

        let node = Node::new(id, "v0".to_string());
        repo.commit_added_nodes(&[node.clone()]).unwrap();
        repo.get(id).unwrap();
        repo.remove(id);
        let cached = repo.local_cache.get(&id).unwrap();
        assert_eq!(cached.action, CacheAction::Remove);
        assert!(cached.node.is_some());
    }

    #[test]
    fn activate_inactive_nodes_frees_the_slot_for_a_second_update() {
        let mut repo = fixture();
        let node = Node::new(LogicalId::new(), "v0".to_string());
        repo.commit_added_nodes(&[node.clone()]).unwrap();

        let mut v1 = node.clone();
        v1.payload = "v1".to_string();
        let commit = repo.commit_updated_nodes(&[v1.clone()]).unwrap().expect("no conflict");
        let finalized = repo.activate_inactive_nodes(&commit.staged_handles);
        assert!(finalized[0].get_inactive_id().is_none());
        repo.registry.update_no_locks(false, &finalized).unwrap();

        let mut v2 = v1;
        v2.version = finalized[0].version;
        v2.payload = "v2".to_string();
        let second = repo.commit_updated_nodes(&[v2]).unwrap();
        assert!(second.is_some(), "a second update must be able to allocate a fresh inactive slot");
    }

    #[test]
    fn delete_obsolete_entries_removes_registry_and_blobs() {
        let mut repo = fixture();
        let node = Node::new(LogicalId::new(), "v0".to_string());
        let added = repo.commit_added_nodes(&[node.clone()]).unwrap();
        repo.delete_obsolete_entries(&added.payload).unwrap();
        assert!(repo.registry.get(&[node.id]).unwrap()[0].is_none());
    }

    #[test]
    fn staged_by_action_and_get_action_versions_reflect_local_cache() {
        let mut repo = fixture();
        let added_node = Node::new(LogicalId::new(), "a".to_string());
        repo.stage_add(added_node.clone());
        let get_node = Node::new(LogicalId::new(), "g".to_string());
        repo.stage_get(get_node.clone());

        assert_eq!(repo.staged_by_action(CacheAction::Add), vec![added_node]);
        assert_eq!(repo.get_action_versions(), vec![(get_node.id, get_node.version)]);

        repo.clear();
        assert!(repo.staged_by_action(CacheAction::Add).is_empty());
        assert!(repo.get_action_versions().is_empty());
    }
}
