//! Type-erased per-backend record (spec §9)
//!
//! The orchestrator (`orchestrator.rs`) drives a two-phase commit across
//! however many B-trees one transaction touches, but it must not itself be
//! generic over each tree's key/value/payload types — that would force one
//! orchestrator instantiation per `(K, V, P)` combination a transaction
//! could ever mix. `StoreBackend` is the object-safe seam that erases
//! those type parameters: one open B-tree's [`vtree_storage::NodeRepository`]
//! and [`crate::item_tracker::ItemActionTracker`] pair, wrapped behind a
//! trait whose methods only ever take or return the non-generic commit
//! records those two already produce (`AddedCommit`, `UpdatedCommit`,
//! `RemovedCommit`, `AddedNodesPayload`, `TrackedValuePayload`, ...).
//!
//! Concrete implementations live in `vtree-engine`, where the real `(K, V,
//! P)` types and a `BTree<K, V>` implementation are in scope; this crate
//! only needs the trait.

use vtree_core::error::Result;
use vtree_core::payload::{AddedNodesPayload, BlobsPayload, RegistryPayload, TrackedValuePayload};
use vtree_core::{Handle, LogicalId, StoreInfo};
use vtree_storage::{AddedCommit, RemovedCommit, UpdatedCommit};

/// One open B-tree's commit surface, erased of its key/value/payload
/// types. Method names mirror the spec's phase-1/phase-2 operation names
/// directly so the orchestrator reads the way §4.E's prose does.
pub trait StoreBackend: Send {
    /// The store this backend serves, for diagnostics and lock-key scoping.
    fn store_name(&self) -> &str;

    /// Mark phase-1 as entered; node reads after this point skip the L1 MRU
    /// shortcut ([`vtree_storage::NodeRepository::enter_commit_phase`]).
    fn enter_commit_phase(&mut self);

    /// True if this backend tracked any non-`Get` item — the orchestrator
    /// only drives the lock protocol for backends that did.
    fn has_trackable_writes(&self) -> bool;

    /// `lock` (spec §4.B): attempt ownership of every tracked write item's
    /// distributed lock.
    fn lock_tracked_items(&mut self) -> Result<()>;

    /// `checkTrackedItems` (spec §4.B): re-validate (without attempting
    /// ownership) that this transaction's locks are still compatible —
    /// used by the retry loop to fail fast before redoing node commits.
    fn check_tracked_items(&mut self) -> Result<()>;

    /// Release every lock this backend's tracker actually acquired.
    fn unlock_tracked_items(&mut self) -> Result<()>;

    /// `commitTrackedItemsValues` (spec §4.B): externalize add/update
    /// values not already actively persisted.
    fn commit_tracked_items_values(&mut self) -> Result<()>;

    /// The rollback set `commitTrackedItemsValues` accumulated — `None`
    /// when values are stored in-node (nothing to undo or reclaim).
    fn tracked_items_values_for_cleanup(&self) -> Option<Vec<TrackedValuePayload>>;

    /// Undo or finalize a set of previously-externalized tracked values
    /// (shared by rollback and by phase-2's `deleteTrackedItemsValues`).
    fn delete_tracked_items_values(&mut self, payloads: &[TrackedValuePayload]) -> Result<()>;

    /// Purge the blobs for items `remove` staged on an actively-persisted
    /// store, once the commit has landed.
    fn delete_for_deletion_items(&mut self) -> Result<()>;

    /// `(logical_id, version)` for every node this backend read via `get`,
    /// for `areFetchedItemsIntact`'s re-validation.
    fn get_action_versions(&self) -> Vec<(LogicalId, u64)>;

    /// Re-read the registry for `get_action_versions()`'s IDs and confirm
    /// none has moved since it was read.
    fn are_fetched_items_intact(&mut self) -> Result<bool>;

    /// `commitNewRootNodes` (spec §4.C): `None` if this backend has no
    /// staged root node, or another writer already registered one.
    fn commit_new_root_nodes(&mut self) -> Result<Option<AddedCommit>>;

    /// `commitAddedNodes` (spec §4.C) for every staged `add` that wasn't
    /// claimed by `commit_new_root_nodes`.
    fn commit_added_nodes(&mut self) -> Result<AddedCommit>;

    /// `commitUpdatedNodes` (spec §4.C). `None` on a version conflict.
    fn commit_updated_nodes(&mut self) -> Result<Option<UpdatedCommit>>;

    /// `commitRemovedNodes` (spec §4.C). `None` on a version conflict or
    /// prior deletion.
    fn commit_removed_nodes(&mut self) -> Result<Option<RemovedCommit>>;

    /// Undo a landed `commitAddedNodes`.
    fn rollback_added_nodes(&mut self, payload: &AddedNodesPayload) -> Result<()>;

    /// Undo a `commitNewRootNodes` attempt. `was_registered` is false only
    /// for the live in-process path when the attempt's own registry write
    /// never happened (e.g. this backend never got a root commit to
    /// begin with); crash-recovery replay always passes `true`.
    fn rollback_new_root_nodes(&mut self, payload: &AddedNodesPayload, was_registered: bool) -> Result<()>;

    /// Undo a landed `commitUpdatedNodes`.
    fn rollback_updated_nodes(&mut self, nodes_are_locked: bool, commit: &UpdatedCommit) -> Result<()>;

    /// Undo a landed `commitRemovedNodes`.
    fn rollback_removed_nodes(&mut self, nodes_are_locked: bool, commit: &RemovedCommit) -> Result<()>;

    /// `touchNodes` (spec §4.C): version 0 -> 1, WIP cleared, for freshly
    /// added handles once the whole transaction has landed.
    fn touch_nodes(&self, handles: &[Handle]) -> Vec<Handle>;

    /// `activateInactiveNodes` (spec §4.C): clear the WIP marker (and the
    /// now-consumed inactive slot) on staged updated/removed handles.
    fn activate_inactive_nodes(&self, staged_handles: &[Handle]) -> Vec<Handle>;

    /// Publish a finalized batch of handles without taking locks — phase
    /// 2's atomic best-effort publish step.
    fn publish_finalized_handles(&mut self, handles: &[Handle]) -> Result<()>;

    /// `deleteObsoleteEntries` (spec §4.E phase-2 cleanup).
    fn delete_obsolete_entries(&mut self, payload: &AddedNodesPayload) -> Result<()>;

    /// The store's current metadata.
    fn store_info(&self) -> StoreInfo;

    /// `commitStoreInfo` (spec §4.C): persist updated metadata (e.g. a
    /// bumped `count` after an add/remove).
    fn commit_store_info(&mut self, info: StoreInfo) -> Result<()>;

    /// Restore a previously-persisted `StoreInfo` on rollback.
    fn restore_store_info(&mut self, info: StoreInfo) -> Result<()>;

    /// The refetch-and-merge closure (spec §4.F): reload this B-tree from
    /// scratch and replay tracked intents against the fresh view, after a
    /// conflict forces a retry.
    fn refetch_and_merge(&mut self) -> Result<()>;
}

/// Merge several backends' `commitAddedNodes`/`commitNewRootNodes`
/// payloads into the single combined payload one transaction-wide
/// `CommitAddedNodes`/`CommitNewRootNodes` log stage carries.
pub fn merge_added_payloads(payloads: impl IntoIterator<Item = AddedNodesPayload>) -> AddedNodesPayload {
    let mut registry = Vec::new();
    let mut blobs = Vec::new();
    for p in payloads {
        registry.extend(p.registry);
        blobs.extend(p.blobs);
    }
    AddedNodesPayload { registry, blobs }
}

/// Build the `deleteObsoleteEntries` payload for a landed `commitUpdatedNodes`:
/// no registry entries to unregister (the logical ID stays alive), just the
/// superseded pre-flip active blobs.
pub fn obsolete_payload_for_updated(commit: &UpdatedCommit, blob_table: &str) -> AddedNodesPayload {
    let ids = commit.original_handles.iter().map(|h| h.get_active_id()).collect();
    AddedNodesPayload {
        registry: Vec::new(),
        blobs: vec![BlobsPayload::new(blob_table, ids)],
    }
}

/// Build the `deleteObsoleteEntries` payload for a landed `commitRemovedNodes`:
/// the now-dead registry entries and their active blobs, reusing the
/// `(logical_id, physical_id)` pairing `RemovedNodesPayload::registry`
/// already carries.
pub fn obsolete_payload_for_removed(commit: &RemovedCommit, blob_table: &str) -> AddedNodesPayload {
    let ids: Vec<_> = commit.payload.registry.iter().map(|r| r.physical_id).collect();
    AddedNodesPayload {
        registry: commit.payload.registry.clone(),
        blobs: vec![BlobsPayload::new(blob_table, ids)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtree_core::PhysicalId;

    #[test]
    fn merge_added_payloads_concatenates() {
        let a = AddedNodesPayload {
            registry: vec![RegistryPayload::new(LogicalId::new(), PhysicalId::new())],
            blobs: vec![BlobsPayload::new("orders", vec![PhysicalId::new()])],
        };
        let b = AddedNodesPayload {
            registry: vec![RegistryPayload::new(LogicalId::new(), PhysicalId::new())],
            blobs: vec![],
        };
        let merged = merge_added_payloads(vec![a.clone(), b.clone()]);
        assert_eq!(merged.registry.len(), 2);
        assert_eq!(merged.blobs.len(), 1);
    }
}
