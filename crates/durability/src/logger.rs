//! Transaction Logger (spec §4.D)
//!
//! Wraps a pluggable [`TransactionLog`] backend with the `committedState`
//! cursor and the rollback policy: given the log entries a transaction
//! accumulated before it crashed or aborted, decide which undo actions
//! apply and in what order. The actual I/O for each undo action — node
//! repository calls, store repository restores — lives with the callers
//! that hold the generic, per-B-tree state this crate deliberately stays
//! free of; `plan_rollback` returns a plain, ordered list of
//! [`RollbackAction`]s and leaves executing them to the caller (the
//! two-phase commit orchestrator during live retry, or the recovery
//! sweeper during crash replay), matching §9's type-erased collaborator
//! boundary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use vtree_core::error::{Error, Result};
use vtree_core::payload::{AddedNodesPayload, BlobsPayload, FinalizeCommitPayload, RemovedNodesPayload, TrackedValuePayload, UpdatedNodesPayload};
use vtree_core::traits::{PriorityLog, Registry, TransactionLog, TransactionLogEntry};
use vtree_core::{PhysicalId, Stage, StoreInfo, TransactionId};

/// Serialize a log payload the way every stage's payload is framed on the
/// wire, distinct from the node blob encoding `vtree-storage` uses.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).map_err(|e| Error::Resource(format!("log payload encode: {e}")))
}

fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::Resource(format!("log payload decode: {e}")))
}

/// One undo step produced by [`plan_rollback`], in the order the caller
/// should apply them.
#[derive(Debug, Clone)]
pub enum RollbackAction {
    /// Undo a pre-commit `addActivelyPersistedItem` log: remove the blob
    /// it externalized.
    RemoveActivelyPersistedBlob(BlobsPayload<PhysicalId>),
    /// Undo `commitStoreInfo`: restore the prior `StoreInfo`.
    RestoreStoreInfo(StoreInfo),
    /// Undo `commitAddedNodes`.
    RollbackAddedNodes(AddedNodesPayload),
    /// Undo `commitNewRootNodes`; `true` iff the Handles were durably
    /// registered (the transaction got past this stage) and must also be
    /// unregistered, not just have their blobs removed.
    RollbackNewRootNodes(AddedNodesPayload, bool),
    /// Undo `commitUpdatedNodes`: purge the staged inactive blobs. The
    /// registry undo is implicit in handle semantics (see
    /// [`vtree_core::payload::UpdatedNodesPayload`]'s doc comment) and is
    /// not part of this action.
    RemoveUpdatedNodeBlobs(UpdatedNodesPayload),
    /// Undo `commitRemovedNodes`: clear `is_deleted` and the WIP marker.
    RollbackRemovedNodes(RemovedNodesPayload),
    /// Undo `commitTrackedItemsValues` (and `finalizeCommit`'s tracked
    /// superseded-value cleanup): delete the named tracked values.
    DeleteTrackedItemsValues(Vec<TrackedValuePayload>),
    /// `finalizeCommit` reached `deleteObsoleteEntries`: replay that
    /// cleanup instead of rolling back (the commit already landed).
    DeleteObsoleteEntries(AddedNodesPayload),
}

/// Build the ordered undo plan for one transaction's log entries (spec
/// §4.D `rollback`). `logs` must be in append order; this iterates them
/// in reverse, the way `committedState` (the last entry's stage) decides
/// which branches fire.
///
/// Returns `Ok(vec![])` for the nil-payload `finalizeCommit` success case
/// (nothing to undo — the transaction already committed durably and the
/// caller should just remove its log entry).
pub fn plan_rollback(logs: &[TransactionLogEntry]) -> Result<Vec<RollbackAction>> {
    let mut actions = Vec::new();
    let last_stage = match logs.last() {
        Some(e) => e.stage,
        None => return Ok(actions),
    };

    for entry in logs.iter().rev() {
        match entry.stage {
            Stage::AddActivelyPersistedItem => {
                let payload: BlobsPayload<PhysicalId> = decode_payload(&entry.payload)?;
                actions.push(RollbackAction::RemoveActivelyPersistedBlob(payload));
            }
            Stage::FinalizeCommit => {
                if entry.payload.is_empty() {
                    if last_stage >= Stage::DeleteObsoleteEntries {
                        return Ok(Vec::new());
                    }
                    continue;
                }
                let payload: FinalizeCommitPayload = decode_payload(&entry.payload)?;
                if last_stage == Stage::DeleteTrackedItemsValues {
                    actions.push(RollbackAction::DeleteTrackedItemsValues(payload.obsolete_tracked_values));
                }
                if last_stage >= Stage::DeleteObsoleteEntries {
                    actions.push(RollbackAction::DeleteObsoleteEntries(payload.obsolete));
                }
            }
            Stage::CommitStoreInfo => {
                if last_stage > Stage::CommitStoreInfo {
                    let info: StoreInfo = decode_payload(&entry.payload)?;
                    actions.push(RollbackAction::RestoreStoreInfo(info));
                }
            }
            Stage::CommitAddedNodes => {
                if last_stage > Stage::CommitAddedNodes {
                    let payload: AddedNodesPayload = decode_payload(&entry.payload)?;
                    actions.push(RollbackAction::RollbackAddedNodes(payload));
                }
            }
            Stage::CommitRemovedNodes => {
                if last_stage > Stage::CommitRemovedNodes {
                    let payload: RemovedNodesPayload = decode_payload(&entry.payload)?;
                    actions.push(RollbackAction::RollbackRemovedNodes(payload));
                }
            }
            Stage::CommitNewRootNodes => {
                if last_stage > Stage::CommitNewRootNodes {
                    let payload: AddedNodesPayload = decode_payload(&entry.payload)?;
                    // The log-replay call site only ever fires this guard
                    // when the transaction durably got past this stage, so
                    // `was_registered` is always true here; the orchestrator's
                    // live in-process rollback (same attempt, not log-driven)
                    // computes it independently from whether the commit call
                    // itself succeeded.
                    actions.push(RollbackAction::RollbackNewRootNodes(payload, true));
                }
            }
            Stage::CommitUpdatedNodes => {
                if last_stage >= Stage::CommitUpdatedNodes {
                    let payload: UpdatedNodesPayload = decode_payload(&entry.payload)?;
                    actions.push(RollbackAction::RemoveUpdatedNodeBlobs(payload));
                }
            }
            Stage::CommitTrackedItemsValues => {
                if last_stage >= Stage::CommitTrackedItemsValues {
                    let payload: Vec<TrackedValuePayload> = decode_payload(&entry.payload)?;
                    actions.push(RollbackAction::DeleteTrackedItemsValues(payload));
                }
            }
            Stage::LockTrackedItems | Stage::AreFetchedItemsIntact | Stage::BeforeFinalize | Stage::DeleteObsoleteEntries | Stage::DeleteTrackedItemsValues => {
                // No direct undo: locks are released by the orchestrator's
                // own unlock sweep, not the log-replay plan, and these
                // phase-2 stages only ever trail a `finalizeCommit` entry
                // already handled above.
            }
        }
    }
    Ok(actions)
}

/// `priorityRollback` (spec §4.D): force-restore a transaction's registry
/// state from its priority snapshot, for use by a surviving peer when the
/// owning transaction crashed mid-commit. A missing snapshot means the
/// transaction never reached `beforeFinalize`, so there's nothing to
/// restore beyond removing the (already-absent) priority entry.
pub fn priority_rollback(priority_log: &dyn PriorityLog, registry: &dyn Registry, transaction_id: TransactionId) -> Result<()> {
    let snapshot = priority_log.get(transaction_id)?;
    match snapshot {
        None => priority_log.remove(transaction_id),
        Some(handles) => {
            registry
                .update_no_locks(false, &handles)
                .map_err(|e| Error::sector_failure_with_tid(format!("priority rollback registry restore failed: {e}"), transaction_id))?;
            priority_log.remove(transaction_id)
        }
    }
}

/// `doPriorityRollbacks` (spec §4.D): drain up to `limit` pending priority
/// snapshots, restoring each one. The coordinator lock (`Prbs` in the
/// spec) and the 5-minute bound are the caller's responsibility — this
/// function assumes the caller already holds exclusivity for the
/// duration of the call, matching the type-erased collaborator split the
/// rest of this crate keeps (distributed-lock acquisition lives with the
/// `L2Cache` seam, not here).
///
/// For each snapshot: write a resumable backup, remove the primary entry,
/// attempt `acquire_locks` on the snapshot's IDs, verify the registry's
/// current version is within one of the snapshot's version (tolerating a
/// single successful-but-unconfirmed finalize between snapshot and now),
/// then force-restore and release the backup.
pub fn do_priority_rollbacks(
    priority_log: &dyn PriorityLog,
    registry: &dyn Registry,
    cache: &dyn vtree_core::L2Cache,
    limit: usize,
    lock_ttl: Duration,
) -> Result<u64> {
    let mut restored = 0u64;
    for (transaction_id, snapshot) in priority_log.get_batch(limit)? {
        priority_log.write_backup(transaction_id, &snapshot)?;
        priority_log.remove(transaction_id)?;

        let keys: Vec<String> = snapshot.iter().map(|h| h.logical_id.to_string()).collect();
        let sorted = crate::locks::sorted_unique_keys(keys);
        if let Err(e) = crate::locks::acquire_locks(cache, transaction_id, &sorted, lock_ttl) {
            warn!(?transaction_id, error = %e, "doPriorityRollbacks: could not acquire locks, leaving backup for retry");
            continue;
        }

        let mut version_ok = true;
        for snap_handle in &snapshot {
            let current = registry.get(&[snap_handle.logical_id])?.into_iter().next().flatten();
            let tolerable = matches!(&current, Some(h) if h.version == snap_handle.version || h.version == snap_handle.version + 1);
            if !tolerable {
                version_ok = false;
                break;
            }
        }
        if !version_ok {
            warn!(?transaction_id, "doPriorityRollbacks: registry version outside tolerance, deferring to sector-failure failover");
            cache.unlock(&sorted, transaction_id).ok();
            continue;
        }

        registry.update_no_locks(false, &snapshot)?;
        cache.unlock(&sorted, transaction_id)?;
        priority_log.remove_backup(transaction_id)?;
        restored += 1;
    }
    Ok(restored)
}

/// Cursor + backend wrapper a transaction carries through its lifetime
/// (spec §4.D). `committed_state` tracks the highest stage logged so far,
/// used by both the live commit loop and post-crash replay to decide how
/// far a transaction got.
pub struct TransactionLogger {
    transaction_id: TransactionId,
    backend: Arc<dyn TransactionLog>,
    logging: bool,
    committed_state: Option<Stage>,
}

impl TransactionLogger {
    /// Construct a logger for one transaction. `logging = false` is the
    /// `NoCheck`/read-only orchestrator mode, where stages still advance
    /// `committed_state` locally but nothing is appended to the backend.
    pub fn new(transaction_id: TransactionId, backend: Arc<dyn TransactionLog>, logging: bool) -> Self {
        TransactionLogger {
            transaction_id,
            backend,
            logging,
            committed_state: None,
        }
    }

    /// The highest stage this transaction has reached.
    pub fn committed_state(&self) -> Option<Stage> {
        self.committed_state
    }

    /// `log(stage, payload)`: advance the cursor and, if logging is
    /// enabled, append to the backend.
    pub fn log(&mut self, stage: Stage, payload: Vec<u8>) -> Result<()> {
        self.committed_state = Some(stage);
        if self.logging {
            self.backend.add(self.transaction_id, stage, payload)?;
        }
        Ok(())
    }

    /// Fetch this transaction's own log entries (used when re-entering a
    /// rollback after a partial attempt within the same process).
    pub fn entries(&self) -> Result<Vec<TransactionLogEntry>> {
        self.backend.entries_for(self.transaction_id)
    }

    /// Remove this transaction's log entry outright (successful commit,
    /// or a completed rollback).
    pub fn remove(&self) -> Result<()> {
        self.backend.remove(self.transaction_id)
    }

    /// Refuse rollback once the transaction is durably committed (spec
    /// §4.E "Rollback (user-visible)").
    pub fn can_still_roll_back(&self) -> bool {
        !matches!(self.committed_state, Some(s) if s > Stage::FinalizeCommit)
    }

    /// This transaction's priority sub-log, for the `beforeFinalize`
    /// snapshot write and its cleanup.
    pub fn priority_log(&self) -> &dyn PriorityLog {
        self.backend.priority_log()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory_transaction_log::InMemoryTransactionLog;
    use vtree_core::clock::ManualClock;
    use vtree_core::payload::RegistryPayload;
    use vtree_core::LogicalId;

    fn entry(tid: TransactionId, stage: Stage, payload: Vec<u8>) -> TransactionLogEntry {
        TransactionLogEntry { transaction_id: tid, stage, payload }
    }

    #[test]
    fn plan_rollback_on_empty_log_is_empty() {
        assert!(plan_rollback(&[]).unwrap().is_empty());
    }

    #[test]
    fn finalize_commit_with_nil_payload_past_delete_obsolete_is_success_case() {
        let tid = TransactionId::new();
        let logs = vec![
            entry(tid, Stage::CommitStoreInfo, vec![]),
            entry(tid, Stage::FinalizeCommit, vec![]),
            entry(tid, Stage::DeleteObsoleteEntries, vec![]),
        ];
        assert!(plan_rollback(&logs).unwrap().is_empty());
    }

    #[test]
    fn commit_added_nodes_rolls_back_when_transaction_progressed_further() {
        let tid = TransactionId::new();
        let payload = AddedNodesPayload {
            registry: vec![RegistryPayload::new(LogicalId::new(), PhysicalId::new())],
            blobs: vec![BlobsPayload::new("orders", vec![PhysicalId::new()])],
        };
        let logs = vec![
            entry(tid, Stage::CommitAddedNodes, encode_payload(&payload).unwrap()),
            entry(tid, Stage::CommitStoreInfo, encode_payload(&StoreInfo::new("orders", 1, true, LogicalId::new())).unwrap()),
        ];
        let plan = plan_rollback(&logs).unwrap();
        assert!(plan.iter().any(|a| matches!(a, RollbackAction::RollbackAddedNodes(_))));
        assert!(plan.iter().any(|a| matches!(a, RollbackAction::RestoreStoreInfo(_))));
    }

    #[test]
    fn commit_added_nodes_alone_needs_no_rollback() {
        let tid = TransactionId::new();
        let payload = AddedNodesPayload { registry: vec![], blobs: vec![] };
        let logs = vec![entry(tid, Stage::CommitAddedNodes, encode_payload(&payload).unwrap())];
        let plan = plan_rollback(&logs).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn commit_updated_nodes_purges_blobs_without_registry_action() {
        let tid = TransactionId::new();
        let payload = UpdatedNodesPayload { inactive_blobs: vec![BlobsPayload::new("orders", vec![PhysicalId::new()])] };
        let logs = vec![entry(tid, Stage::CommitUpdatedNodes, encode_payload(&payload).unwrap())];
        let plan = plan_rollback(&logs).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan[0], RollbackAction::RemoveUpdatedNodeBlobs(_)));
    }

    #[test]
    fn logger_tracks_committed_state_and_refuses_rollback_past_finalize() {
        let backend = Arc::new(InMemoryTransactionLog::new(Arc::new(ManualClock::new(0))));
        let mut logger = TransactionLogger::new(TransactionId::new(), backend, true);
        assert!(logger.can_still_roll_back());
        logger.log(Stage::CommitAddedNodes, vec![]).unwrap();
        assert!(logger.can_still_roll_back());
        logger.log(Stage::FinalizeCommit, vec![]).unwrap();
        assert!(logger.can_still_roll_back());
        logger.log(Stage::DeleteObsoleteEntries, vec![]).unwrap();
        assert!(!logger.can_still_roll_back());
    }

    #[test]
    fn logging_disabled_still_advances_cursor_without_appending() {
        let backend = Arc::new(InMemoryTransactionLog::new(Arc::new(ManualClock::new(0))));
        let tid = TransactionId::new();
        let mut logger = TransactionLogger::new(tid, backend.clone(), false);
        logger.log(Stage::CommitAddedNodes, vec![1, 2, 3]).unwrap();
        assert_eq!(logger.committed_state(), Some(Stage::CommitAddedNodes));
        assert!(backend.entries_for(tid).unwrap().is_empty());
    }

    #[test]
    fn priority_rollback_with_no_snapshot_just_removes() {
        let backend = InMemoryTransactionLog::new(Arc::new(ManualClock::new(0)));
        let registry = vtree_storage::InMemoryRegistry::new();
        let tid = TransactionId::new();
        priority_rollback(backend.priority_log(), &registry, tid).unwrap();
    }

    #[test]
    fn priority_rollback_restores_registry_from_snapshot() {
        let backend = InMemoryTransactionLog::new(Arc::new(ManualClock::new(0)));
        let registry = vtree_storage::InMemoryRegistry::new();
        let handle = vtree_core::Handle::new(LogicalId::new(), vtree_core::PhysicalId::new());
        registry.add(&[handle.clone()]).unwrap();

        let mut stale_copy = handle.clone();
        stale_copy.is_deleted = true;
        registry.update(&[stale_copy]).unwrap();

        let tid = TransactionId::new();
        backend.priority_log().add(tid, vec![handle.clone()]).unwrap();
        priority_rollback(backend.priority_log(), &registry, tid).unwrap();

        let restored = registry.get(&[handle.logical_id]).unwrap().into_iter().next().unwrap().unwrap();
        assert_eq!(restored, handle);
        assert_eq!(backend.priority_log().get(tid).unwrap(), None);
    }

    #[test]
    fn do_priority_rollbacks_restores_within_tolerance() {
        let backend = InMemoryTransactionLog::new(Arc::new(ManualClock::new(0)));
        let registry = vtree_storage::InMemoryRegistry::new();
        let cache = vtree_storage::InMemoryL2Cache::new(Arc::new(ManualClock::new(0)));
        let handle = vtree_core::Handle::new(LogicalId::new(), vtree_core::PhysicalId::new());
        registry.add(&[handle.clone()]).unwrap();

        let mut bumped = handle.clone();
        bumped.version += 1;
        registry.update(&[bumped]).unwrap();

        let tid = TransactionId::new();
        backend.priority_log().add(tid, vec![handle.clone()]).unwrap();

        let restored = do_priority_rollbacks(backend.priority_log(), &registry, &cache, 20, Duration::from_secs(300)).unwrap();
        assert_eq!(restored, 1);
        assert_eq!(backend.priority_log().get(tid).unwrap(), None);
    }

    #[test]
    fn do_priority_rollbacks_defers_when_version_out_of_tolerance() {
        let backend = InMemoryTransactionLog::new(Arc::new(ManualClock::new(0)));
        let registry = vtree_storage::InMemoryRegistry::new();
        let cache = vtree_storage::InMemoryL2Cache::new(Arc::new(ManualClock::new(0)));
        let handle = vtree_core::Handle::new(LogicalId::new(), vtree_core::PhysicalId::new());
        registry.add(&[handle.clone()]).unwrap();

        let mut far_ahead = handle.clone();
        far_ahead.version += 5;
        registry.update(&[far_ahead]).unwrap();

        let tid = TransactionId::new();
        backend.priority_log().add(tid, vec![handle.clone()]).unwrap();

        let restored = do_priority_rollbacks(backend.priority_log(), &registry, &cache, 20, Duration::from_secs(300)).unwrap();
        assert_eq!(restored, 0);
    }
}
