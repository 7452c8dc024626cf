//! Two-Phase Commit Orchestrator (spec §4.E)
//!
//! Drives one transaction's commit across however many [`StoreBackend`]s
//! it touched: phase 1 stages every mutation optimistically (locks, value
//! externalization, node commits, re-validation) and logs each stage as it
//! lands; any conflict rolls back this attempt's own staged work, replays
//! the refetch-and-merge closure against the backends that conflicted,
//! and retries until `max_time` elapses. Phase 2 is the atomic publish —
//! flip every staged handle live, then best-effort garbage-collect what
//! the commit made obsolete.

use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use vtree_core::error::{Error, Result};
use vtree_core::payload::{AddedNodesPayload, FinalizeCommitPayload, TrackedValuePayload};
use vtree_core::traits::{L2Cache, PriorityLog};
use vtree_core::{Clock, Handle, Stage, StoreInfo, TransactionId};
use vtree_durability::{acquire_locks, encode_payload, sorted_unique_keys, TransactionLogger};

use crate::backend::{merge_added_payloads, obsolete_payload_for_removed, obsolete_payload_for_updated, StoreBackend};

/// Lock key for a node touched by this commit attempt — distinct
/// namespace from the item-level lock keys `ItemActionTracker` forms, so
/// a node ID and an item ID never collide in the distributed cache.
fn node_lock_key(store_name: &str, logical_id: vtree_core::LogicalId) -> String {
    format!("node:{store_name}/{logical_id}")
}

/// `defaultLockDuration` (spec §4.D `acquireLocks`): the TTL used for the
/// batched node-key lock §4.E step 5 takes across every updated, removed,
/// or new-root node this attempt touched.
const NODE_LOCK_TTL: Duration = Duration::from_secs(300);

/// How much validation/commit work a transaction's orchestrator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// No tracked items, no node mutations — nothing to check or commit.
    NoCheck,
    /// Read-only: re-validate every tracked read is still intact, but
    /// stage no writes and take no locks.
    ForReading,
    /// The full two-phase commit.
    ForWriting,
}

/// Per-attempt bookkeeping for one [`StoreBackend`], enough to roll back
/// exactly what this attempt staged on this backend.
#[derive(Default)]
struct BackendAttempt {
    root: Option<vtree_storage::AddedCommit>,
    added: Option<vtree_storage::AddedCommit>,
    updated: Option<vtree_storage::UpdatedCommit>,
    removed: Option<vtree_storage::RemovedCommit>,
    prior_store_info: Option<StoreInfo>,
    locked: bool,
}

/// What phase 2 needs once every backend's phase-1 attempt has landed.
struct LandedAttempt {
    finalize_handles: Vec<(usize, Vec<Handle>)>,
    obsolete: AddedNodesPayload,
    obsolete_tracked_values: Vec<TrackedValuePayload>,
    priority_snapshot: Vec<Handle>,
    /// Lock keys §4.E step 5 acquired across every touched node, to release
    /// in phase 2 (`unlockNodesKeys`).
    node_keys: Vec<String>,
}

/// Drives one transaction's two-phase commit across a set of type-erased
/// [`StoreBackend`]s.
pub struct Orchestrator {
    transaction_id: TransactionId,
    mode: CommitMode,
    max_time: Duration,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RngCore + Send>,
    logger: TransactionLogger,
    /// The distributed cache's lock surface, shared across every backend,
    /// used only for §4.E step 5's batched node-key lock — item-level
    /// locks stay inside each backend's own tracker.
    node_cache: Arc<dyn L2Cache>,
}

impl Orchestrator {
    /// Construct an orchestrator for one transaction.
    pub fn new(
        transaction_id: TransactionId,
        mode: CommitMode,
        max_time: Duration,
        clock: Arc<dyn Clock>,
        rng: Box<dyn RngCore + Send>,
        logger: TransactionLogger,
        node_cache: Arc<dyn L2Cache>,
    ) -> Self {
        Orchestrator { transaction_id, mode, max_time, clock, rng, logger, node_cache }
    }

    /// Commit the transaction across every backend it touched.
    pub fn commit(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<()> {
        match self.mode {
            CommitMode::NoCheck => Ok(()),
            CommitMode::ForReading => self.commit_read_only(backends),
            CommitMode::ForWriting => self.commit_read_write(backends),
        }
    }

    fn commit_read_only(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<()> {
        for backend in backends.iter_mut() {
            backend.enter_commit_phase();
            if backend.has_trackable_writes() {
                backend.check_tracked_items()?;
            }
            if !backend.are_fetched_items_intact()? {
                return Err(Error::Conflict(format!("{}: a read item changed underneath this transaction", backend.store_name())));
            }
        }
        Ok(())
    }

    fn commit_read_write(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<()> {
        let deadline = self.clock.now_millis() + self.max_time.as_millis() as i64;
        let mut attempt_no: u32 = 0;
        loop {
            match self.try_phase1(backends) {
                Ok(landed) => return self.phase2(backends, landed),
                Err(e) if e.is_conflict() => {
                    if self.clock.now_millis() >= deadline {
                        return Err(Error::Timeout(format!("transaction {} exceeded its commit window: {e}", self.transaction_id)));
                    }
                    attempt_no += 1;
                    for backend in backends.iter_mut() {
                        backend.refetch_and_merge()?;
                    }
                    std::thread::sleep(jittered_backoff(self.rng.as_mut(), attempt_no));
                }
                Err(e) if e.is_sector_failure() => {
                    self.handle_sector_failure(backends)?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One phase-1 attempt across every backend, in the spec's logical
    /// stage order. On any conflict, rolls back exactly this attempt's
    /// own staged work before returning `Err(Error::Conflict(..))`.
    fn try_phase1(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<LandedAttempt> {
        let mut state: Vec<BackendAttempt> = backends.iter().map(|_| BackendAttempt::default()).collect();
        for backend in backends.iter_mut() {
            backend.enter_commit_phase();
        }

        if let Err(e) = self.lock_all(backends, &mut state) {
            self.rollback_attempt(backends, &mut state);
            return Err(e);
        }
        self.logger.log(Stage::LockTrackedItems, Vec::new())?;

        if let Err(e) = self.commit_tracked_values(backends) {
            self.rollback_attempt(backends, &mut state);
            return Err(e);
        }
        self.logger.log(Stage::CommitTrackedItemsValues, Vec::new())?;

        match self.commit_new_roots(backends, &mut state) {
            Ok(payload) => self.logger.log(Stage::CommitNewRootNodes, encode_payload(&payload)?)?,
            Err(e) => {
                self.rollback_attempt(backends, &mut state);
                return Err(e);
            }
        }

        match self.check_fetched_items_intact(backends) {
            Ok(true) => self.logger.log(Stage::AreFetchedItemsIntact, Vec::new())?,
            Ok(false) => {
                self.rollback_attempt(backends, &mut state);
                return Err(Error::Conflict("a tracked read node changed underneath this transaction".into()));
            }
            Err(e) => {
                self.rollback_attempt(backends, &mut state);
                return Err(e);
            }
        }

        match self.commit_updates(backends, &mut state) {
            Ok(()) => self.logger.log(Stage::CommitUpdatedNodes, Vec::new())?,
            Err(e) => {
                self.rollback_attempt(backends, &mut state);
                return Err(e);
            }
        }

        match self.commit_removals(backends, &mut state) {
            Ok(()) => self.logger.log(Stage::CommitRemovedNodes, Vec::new())?,
            Err(e) => {
                self.rollback_attempt(backends, &mut state);
                return Err(e);
            }
        }

        match self.commit_adds(backends, &mut state) {
            Ok(payload) => self.logger.log(Stage::CommitAddedNodes, encode_payload(&payload)?)?,
            Err(e) => {
                self.rollback_attempt(backends, &mut state);
                return Err(e);
            }
        }

        let node_keys = self.lock_touched_nodes(backends, &state);
        if let Err(e) = acquire_locks(self.node_cache.as_ref(), self.transaction_id, &node_keys, NODE_LOCK_TTL) {
            self.rollback_attempt(backends, &mut state);
            return Err(e);
        }

        match self.commit_store_infos(backends, &mut state) {
            Ok(()) => self.logger.log(Stage::CommitStoreInfo, Vec::new())?,
            Err(e) => {
                let _ = self.node_cache.unlock(&node_keys, self.transaction_id);
                self.rollback_attempt(backends, &mut state);
                return Err(e);
            }
        }

        let landed = self.assemble_landed_attempt(backends, &state, node_keys)?;
        self.logger.priority_log().add(self.transaction_id, landed.priority_snapshot.clone())?;
        self.logger.log(Stage::BeforeFinalize, Vec::new())?;

        Ok(landed)
    }

    /// §4.E step 5: every logical node ID this attempt touched via a
    /// root/added/updated/removed commit, as sorted+deduplicated lock
    /// keys ready for a single batched [`acquire_locks`] call.
    fn lock_touched_nodes(&self, backends: &[Box<dyn StoreBackend>], state: &[BackendAttempt]) -> Vec<String> {
        let mut keys = Vec::new();
        for (backend, attempt) in backends.iter().zip(state.iter()) {
            let name = backend.store_name();
            if let Some(root) = &attempt.root {
                keys.extend(root.handles.iter().map(|h| node_lock_key(name, h.logical_id)));
            }
            if let Some(added) = &attempt.added {
                keys.extend(added.handles.iter().map(|h| node_lock_key(name, h.logical_id)));
            }
            if let Some(updated) = &attempt.updated {
                keys.extend(updated.staged_handles.iter().map(|h| node_lock_key(name, h.logical_id)));
            }
            if let Some(removed) = &attempt.removed {
                keys.extend(removed.staged_handles.iter().map(|h| node_lock_key(name, h.logical_id)));
            }
        }
        sorted_unique_keys(keys)
    }

    fn lock_all(&mut self, backends: &mut [Box<dyn StoreBackend>], state: &mut [BackendAttempt]) -> Result<()> {
        for (backend, attempt) in backends.iter_mut().zip(state.iter_mut()) {
            if backend.has_trackable_writes() {
                backend.lock_tracked_items()?;
                attempt.locked = true;
            }
        }
        Ok(())
    }

    fn commit_tracked_values(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<()> {
        for backend in backends.iter_mut() {
            backend.commit_tracked_items_values()?;
        }
        Ok(())
    }

    fn commit_new_roots(&mut self, backends: &mut [Box<dyn StoreBackend>], state: &mut [BackendAttempt]) -> Result<AddedNodesPayload> {
        let mut payloads = Vec::new();
        for (backend, attempt) in backends.iter_mut().zip(state.iter_mut()) {
            if let Some(commit) = backend.commit_new_root_nodes()? {
                payloads.push(commit.payload.clone());
                attempt.root = Some(commit);
            }
        }
        Ok(merge_added_payloads(payloads))
    }

    fn check_fetched_items_intact(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<bool> {
        for backend in backends.iter_mut() {
            if !backend.are_fetched_items_intact()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn commit_updates(&mut self, backends: &mut [Box<dyn StoreBackend>], state: &mut [BackendAttempt]) -> Result<()> {
        for (backend, attempt) in backends.iter_mut().zip(state.iter_mut()) {
            match backend.commit_updated_nodes()? {
                Some(commit) => attempt.updated = Some(commit),
                None => return Err(Error::Conflict(format!("{}: updated node version conflict", backend.store_name()))),
            }
        }
        Ok(())
    }

    fn commit_removals(&mut self, backends: &mut [Box<dyn StoreBackend>], state: &mut [BackendAttempt]) -> Result<()> {
        for (backend, attempt) in backends.iter_mut().zip(state.iter_mut()) {
            match backend.commit_removed_nodes()? {
                Some(commit) => attempt.removed = Some(commit),
                None => return Err(Error::Conflict(format!("{}: removed node version conflict", backend.store_name()))),
            }
        }
        Ok(())
    }

    fn commit_adds(&mut self, backends: &mut [Box<dyn StoreBackend>], state: &mut [BackendAttempt]) -> Result<AddedNodesPayload> {
        let mut payloads = Vec::new();
        for (backend, attempt) in backends.iter_mut().zip(state.iter_mut()) {
            let commit = backend.commit_added_nodes()?;
            payloads.push(commit.payload.clone());
            attempt.added = Some(commit);
        }
        Ok(merge_added_payloads(payloads))
    }

    fn commit_store_infos(&mut self, backends: &mut [Box<dyn StoreBackend>], state: &mut [BackendAttempt]) -> Result<()> {
        for (backend, attempt) in backends.iter_mut().zip(state.iter_mut()) {
            let prior = backend.store_info();
            let mut updated = prior.clone();
            updated.count = updated
                .count
                .saturating_add(attempt.added.as_ref().map_or(0, |c| c.handles.len() as u64))
                .saturating_add(attempt.root.as_ref().map_or(0, |c| c.handles.len() as u64))
                .saturating_sub(attempt.removed.as_ref().map_or(0, |c| c.staged_handles.len() as u64));
            if updated != prior {
                backend.commit_store_info(updated)?;
                attempt.prior_store_info = Some(prior);
            }
        }
        Ok(())
    }

    fn assemble_landed_attempt(&self, backends: &mut [Box<dyn StoreBackend>], state: &[BackendAttempt], node_keys: Vec<String>) -> Result<LandedAttempt> {
        let mut finalize_handles = Vec::new();
        let mut obsolete = AddedNodesPayload { registry: Vec::new(), blobs: Vec::new() };
        let mut obsolete_tracked_values = Vec::new();
        let mut priority_snapshot = Vec::new();

        for (idx, (backend, attempt)) in backends.iter_mut().zip(state.iter()).enumerate() {
            let mut handles = Vec::new();
            if let Some(root) = &attempt.root {
                handles.extend(backend.touch_nodes(&root.handles));
            }
            if let Some(added) = &attempt.added {
                handles.extend(backend.touch_nodes(&added.handles));
            }
            if let Some(updated) = &attempt.updated {
                handles.extend(backend.activate_inactive_nodes(&updated.staged_handles));
                priority_snapshot.extend(updated.original_handles.clone());
                let table = backend.store_info().blob_table;
                let part = obsolete_payload_for_updated(updated, &table);
                obsolete.registry.extend(part.registry);
                obsolete.blobs.extend(part.blobs);
            }
            if let Some(removed) = &attempt.removed {
                handles.extend(backend.activate_inactive_nodes(&removed.staged_handles));
                priority_snapshot.extend(removed.original_handles.clone());
                let table = backend.store_info().blob_table;
                let part = obsolete_payload_for_removed(removed, &table);
                obsolete.registry.extend(part.registry);
                obsolete.blobs.extend(part.blobs);
            }
            if !handles.is_empty() {
                finalize_handles.push((idx, handles));
            }
            if let Some(values) = backend.tracked_items_values_for_cleanup() {
                obsolete_tracked_values.extend(values);
            }
        }

        Ok(LandedAttempt { finalize_handles, obsolete, obsolete_tracked_values, priority_snapshot, node_keys })
    }

    /// Phase 2 (spec §4.E `phase2Commit`): atomic publish, then
    /// best-effort cleanup, then release everything this transaction held.
    fn phase2(&mut self, backends: &mut [Box<dyn StoreBackend>], landed: LandedAttempt) -> Result<()> {
        let nothing_to_clean = landed.obsolete.registry.is_empty() && landed.obsolete.blobs.is_empty() && landed.obsolete_tracked_values.is_empty();
        if nothing_to_clean {
            self.logger.log(Stage::FinalizeCommit, Vec::new())?;
        } else {
            let payload = FinalizeCommitPayload {
                obsolete: landed.obsolete.clone(),
                obsolete_tracked_values: landed.obsolete_tracked_values.clone(),
            };
            self.logger.log(Stage::FinalizeCommit, encode_payload(&payload)?)?;
        }

        for (idx, handles) in &landed.finalize_handles {
            backends[*idx].publish_finalized_handles(handles)?;
        }
        self.logger.priority_log().remove(self.transaction_id)?;

        // `unlockNodesKeys` (spec §4.E phase2Commit step 3): best-effort,
        // same as unlockTrackedItems below — a node lock's 5-minute TTL
        // bounds the blast radius of a failed release.
        if let Err(e) = self.node_cache.unlock(&landed.node_keys, self.transaction_id) {
            tracing::warn!(transaction_id = %self.transaction_id, error = %e, "failed to release node-key locks after commit");
        }

        for backend in backends.iter_mut() {
            backend.delete_obsolete_entries(&landed.obsolete)?;
            backend.delete_for_deletion_items()?;
        }
        self.logger.log(Stage::DeleteObsoleteEntries, Vec::new())?;

        for backend in backends.iter_mut() {
            backend.delete_tracked_items_values(&landed.obsolete_tracked_values)?;
        }
        self.logger.log(Stage::DeleteTrackedItemsValues, Vec::new())?;

        for backend in backends.iter_mut() {
            backend.unlock_tracked_items()?;
        }
        self.logger.remove()?;
        Ok(())
    }

    /// Undo everything this attempt staged, in reverse stage order.
    fn rollback_attempt(&mut self, backends: &mut [Box<dyn StoreBackend>], state: &mut [BackendAttempt]) {
        for (backend, attempt) in backends.iter_mut().zip(state.iter_mut()) {
            if let Some(prior) = attempt.prior_store_info.take() {
                let _ = backend.restore_store_info(prior);
            }
            if let Some(added) = attempt.added.take() {
                let _ = backend.rollback_added_nodes(&added.payload);
            }
            if let Some(removed) = attempt.removed.take() {
                let _ = backend.rollback_removed_nodes(attempt.locked, &removed);
            }
            if let Some(updated) = attempt.updated.take() {
                let _ = backend.rollback_updated_nodes(attempt.locked, &updated);
            }
            if let Some(root) = attempt.root.take() {
                let _ = backend.rollback_new_root_nodes(&root.payload, true);
            }
            if let Some(values) = backend.tracked_items_values_for_cleanup() {
                let _ = backend.delete_tracked_items_values(&values);
            }
            if attempt.locked {
                let _ = backend.unlock_tracked_items();
                attempt.locked = false;
            }
        }
    }

    /// `handleRegistrySectorLockTimeout` (spec §4.E): a sector failure
    /// observed against the registry or L2 cache means this process can no
    /// longer trust its own view of what landed; fall back to the
    /// priority-log force-restore instead of attempting an ordinary
    /// rollback.
    fn handle_sector_failure(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<()> {
        for backend in backends.iter_mut() {
            let _ = backend.unlock_tracked_items();
        }
        tracing::warn!(transaction_id = %self.transaction_id, "sector failure during commit; leaving priority-log recovery to restore registry state");
        Ok(())
    }

    /// User-visible rollback: refuses once the commit is durably past
    /// `FinalizeCommit` (spec §4.E "Rollback (user-visible)").
    pub fn user_rollback(&mut self, backends: &mut [Box<dyn StoreBackend>]) -> Result<()> {
        if !self.logger.can_still_roll_back() {
            return Err(Error::Usage(format!("transaction {} already committed past finalize", self.transaction_id)));
        }
        let mut state: Vec<BackendAttempt> = backends.iter().map(|_| BackendAttempt::default()).collect();
        for attempt in state.iter_mut() {
            attempt.locked = true;
        }
        self.rollback_attempt(backends, &mut state);
        self.logger.remove()
    }
}

const BACKOFF_BASE_MS: u64 = 5;
const BACKOFF_CAP_MS: u64 = 250;

/// The (pre-jitter) upper bound for a given retry attempt: doubles each
/// attempt, capped so a long-running retry storm doesn't wait unboundedly
/// between attempts.
fn backoff_bound_millis(attempt_no: u32) -> u64 {
    BACKOFF_BASE_MS.saturating_mul(1u64 << attempt_no.min(8)).min(BACKOFF_CAP_MS)
}

/// Compute a jittered exponential backoff for phase-1 retry attempts
/// (spec §9 "injectable jitter RNG").
fn jittered_backoff(rng: &mut dyn RngCore, attempt_no: u32) -> Duration {
    let bound = backoff_bound_millis(attempt_no);
    let jitter = if bound == 0 { 0 } else { rng.next_u64() % bound };
    Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_backoff_stays_within_cap() {
        let mut rng = rand::rngs::mock::StepRng::new(u64::MAX / 2, 1);
        for attempt in 0..20 {
            let d = jittered_backoff(&mut rng, attempt);
            assert!(d.as_millis() <= 250);
        }
    }

    #[test]
    fn backoff_bound_grows_with_attempt_number_then_caps() {
        assert!(backoff_bound_millis(1) > backoff_bound_millis(0));
        assert!(backoff_bound_millis(3) > backoff_bound_millis(1));
        assert_eq!(backoff_bound_millis(6), 250);
        assert_eq!(backoff_bound_millis(20), 250);
    }
}
