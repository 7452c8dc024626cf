//! Seams for the four external collaborators (spec §6) plus the store
//! repository.
//!
//! Per §1 these are "named, not specified": the registry, blob store, L2
//! cache, and transaction log are out of scope as concrete systems
//! (cassandra/redis glue and friends), but the transaction manager needs a
//! contract to program against. Each trait here is kept object-safe — no
//! generic methods — so the orchestrator can hold them as `Arc<dyn ...>`
//! the way §9's "type-erased per-backend record" requires. Anything that
//! would naturally be generic (`SetStruct`/`GetStruct` in the spec) is
//! instead a free function in [`crate::codec`] layered on the byte-level
//! methods below.

use crate::error::Result;
use crate::handle::Handle;
use crate::item::Item;
use crate::stage::Stage;
use crate::store_info::StoreInfo;
use crate::types::{LogicalId, PhysicalId, TransactionId};
use std::time::Duration;

/// Authoritative logical-to-physical identity and version map (spec §6).
pub trait Registry: Send + Sync {
    /// Insert-only; fails on duplicate logical ID.
    fn add(&self, handles: &[Handle]) -> Result<()>;

    /// Overwrite, taking the registry's own internal locking.
    fn update(&self, handles: &[Handle]) -> Result<()>;

    /// Overwrite without internal locking — the caller already holds the
    /// distributed locks covering these logical IDs. `all_or_nothing=true`
    /// is phase-1 staging semantics (any single failure aborts the whole
    /// batch); `false` is phase-2's best-effort publish.
    fn update_no_locks(&self, all_or_nothing: bool, handles: &[Handle]) -> Result<()>;

    /// Fetch handles by logical ID; entries with no registered handle come
    /// back as `None` in the corresponding slot.
    fn get(&self, logical_ids: &[LogicalId]) -> Result<Vec<Option<Handle>>>;

    /// Remove registry entries outright (used once a logical ID's deletion
    /// has been finalized).
    fn remove(&self, logical_ids: &[LogicalId]) -> Result<()>;
}

/// Content-addressed node and value payload store (spec §6).
pub trait BlobStore: Send + Sync {
    /// Write a new blob. Implementations may treat a duplicate `(table,
    /// id)` as either an overwrite or an error; the transaction manager
    /// never relies on duplicate-add failing.
    fn add(&self, table: &str, id: PhysicalId, payload: Vec<u8>) -> Result<()>;

    /// Overwrite an existing blob.
    fn update(&self, table: &str, id: PhysicalId, payload: Vec<u8>) -> Result<()>;

    /// Remove a blob. Removing a blob that doesn't exist is not an error.
    fn remove(&self, table: &str, id: PhysicalId) -> Result<()>;

    /// Fetch one blob by ID.
    fn get_one(&self, table: &str, id: PhysicalId) -> Result<Option<Vec<u8>>>;
}

/// Outcome of an [`L2Cache::lock`] / [`L2Cache::dual_lock`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOutcome {
    /// True if the lock write itself succeeded (raced acquisition can still
    /// leave `confirmed = false`; see `DualLock` in spec §6).
    pub acquired: bool,
    /// True once a confirming read-back shows this caller as the owner.
    /// `acquired && !confirmed` is the "partial lock" case §4.D's
    /// `acquireLocks` treats as a sector failure.
    pub confirmed: bool,
}

/// Distributed key/value store plus distributed locks (spec §6).
///
/// `SetStruct`/`GetStruct`/`GetStructs` from the spec are modeled here as
/// byte-level `set`/`get`/`get_many`; structured (de)serialization is
/// layered on top in [`crate::codec`] so this trait stays object-safe.
pub trait L2Cache: Send + Sync {
    /// Write a value with an optional TTL.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Read a value, if present and unexpired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read a value and extend its TTL in the same round trip.
    fn get_ex(&self, key: &str, ttl: Duration) -> Result<Option<Vec<u8>>>;

    /// Batch read.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Delete a key. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Attempt to acquire a lock on every key in `keys` as a single batch
    /// (spec §4.D `acquireLocks`: sorted key sets are the caller's
    /// responsibility, not this trait's).
    fn lock(&self, keys: &[String], owner: TransactionId, ttl: Duration) -> Result<LockOutcome>;

    /// Release locks this caller owns on `keys`. Unlocking a key this
    /// caller doesn't own is a no-op for that key.
    fn unlock(&self, keys: &[String], owner: TransactionId) -> Result<()>;

    /// True iff every key in `keys` is currently locked by `owner`.
    fn is_locked(&self, keys: &[String], owner: TransactionId) -> Result<bool>;

    /// `Lock` followed by an `IsLocked` confirmation, combined so the
    /// orchestrator can't observe a window where the lock write succeeded
    /// but a concurrent unlock already raced it away.
    fn dual_lock(&self, keys: &[String], owner: TransactionId, ttl: Duration) -> Result<LockOutcome> {
        let outcome = self.lock(keys, owner, ttl)?;
        if !outcome.acquired {
            return Ok(outcome);
        }
        let confirmed = self.is_locked(keys, owner)?;
        Ok(LockOutcome { acquired: true, confirmed })
    }

    /// Read the current owner of a lock key without attempting to acquire
    /// it, if any is set. Used by `checkTrackedItems`'s re-validation path
    /// and by the lock-conflict diagnostics in `acquireLocks`.
    fn lock_owner(&self, key: &str) -> Result<Option<TransactionId>>;
}

/// One entry appended to the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLogEntry {
    /// The transaction this entry belongs to.
    pub transaction_id: TransactionId,
    /// The stage this entry records.
    pub stage: Stage,
    /// Stage-specific payload (see [`crate::payload`]).
    pub payload: Vec<u8>,
}

/// Append-only per-stage transaction log with rollback replay (spec §6,
/// §4.D). `get_one` / `get_one_of_hour` surface crashed transactions for
/// the expired-log sweeper; they are not ordering-sensitive across
/// transactions, only within one transaction's own entries.
pub trait TransactionLog: Send + Sync {
    /// Append one stage entry for a transaction.
    fn add(&self, transaction_id: TransactionId, stage: Stage, payload: Vec<u8>) -> Result<()>;

    /// Remove every entry for a transaction (successful commit, or a
    /// completed rollback).
    fn remove(&self, transaction_id: TransactionId) -> Result<()>;

    /// Fetch all entries for one transaction, in append order.
    fn entries_for(&self, transaction_id: TransactionId) -> Result<Vec<TransactionLogEntry>>;

    /// Surface one incomplete transaction (any hour bucket), for the
    /// sweeper to roll back. `None` once nothing is left to sweep.
    fn get_one(&self) -> Result<Option<(TransactionId, u64, Vec<TransactionLogEntry>)>>;

    /// Surface one incomplete transaction from a specific hour bucket, so
    /// the sweeper can drain a bucket to exhaustion before advancing.
    fn get_one_of_hour(&self, hour: u64) -> Result<Option<(TransactionId, Vec<TransactionLogEntry>)>>;

    /// The priority sub-log (spec §4.D) for fast peer-crash recovery.
    fn priority_log(&self) -> &dyn PriorityLog;
}

/// Per-transaction snapshot of pre-phase-2 handles, written just before the
/// registry flip so a surviving peer can restore state if the owner
/// crashes mid-commit (spec §3 `PriorityLogEntry`, §4.D).
pub trait PriorityLog: Send + Sync {
    /// Write (or overwrite) the snapshot for a transaction.
    fn add(&self, transaction_id: TransactionId, snapshot: Vec<Handle>) -> Result<()>;

    /// Remove the primary snapshot entry.
    fn remove(&self, transaction_id: TransactionId) -> Result<()>;

    /// Fetch the snapshot for one transaction, if any.
    fn get(&self, transaction_id: TransactionId) -> Result<Option<Vec<Handle>>>;

    /// Fetch up to `limit` pending snapshots, for `doPriorityRollbacks`'s
    /// batch sweep.
    fn get_batch(&self, limit: usize) -> Result<Vec<(TransactionId, Vec<Handle>)>>;

    /// Write a resumable backup of a snapshot before starting its
    /// rollback, so a crash mid-rollback can resume from the backup
    /// instead of losing the snapshot.
    fn write_backup(&self, transaction_id: TransactionId, snapshot: &[Handle]) -> Result<()>;

    /// Remove a transaction's backup once its rollback has completed.
    fn remove_backup(&self, transaction_id: TransactionId) -> Result<()>;
}

/// The B-tree algorithm's search/mutation surface (spec §1: "treated as a
/// library providing `Add`, `Find`, `FindWithID`, `GetCurrentItem`,
/// `UpdateCurrentItem`, `UpdateCurrentNodeItem`, `RemoveCurrentItem`" — out
/// of scope as an implementation, but needed here as the seam the
/// refetch-and-merge closure (§4.F) drives). A cursor-style contract:
/// `find*`/`add*` position an internal cursor on success, and the
/// `*CurrentItem` methods act on whatever the cursor last landed on.
pub trait BTree<K, V>: Send {
    /// Insert `(key, value)` as a brand-new item. Returns `false` (no
    /// error) on a duplicate key in a unique tree — the refetch-and-merge
    /// closure's "failed to merge add item" case.
    fn add(&mut self, key: K, value: V) -> Result<bool>;

    /// Insert a pre-built item (used when values are externalized and the
    /// caller already holds the physical ID to reuse, rather than a plain
    /// value the tree would wrap fresh).
    fn add_item(&mut self, item: Item<K, V>) -> Result<bool>;

    /// Position the cursor on `key`. `false` if not found.
    fn find(&mut self, key: &K) -> Result<bool>;

    /// Position the cursor on the item matching `key` *and* physical ID —
    /// the refetch-and-merge closure's re-resolution of a tracked item
    /// after reloading the tree from scratch.
    fn find_with_id(&mut self, key: &K, id: PhysicalId) -> Result<bool>;

    /// Read the item the cursor currently points at.
    fn get_current_item(&self) -> Result<Item<K, V>>;

    /// Overwrite the in-node value of the item under the cursor.
    fn update_current_item(&mut self, value: V) -> Result<()>;

    /// Overwrite the item under the cursor wholesale (externalized-value
    /// path, where the caller has already reassigned the item's physical
    /// ID during `commitTrackedItemsValues`).
    fn update_current_node_item(&mut self, item: Item<K, V>) -> Result<()>;

    /// Remove the item under the cursor.
    fn remove_current_item(&mut self) -> Result<()>;

    /// Re-root the tree against freshly-reloaded metadata (spec §4.F step
    /// 2, "reset the B-tree to the fresh root") — called once per
    /// refetch-and-merge, after the node repository's caches are cleared.
    fn refresh_root(&mut self, info: &StoreInfo) -> Result<()>;
}

/// Per-B-tree metadata store, owned independently of the registry (spec
/// §3 `StoreInfo` ownership note).
pub trait StoreRepository: Send + Sync {
    /// Fetch a store's metadata by name.
    fn get(&self, name: &str) -> Result<Option<StoreInfo>>;

    /// Fetch with an implementation-defined TTL refresh; used by the
    /// refetch-and-merge closure to reload `StoreInfo` after a conflict
    /// without necessarily bypassing a local cache entirely.
    fn get_with_ttl(&self, name: &str) -> Result<Option<StoreInfo>> {
        self.get(name)
    }

    /// Persist updated metadata. The only writer of this is phase 1's
    /// `commitStoreInfo` stage (and its rollback counterpart).
    fn update(&self, info: StoreInfo) -> Result<()>;
}
