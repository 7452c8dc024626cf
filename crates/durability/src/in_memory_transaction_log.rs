//! In-memory reference [`TransactionLog`] / [`PriorityLog`] implementation.
//!
//! Out of scope per §1 as a concrete append-only store; this is the
//! reference backend the rollback and recovery-sweep logic is tested
//! against. Entries are bucketed by wall-clock hour (via an injected
//! [`Clock`]) at first-write time, matching `get_one_of_hour`'s contract
//! of draining one bucket before the sweeper advances to the next.

use dashmap::DashMap;
use std::sync::Arc;
use vtree_core::clock::Clock;
use vtree_core::error::Result;
use vtree_core::traits::{PriorityLog, TransactionLog, TransactionLogEntry};
use vtree_core::{Handle, Stage, TransactionId};

struct Bucket {
    hour: u64,
    entries: Vec<TransactionLogEntry>,
}

/// `DashMap`-backed transaction log, bucketed by hour for the sweeper.
pub struct InMemoryTransactionLog {
    clock: Arc<dyn Clock>,
    buckets: DashMap<TransactionId, Bucket>,
    priority: InMemoryPriorityLog,
}

impl InMemoryTransactionLog {
    /// Construct an empty log driven by the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        InMemoryTransactionLog {
            clock,
            buckets: DashMap::new(),
            priority: InMemoryPriorityLog::new(),
        }
    }

    fn hour_now(&self) -> u64 {
        (self.clock.now_millis() / 1000 / 3600).max(0) as u64
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn add(&self, transaction_id: TransactionId, stage: Stage, payload: Vec<u8>) -> Result<()> {
        let hour = self.hour_now();
        let mut bucket = self.buckets.entry(transaction_id).or_insert_with(|| Bucket { hour, entries: Vec::new() });
        bucket.entries.push(TransactionLogEntry { transaction_id, stage, payload });
        Ok(())
    }

    fn remove(&self, transaction_id: TransactionId) -> Result<()> {
        self.buckets.remove(&transaction_id);
        Ok(())
    }

    fn entries_for(&self, transaction_id: TransactionId) -> Result<Vec<TransactionLogEntry>> {
        Ok(self.buckets.get(&transaction_id).map(|b| b.entries.clone()).unwrap_or_default())
    }

    fn get_one(&self) -> Result<Option<(TransactionId, u64, Vec<TransactionLogEntry>)>> {
        Ok(self.buckets.iter().next().map(|e| (*e.key(), e.value().hour, e.value().entries.clone())))
    }

    fn get_one_of_hour(&self, hour: u64) -> Result<Option<(TransactionId, Vec<TransactionLogEntry>)>> {
        Ok(self
            .buckets
            .iter()
            .find(|e| e.value().hour == hour)
            .map(|e| (*e.key(), e.value().entries.clone())))
    }

    fn priority_log(&self) -> &dyn PriorityLog {
        &self.priority
    }
}

/// `DashMap`-backed priority log: a primary snapshot table plus a
/// resumable-backup table (spec §4.D `doPriorityRollbacks`).
#[derive(Default)]
pub struct InMemoryPriorityLog {
    snapshots: DashMap<TransactionId, Vec<Handle>>,
    backups: DashMap<TransactionId, Vec<Handle>>,
}

impl InMemoryPriorityLog {
    /// Construct an empty priority log.
    pub fn new() -> Self {
        InMemoryPriorityLog::default()
    }
}

impl PriorityLog for InMemoryPriorityLog {
    fn add(&self, transaction_id: TransactionId, snapshot: Vec<Handle>) -> Result<()> {
        self.snapshots.insert(transaction_id, snapshot);
        Ok(())
    }

    fn remove(&self, transaction_id: TransactionId) -> Result<()> {
        self.snapshots.remove(&transaction_id);
        Ok(())
    }

    fn get(&self, transaction_id: TransactionId) -> Result<Option<Vec<Handle>>> {
        Ok(self.snapshots.get(&transaction_id).map(|v| v.clone()))
    }

    fn get_batch(&self, limit: usize) -> Result<Vec<(TransactionId, Vec<Handle>)>> {
        Ok(self.snapshots.iter().take(limit).map(|e| (*e.key(), e.value().clone())).collect())
    }

    fn write_backup(&self, transaction_id: TransactionId, snapshot: &[Handle]) -> Result<()> {
        self.backups.insert(transaction_id, snapshot.to_vec());
        Ok(())
    }

    fn remove_backup(&self, transaction_id: TransactionId) -> Result<()> {
        self.backups.remove(&transaction_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtree_core::clock::ManualClock;

    fn fixture() -> InMemoryTransactionLog {
        InMemoryTransactionLog::new(Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn add_then_entries_for_round_trips() {
        let log = fixture();
        let tid = TransactionId::new();
        log.add(tid, Stage::LockTrackedItems, vec![1, 2, 3]).unwrap();
        log.add(tid, Stage::CommitAddedNodes, vec![4, 5]).unwrap();
        let entries = log.entries_for(tid).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, Stage::LockTrackedItems);
        assert_eq!(entries[1].payload, vec![4, 5]);
    }

    #[test]
    fn remove_clears_entries() {
        let log = fixture();
        let tid = TransactionId::new();
        log.add(tid, Stage::LockTrackedItems, vec![]).unwrap();
        log.remove(tid).unwrap();
        assert!(log.entries_for(tid).unwrap().is_empty());
    }

    #[test]
    fn get_one_of_hour_only_surfaces_matching_bucket() {
        let clock = Arc::new(ManualClock::new(0));
        let log = InMemoryTransactionLog::new(clock.clone());
        let early = TransactionId::new();
        log.add(early, Stage::LockTrackedItems, vec![]).unwrap();
        clock.advance(3_600_000 * 2);
        let late = TransactionId::new();
        log.add(late, Stage::LockTrackedItems, vec![]).unwrap();

        let (tid, _) = log.get_one_of_hour(0).unwrap().expect("early bucket present");
        assert_eq!(tid, early);
        assert!(log.get_one_of_hour(0).unwrap().map(|(t, _)| t) == Some(early));
        assert_eq!(log.get_one_of_hour(2).unwrap().map(|(t, _)| t), Some(late));
    }

    #[test]
    fn priority_log_snapshot_round_trips() {
        let log = fixture();
        let pl = log.priority_log();
        let tid = TransactionId::new();
        let h = Handle::new(vtree_core::LogicalId::new(), vtree_core::PhysicalId::new());
        pl.add(tid, vec![h.clone()]).unwrap();
        assert_eq!(pl.get(tid).unwrap(), Some(vec![h]));
        pl.remove(tid).unwrap();
        assert_eq!(pl.get(tid).unwrap(), None);
    }

    #[test]
    fn priority_log_backup_is_independent_of_primary() {
        let log = fixture();
        let pl = log.priority_log();
        let tid = TransactionId::new();
        let h = Handle::new(vtree_core::LogicalId::new(), vtree_core::PhysicalId::new());
        pl.write_backup(tid, &[h.clone()]).unwrap();
        assert_eq!(pl.get(tid).unwrap(), None);
        pl.remove_backup(tid).unwrap();
    }

    #[test]
    fn get_batch_respects_limit() {
        let log = fixture();
        let pl = log.priority_log();
        for _ in 0..5 {
            let tid = TransactionId::new();
            let h = Handle::new(vtree_core::LogicalId::new(), vtree_core::PhysicalId::new());
            pl.add(tid, vec![h]).unwrap();
        }
        assert_eq!(pl.get_batch(3).unwrap().len(), 3);
        assert_eq!(pl.get_batch(100).unwrap().len(), 5);
    }
}
