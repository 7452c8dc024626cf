//! User-facing transaction handle (spec §4.E): carries the transaction's
//! identity and log cursor through its body, then builds the two-phase
//! commit orchestrator once the caller decides how to land it.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use rand::SeedableRng;
use vtree_concurrency::{CommitMode, Orchestrator, StoreBackend};
use vtree_core::error::Result;
use vtree_core::traits::{L2Cache, TransactionLog};
use vtree_core::{Clock, TransactionId};
use vtree_durability::TransactionLogger;

use crate::store::Tree;

/// One open transaction. Reads and writes against any number of attached
/// [`Tree`]s accumulate locally (nothing is visible to other transactions)
/// until [`Transaction::commit`] runs the two-phase protocol, or
/// [`Transaction::rollback`] discards them.
pub struct Transaction {
    id: TransactionId,
    clock: Arc<dyn Clock>,
    log: Arc<dyn TransactionLog>,
    node_cache: Arc<dyn L2Cache>,
    max_time: Duration,
    logger: TransactionLogger,
}

impl Transaction {
    pub(crate) fn new(clock: Arc<dyn Clock>, log: Arc<dyn TransactionLog>, node_cache: Arc<dyn L2Cache>, max_time: Duration, logging_enabled: bool) -> Self {
        let id = TransactionId::new();
        let logger = TransactionLogger::new(id, Arc::clone(&log), logging_enabled);
        Transaction { id, clock, log, node_cache, max_time, logger }
    }

    /// This transaction's identity, stamped onto every handle it touches.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Read a value by key. Staged but uncommitted writes within this same
    /// transaction are visible; nothing from any other transaction is.
    pub fn get<K, V>(&mut self, tree: &mut Tree<K, V>, key: &K) -> Result<Option<V>>
    where
        K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
        V: Clone + Serialize + DeserializeOwned + Send + 'static,
    {
        tree.get(key, self.id)
    }

    /// Insert `key => value`. Returns `false` without mutating anything if
    /// the store is unique and the key is already present.
    pub fn add<K, V>(&mut self, tree: &mut Tree<K, V>, key: K, value: V) -> Result<bool>
    where
        K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
        V: Clone + Serialize + DeserializeOwned + Send + 'static,
    {
        tree.add(key, value, self.id, &mut self.logger)
    }

    /// Overwrite the value at `key`. Returns `false` if `key` is absent.
    pub fn update<K, V>(&mut self, tree: &mut Tree<K, V>, key: &K, value: V) -> Result<bool>
    where
        K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
        V: Clone + Serialize + DeserializeOwned + Send + 'static,
    {
        tree.update(key, value, self.id, &mut self.logger)
    }

    /// Remove `key`. Returns `false` if it was already absent.
    pub fn remove<K, V>(&mut self, tree: &mut Tree<K, V>, key: &K) -> Result<bool>
    where
        K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
        V: Clone + Serialize + DeserializeOwned + Send + 'static,
    {
        tree.remove(key, self.id)
    }

    fn orchestrator(self, mode: CommitMode) -> Orchestrator {
        let rng = Box::new(rand::rngs::StdRng::from_entropy());
        Orchestrator::new(self.id, mode, self.max_time, self.clock, rng, self.logger, self.node_cache)
    }

    /// Commit every attached store's staged work with the full two-phase
    /// protocol (spec §4.E). Consumes the transaction and the backends:
    /// once committed, reopen a fresh [`Tree`] per store for the next one.
    pub fn commit(self, mut backends: Vec<Box<dyn StoreBackend>>) -> Result<()> {
        self.orchestrator(CommitMode::ForWriting).commit(&mut backends)
    }

    /// Re-validate every read this transaction performed, without staging
    /// any write. For read-only transactions that still want the
    /// optimistic-conflict guarantee (spec §4.E `CommitMode::ForReading`).
    pub fn commit_read_only(self, mut backends: Vec<Box<dyn StoreBackend>>) -> Result<()> {
        self.orchestrator(CommitMode::ForReading).commit(&mut backends)
    }

    /// Undo every staged write across the attached backends (spec §4.E
    /// "Rollback (user-visible)"). Fails if the transaction already landed
    /// past `FinalizeCommit`.
    pub fn rollback(self, mut backends: Vec<Box<dyn StoreBackend>>) -> Result<()> {
        self.orchestrator(CommitMode::NoCheck).user_rollback(&mut backends)
    }

    /// The clock this transaction's deadlines are computed against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The commit window this transaction's retry loop was configured with.
    pub fn max_time(&self) -> Duration {
        self.max_time
    }

    /// Fetch this transaction's own log entries, for crash-recovery style
    /// inspection mid-transaction (spec §4.D).
    pub fn log_entries(&self) -> Result<Vec<vtree_core::traits::TransactionLogEntry>> {
        self.logger.entries()
    }
}
