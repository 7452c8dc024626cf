//! The end-user entry point: a `Database` owns the process-wide ambient
//! state (registry, blob store, distributed cache, transaction log, store
//! metadata, clock) and hands out typed, per-transaction [`crate::store::Tree`]
//! handles through [`TypedStore`].

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use vtree_core::error::{Error, Result};
use vtree_core::traits::{BlobStore, L2Cache, Registry, StoreRepository, TransactionLog};
use vtree_core::{Clock, LogicalId, StoreInfo, ValueStorageMode};
use vtree_durability::TransactionLogger;
use vtree_storage::{L1Cache, NodeRepository};

use crate::btree::StrataBTree;
use crate::config::BackendConfig;
use crate::payload::NodePayload;
use crate::store::Tree;
use crate::transaction::Transaction;
use vtree_concurrency::ItemActionTracker;

/// Process-wide handle to every ambient service a store needs: the
/// registry, blob store, L2 distributed cache, transaction log, and store
/// metadata repository, plus the injectable clock and tuning knobs.
#[derive(Clone)]
pub struct Database {
    registry: Arc<dyn Registry>,
    blob_store: Arc<dyn BlobStore>,
    l2_cache: Arc<dyn L2Cache>,
    transaction_log: Arc<dyn TransactionLog>,
    store_repo: Arc<dyn StoreRepository>,
    clock: Arc<dyn Clock>,
    config: BackendConfig,
}

impl Database {
    /// Assemble a database from its ambient services. Each argument is an
    /// implementation of the corresponding trait from `vtree-core` — the
    /// in-memory reference implementations in `vtree-storage` and
    /// `vtree-durability` for tests, or a durable backend in production.
    pub fn new(
        registry: Arc<dyn Registry>,
        blob_store: Arc<dyn BlobStore>,
        l2_cache: Arc<dyn L2Cache>,
        transaction_log: Arc<dyn TransactionLog>,
        store_repo: Arc<dyn StoreRepository>,
        clock: Arc<dyn Clock>,
        config: BackendConfig,
    ) -> Self {
        Database { registry, blob_store, l2_cache, transaction_log, store_repo, clock, config }
    }

    /// The tuning knobs this database was built with.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The injectable clock backing every transaction's deadlines and
    /// work-in-progress timestamps.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Begin a new transaction. `logging` is normally `self.config().logging_enabled`;
    /// read-only transactions that never call [`Transaction::commit`] with
    /// [`crate::transaction::CommitIntent::Write`] may pass `false` to skip
    /// the log entirely.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.clock(), Arc::clone(&self.transaction_log), Arc::clone(&self.l2_cache), self.config.commit_max_time, self.config.logging_enabled)
    }

    /// Open (creating if absent) a typed store by name, with the given
    /// fan-out and uniqueness policy. Fan-out and uniqueness only take
    /// effect the first time a store is created; reopening an existing
    /// store ignores them in favor of the persisted [`StoreInfo`].
    pub fn open_store<K, V>(&self, name: &str, slot_length: u16, is_unique: bool) -> Result<TypedStore<K, V>>
    where
        K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
        V: Clone + Serialize + DeserializeOwned + Send + 'static,
    {
        if self.store_repo.get(name)?.is_none() {
            let info = StoreInfo::new(name, slot_length, is_unique, LogicalId::new());
            self.store_repo.update(info)?;
        }
        let l1 = Arc::new(L1Cache::new(Arc::clone(&self.l2_cache), self.config.l1_min_capacity, self.config.l1_max_capacity));
        Ok(TypedStore {
            name: name.to_string(),
            db: self.clone(),
            l1,
            _marker: PhantomData,
        })
    }

    /// Set the value storage mode a not-yet-created store will use. Must be
    /// called before the first [`Database::open_store`] call for `name`;
    /// changing it on an existing store is not supported.
    pub fn declare_value_storage_mode(&self, name: &str, slot_length: u16, is_unique: bool, mode: ValueStorageMode) -> Result<()> {
        if self.store_repo.get(name)?.is_some() {
            return Err(Error::Usage(format!("store {name} already exists; cannot redeclare its value storage mode")));
        }
        let mut info = StoreInfo::new(name, slot_length, is_unique, LogicalId::new());
        info.value_storage_mode = mode;
        self.store_repo.update(info)
    }
}

/// A named B-tree, ready to be attached to a transaction. Holds the
/// process-wide L1 node cache for this store (built once, shared across
/// every transaction that opens it) and the ambient services cloned from
/// its owning [`Database`].
pub struct TypedStore<K, V> {
    name: String,
    db: Database,
    l1: Arc<L1Cache<NodePayload<K, V>>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> TypedStore<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// The store's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a fresh [`Tree`] bound to the store's current persisted state,
    /// for use within one transaction. A transaction that opens the same
    /// store twice gets two independent `Tree`s, each with its own staging
    /// cache — attach only one to the orchestrator's backend list.
    pub fn attach(&self) -> Result<Tree<K, V>> {
        let info = self
            .db
            .store_repo
            .get(&self.name)?
            .ok_or_else(|| Error::Usage(format!("store {} was not found; open it via Database::open_store first", self.name)))?;
        let node_repo = NodeRepository::new(
            info.clone(),
            Arc::clone(&self.db.registry),
            Arc::clone(&self.db.blob_store),
            Arc::clone(&self.l1),
            self.db.clock(),
            self.db.config.read_node_cache_capacity,
        );
        let btree = StrataBTree::new(node_repo, info.root_node_id, info.slot_length as usize, info.is_unique);
        let tracker = ItemActionTracker::new(info.clone(), Arc::clone(&self.db.blob_store), Arc::clone(&self.db.l2_cache));
        Ok(Tree::new(self.name.clone(), Arc::clone(&self.db.store_repo), Arc::clone(&self.db.registry), info, btree, tracker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtree_core::clock::ManualClock;
    use vtree_durability::InMemoryTransactionLog;
    use vtree_storage::{InMemoryBlobStore, InMemoryL2Cache, InMemoryRegistry, InMemoryStoreRepository};

    fn fixture_db() -> Database {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
        let l2: Arc<dyn L2Cache> = Arc::new(InMemoryL2Cache::new(Arc::clone(&clock)));
        Database::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryBlobStore::new()),
            l2,
            Arc::new(InMemoryTransactionLog::new(Arc::clone(&clock))),
            Arc::new(InMemoryStoreRepository::new()),
            clock,
            BackendConfig::for_testing(),
        )
    }

    #[test]
    fn open_store_creates_metadata_exactly_once() {
        let db = fixture_db();
        let store: TypedStore<String, String> = db.open_store("orders", 4, true).unwrap();
        let info_a = db.store_repo.get("orders").unwrap().unwrap();
        let _again: TypedStore<String, String> = db.open_store("orders", 999, false).unwrap();
        let info_b = db.store_repo.get("orders").unwrap().unwrap();
        assert_eq!(info_a, info_b);
        assert_eq!(store.name(), "orders");
    }

    #[test]
    fn attach_without_open_store_fails() {
        let db = fixture_db();
        let store = TypedStore::<String, String> {
            name: "ghost".into(),
            db: db.clone(),
            l1: Arc::new(L1Cache::new(Arc::clone(&db.l2_cache), 4, 4)),
            _marker: PhantomData,
        };
        assert!(store.attach().is_err());
    }

    #[test]
    fn attach_builds_a_usable_tree() {
        let db = fixture_db();
        let store: TypedStore<String, String> = db.open_store("orders", 4, true).unwrap();
        let mut tree = store.attach().unwrap();
        let tid = vtree_core::TransactionId::new();
        assert!(tree.get(&"missing".to_string(), tid).unwrap().is_none());
    }

    /// §4.E step 5 acquires a batched lock over every node this commit
    /// touched; phase 2's `unlockNodesKeys` must release it before
    /// returning, or a second writer would spuriously block for the
    /// full 5-minute node lock TTL.
    #[test]
    fn commit_releases_its_node_key_locks() {
        let db = fixture_db();
        let store: TypedStore<String, String> = db.open_store("orders", 4, true).unwrap();

        let mut tx = db.begin();
        let mut tree = store.attach().unwrap();
        assert!(tx.add(&mut tree, "a".to_string(), "1".to_string()).unwrap());
        tx.commit(vec![Box::new(tree)]).unwrap();

        let info = db.store_repo.get("orders").unwrap().unwrap();
        let key = format!("node:orders/{}", info.root_node_id);
        assert!(db.l2_cache.lock_owner(&key).unwrap().is_none());

        // A second transaction touching the same root must not be blocked
        // by a lock the first transaction forgot to release.
        let mut tx2 = db.begin();
        let mut tree2 = store.attach().unwrap();
        assert!(tx2.add(&mut tree2, "b".to_string(), "2".to_string()).unwrap());
        tx2.commit(vec![Box::new(tree2)]).unwrap();
    }
}
