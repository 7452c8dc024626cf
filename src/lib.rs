//! # vtree
//!
//! A distributed, transactional B-tree storage engine: optimistic
//! two-phase commit over a registry, blob store, L2 distributed cache, and
//! append-only transaction log, with bounded-retry conflict resolution via
//! a refetch-and-merge closure.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use vtree::{BackendConfig, Database};
//! use vtree_core::clock::ManualClock;
//! use vtree_core::traits::L2Cache;
//! use vtree_core::Clock;
//! use vtree_durability::InMemoryTransactionLog;
//! use vtree_storage::{InMemoryBlobStore, InMemoryL2Cache, InMemoryRegistry, InMemoryStoreRepository};
//!
//! let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
//! let l2: Arc<dyn L2Cache> = Arc::new(InMemoryL2Cache::new(clock.clone()));
//! let db = Database::new(
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(InMemoryBlobStore::new()),
//!     l2,
//!     Arc::new(InMemoryTransactionLog::new(clock.clone())),
//!     Arc::new(InMemoryStoreRepository::new()),
//!     clock,
//!     BackendConfig::for_testing(),
//! );
//!
//! let orders = db.open_store::<String, String>("orders", 64, true).unwrap();
//!
//! let mut tx = db.begin();
//! let mut tree = orders.attach().unwrap();
//! tx.add(&mut tree, "order-1".to_string(), "placed".to_string()).unwrap();
//! tx.commit(vec![Box::new(tree)]).unwrap();
//!
//! let mut tx = db.begin();
//! let mut tree = orders.attach().unwrap();
//! assert_eq!(tx.get(&mut tree, &"order-1".to_string()).unwrap(), Some("placed".to_string()));
//! tx.commit_read_only(vec![Box::new(tree)]).unwrap();
//! ```
//!
//! # Architecture
//!
//! [`Database`] is the entry point: it owns the ambient services (registry,
//! blob store, L2 cache, transaction log, store metadata) and hands out
//! [`TypedStore`]s. Each transaction [`Database::begin`]s calls
//! [`TypedStore::attach`] to get a fresh [`Tree`] bound to that store's
//! current state, reads and writes through [`Transaction`]'s typed
//! methods, then hands the trees to [`Transaction::commit`] (or
//! [`Transaction::rollback`]) to run the two-phase protocol.
//!
//! The lower crates (`vtree-core`, `vtree-storage`, `vtree-durability`,
//! `vtree-concurrency`) are public for embedders that need to supply a
//! durable `Registry`/`BlobStore`/`L2Cache`/`TransactionLog`/
//! `StoreRepository` implementation instead of the in-memory ones used
//! above, but the types most callers need are re-exported here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use vtree_engine::{BackendConfig, Database, NodePayload, Transaction, Tree, TypedStore};

pub use vtree_core as core;
pub use vtree_concurrency as concurrency;
pub use vtree_durability as durability;
pub use vtree_storage as storage;

pub use vtree_core::error::{Error, Result};
