//! Durability for vtree (spec §4.D "Transaction Logger")
//!
//! Owns the append-only transaction log, its priority sub-log for
//! peer-crash recovery, the rollback policy that decides which undo
//! actions a crashed or aborted transaction's log entries imply, and the
//! expired-log sweep driver. This crate is deliberately not generic over
//! the B-tree payload type `vtree-storage` carries — it works entirely
//! off wire-encoded payloads and `Handle`s, and hands any generic
//! execution back to its caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod in_memory_transaction_log;
pub mod locks;
pub mod logger;
pub mod recovery;

pub use in_memory_transaction_log::{InMemoryPriorityLog, InMemoryTransactionLog};
pub use locks::{acquire_locks, sorted_unique_keys};
pub use logger::{do_priority_rollbacks, encode_payload, plan_rollback, priority_rollback, RollbackAction, TransactionLogger};
pub use recovery::{RecoveryCoordinator, RecoveryStats, SweptTransaction};
