//! Core types and traits for vtree
//!
//! This crate defines the foundational vocabulary shared by every layer of
//! the transaction manager:
//! - [`LogicalId`] / [`PhysicalId`]: the two identifier spaces a [`Handle`] bridges
//! - [`Handle`]: the registry record mediating active/inactive physical storage
//! - [`Item`] / [`StoreInfo`] / [`LockRecord`]: the per-B-tree data model
//! - [`Stage`]: the wire-stable transaction log stage encoding
//! - [`error`]: the unified error taxonomy (conflict, timeout, sector failure, ...)
//! - [`traits`]: the seams for the four external collaborators (registry,
//!   blob store, L2 cache, transaction log) plus the store repository

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod codec;
pub mod error;
pub mod handle;
pub mod item;
pub mod lock;
pub mod payload;
pub mod stage;
pub mod store_info;
pub mod traits;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use error::{Error, ErrorCode, Result, UserData};
pub use handle::{Handle, HandleError};
pub use item::{CacheAction, CacheItem, Item};
pub use lock::{LockAction, LockRecord};
pub use payload::{AddedNodesPayload, BlobsPayload, FinalizeCommitPayload, RegistryPayload, RemovedNodesPayload, TrackedValuePayload, UpdatedNodesPayload};
pub use stage::Stage;
pub use store_info::{CacheConfig, StoreInfo, ValueStorageMode};
pub use traits::{BTree, BlobStore, L2Cache, LockOutcome, PriorityLog, Registry, StoreRepository, TransactionLog, TransactionLogEntry};
pub use types::{LogicalId, PhysicalId, TransactionId};
