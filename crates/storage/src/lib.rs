//! Node-level storage for vtree (spec §4.C "Node Repository", §9 "Global
//! mutable state")
//!
//! This crate owns the node-side half of the transaction manager: the
//! per-transaction [`node_repo::NodeRepository`] staging cache and its
//! phase-1 staged commits, the process-wide [`l1_cache::L1Cache`], and the
//! in-memory reference backends for the four external collaborators named
//! (but not specified) in the core spec.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod in_memory_blob_store;
pub mod in_memory_l2_cache;
pub mod in_memory_registry;
pub mod in_memory_store_repository;
pub mod l1_cache;
pub mod node;
pub mod node_repo;

pub use in_memory_blob_store::InMemoryBlobStore;
pub use in_memory_l2_cache::InMemoryL2Cache;
pub use in_memory_registry::InMemoryRegistry;
pub use in_memory_store_repository::InMemoryStoreRepository;
pub use l1_cache::L1Cache;
pub use node::{CachedNode, Node};
pub use node_repo::{AddedCommit, NodeRepository, RemovedCommit, UpdatedCommit};
