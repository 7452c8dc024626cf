//! vtree-engine: the concrete B-tree and the user-facing database/
//! transaction facade built on top of the lower vtree crates.
//!
//! `vtree-core` names the data model and the commit protocol's seams but
//! deliberately leaves the B-tree algorithm itself unspecified (spec §1);
//! this crate supplies one ([`btree::StrataBTree`]) and wires it into the
//! [`vtree_concurrency::StoreBackend`] surface ([`store::Tree`]) so that a
//! caller never touches `NodeRepository` or `ItemActionTracker` directly.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod btree;
pub mod config;
pub mod database;
pub mod payload;
pub mod store;
pub mod transaction;

pub use config::BackendConfig;
pub use database::{Database, TypedStore};
pub use payload::NodePayload;
pub use store::Tree;
pub use transaction::Transaction;
