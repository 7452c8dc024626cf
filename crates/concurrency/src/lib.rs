//! Concurrency control for vtree (spec §4.B "Item Action Tracker", §4.E
//! "Two-Phase Commit Orchestrator", §4.F "Refetch-and-Merge Closure")
//!
//! Owns everything that coordinates a transaction across the node-level
//! state `vtree-storage` stages: the per-item tracker and its distributed
//! lock protocol, the type-erased per-backend record that lets the
//! orchestrator drive an arbitrary set of open B-trees without being
//! generic over any of their key/value types, the orchestrator itself, and
//! the refetch-and-merge closure a conflict retry replays through.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod item_tracker;
pub mod orchestrator;
pub mod refetch_merge;

pub use backend::{merge_added_payloads, obsolete_payload_for_removed, obsolete_payload_for_updated, StoreBackend};
pub use item_tracker::ItemActionTracker;
pub use orchestrator::{CommitMode, Orchestrator};
pub use refetch_merge::refetch_and_merge;
