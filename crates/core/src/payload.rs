//! Wire-shaped log payloads (spec §6 "Persisted layouts")
//!
//! These are the payload shapes each transaction log stage carries. The
//! spec describes them as `Tuple<Vec<RegistryPayload<UUID>>,
//! Vec<BlobsPayload<UUID>>>` and similar; we give each its own named
//! struct rather than anonymous tuples so the durability layer's rollback
//! match arms read the same way the spec's prose does.

use crate::types::{LogicalId, PhysicalId};
use serde::{Deserialize, Serialize};

/// A registry-side identity touched by a commit stage: the logical ID plus
/// the physical ID it pointed at, for stages that need to undo a registry
/// write (e.g. `rollbackAddedNodes` removing the entries `commitAddedNodes`
/// created).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryPayload<T = LogicalId> {
    /// The logical ID registered or unregistered by this stage.
    pub logical_id: T,
    /// The physical ID the registry entry pointed at when this payload was
    /// captured, so rollback knows which blob to also remove.
    pub physical_id: PhysicalId,
}

impl<T> RegistryPayload<T> {
    /// Construct a payload pairing a logical identity with its physical blob.
    pub fn new(logical_id: T, physical_id: PhysicalId) -> Self {
        RegistryPayload { logical_id, physical_id }
    }
}

/// A blob store identity touched by a commit stage, scoped to the table it
/// lives in so rollback can address the right namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobsPayload<T = PhysicalId> {
    /// The blob store table/namespace.
    pub table: String,
    /// The blob identifiers to act on.
    pub ids: Vec<T>,
}

impl<T> BlobsPayload<T> {
    /// Construct a payload naming a table and the blob IDs within it.
    pub fn new(table: impl Into<String>, ids: Vec<T>) -> Self {
        BlobsPayload { table: table.into(), ids }
    }
}

/// Payload for `commitAddedNodes` / `commitNewRootNodes`: the registry
/// entries created and the blobs written to back them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedNodesPayload {
    /// Registry entries created for the added nodes.
    pub registry: Vec<RegistryPayload<LogicalId>>,
    /// Blobs written to back the added nodes.
    pub blobs: Vec<BlobsPayload<PhysicalId>>,
}

/// Payload for `commitUpdatedNodes`: the inactive blob IDs written as
/// shadow copies, so rollback can purge them without touching the
/// registry (handle semantics make the registry undo implicit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedNodesPayload {
    /// The inactive-slot blobs staged by this commit attempt.
    pub inactive_blobs: Vec<BlobsPayload<PhysicalId>>,
}

/// Payload for `commitRemovedNodes`: the registry entries marked deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedNodesPayload {
    /// Registry entries whose `is_deleted` flag this stage set.
    pub registry: Vec<RegistryPayload<LogicalId>>,
}

/// One entry of `commitTrackedItemsValues`'s payload: whether the value was
/// also mirrored into the L2 cache, plus the blob it was written under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedValuePayload {
    /// True if this value was also written into the L2 cache.
    pub is_cached: bool,
    /// The blob(s) the value was externalized to.
    pub blobs: BlobsPayload<PhysicalId>,
}

/// Payload for `finalizeCommit`: everything phase 2 needs to clean up —
/// obsolete registry/blob state plus superseded tracked-item values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeCommitPayload {
    /// Registry entries and blobs made obsolete by the commit (old
    /// logical IDs and inactive-turned-dead blobs).
    pub obsolete: AddedNodesPayload,
    /// Tracked item values superseded by this commit's externalization.
    pub obsolete_tracked_values: Vec<TrackedValuePayload>,
}
