//! Refetch-and-Merge Closure (spec §4.F)
//!
//! Bound to one `(StoreInterface, B-tree handle, StoreRepository)` triple:
//! when the orchestrator's phase-1 retry loop hits a conflict, every
//! backend's closure runs before the next attempt starts. It discards this
//! transaction's per-backend caches, reloads the authoritative store
//! metadata, re-roots the B-tree against it, then replays the item
//! tracker's intents (the part with its own rules, in
//! [`crate::item_tracker::ItemActionTracker::replay_after_refetch`]).

use vtree_core::error::{Error, Result};
use vtree_core::traits::{BTree, StoreRepository};
use vtree_core::StoreInfo;
use vtree_storage::NodeRepository;

use crate::item_tracker::ItemActionTracker;

/// Run the refetch-and-merge closure for one backend's `(node repository,
/// item tracker, B-tree)` triple, returning the freshly-reloaded
/// `StoreInfo` so the caller can update whatever cached copy it keeps
/// alongside these collaborators.
pub fn refetch_and_merge<K, V, P, T>(
    store_repo: &dyn StoreRepository,
    store_name: &str,
    node_repo: &mut NodeRepository<P>,
    tracker: &mut ItemActionTracker<K, V>,
    tree: &mut T,
) -> Result<StoreInfo>
where
    K: Clone,
    V: Clone + serde::Serialize + serde::de::DeserializeOwned,
    T: BTree<K, V>,
{
    node_repo.clear();
    let info = store_repo
        .get_with_ttl(store_name)?
        .ok_or_else(|| Error::Usage(format!("store {store_name} has no metadata to refetch")))?;
    tree.refresh_root(&info)?;
    tracker.replay_after_refetch(tree)?;
    Ok(info)
}
