//! Transaction log stage encoding
//!
//! §6 fixes the wire encoding of each stage as a `u8`. Separately, §3 fixes
//! a *logical* total order used by rollback to decide "how far did this
//! transaction get": `addActivelyPersistedItem < lockTrackedItems < ... <
//! deleteTrackedItemsValues`. The two orders are not the same sequence —
//! `addActivelyPersistedItem`'s wire code is `99` (it is a pre-commit log
//! predating the numbered phase-1/phase-2 stages) but it sorts *first*
//! logically. `Stage` keeps both: `as_wire_code` / `from_wire_code` for
//! serialization, and `Ord`/`PartialOrd` implemented against the logical
//! rank for rollback comparisons.

use std::cmp::Ordering;

/// A single stage in the transaction log's total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Pre-commit log written when a value is externalized eagerly for an
    /// actively-persisted store, ahead of the numbered phase-1 stages.
    AddActivelyPersistedItem,
    /// Phase 1: per-item distributed lock acquisition.
    LockTrackedItems,
    /// Phase 1: value externalization for tracked add/update items.
    CommitTrackedItemsValues,
    /// Phase 1: registration of brand-new root nodes.
    CommitNewRootNodes,
    /// Phase 1: re-validation that `get`-action nodes are unchanged.
    AreFetchedItemsIntact,
    /// Phase 1: shadow-write of updated nodes to their inactive slot.
    CommitUpdatedNodes,
    /// Phase 1: logical deletion of removed nodes.
    CommitRemovedNodes,
    /// Phase 1: registration of brand-new nodes.
    CommitAddedNodes,
    /// Phase 1: persistence of updated `StoreInfo`.
    CommitStoreInfo,
    /// Phase 1: priority log snapshot written just before phase 2.
    BeforeFinalize,
    /// Phase 2: atomic registry flip (the commit linearization point).
    FinalizeCommit,
    /// Phase 2: removal of superseded registry entries and blobs.
    DeleteObsoleteEntries,
    /// Phase 2: removal of superseded tracked item values.
    DeleteTrackedItemsValues,
}

impl Stage {
    /// All stages in their logical (rollback) order.
    pub const ORDERED: [Stage; 13] = [
        Stage::AddActivelyPersistedItem,
        Stage::LockTrackedItems,
        Stage::CommitTrackedItemsValues,
        Stage::CommitNewRootNodes,
        Stage::AreFetchedItemsIntact,
        Stage::CommitUpdatedNodes,
        Stage::CommitRemovedNodes,
        Stage::CommitAddedNodes,
        Stage::CommitStoreInfo,
        Stage::BeforeFinalize,
        Stage::FinalizeCommit,
        Stage::DeleteObsoleteEntries,
        Stage::DeleteTrackedItemsValues,
    ];

    /// Rank in the logical total order (not the wire code).
    fn rank(self) -> u8 {
        Self::ORDERED
            .iter()
            .position(|s| *s == self)
            .expect("Stage::ORDERED is exhaustive") as u8
    }

    /// The wire-stable encoding from §6.
    pub fn as_wire_code(self) -> u8 {
        match self {
            Stage::LockTrackedItems => 1,
            Stage::CommitTrackedItemsValues => 2,
            Stage::CommitNewRootNodes => 3,
            Stage::AreFetchedItemsIntact => 4,
            Stage::CommitUpdatedNodes => 5,
            Stage::CommitRemovedNodes => 6,
            Stage::CommitAddedNodes => 7,
            Stage::CommitStoreInfo => 8,
            Stage::BeforeFinalize => 9,
            Stage::FinalizeCommit => 10,
            Stage::DeleteObsoleteEntries => 11,
            Stage::DeleteTrackedItemsValues => 12,
            Stage::AddActivelyPersistedItem => 99,
        }
    }

    /// Decode a wire-stable stage code.
    pub fn from_wire_code(code: u8) -> Option<Stage> {
        Some(match code {
            1 => Stage::LockTrackedItems,
            2 => Stage::CommitTrackedItemsValues,
            3 => Stage::CommitNewRootNodes,
            4 => Stage::AreFetchedItemsIntact,
            5 => Stage::CommitUpdatedNodes,
            6 => Stage::CommitRemovedNodes,
            7 => Stage::CommitAddedNodes,
            8 => Stage::CommitStoreInfo,
            9 => Stage::BeforeFinalize,
            10 => Stage::FinalizeCommit,
            11 => Stage::DeleteObsoleteEntries,
            12 => Stage::DeleteTrackedItemsValues,
            99 => Stage::AddActivelyPersistedItem,
            _ => return None,
        })
    }
}

impl PartialOrd for Stage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_order_matches_spec_table() {
        assert!(Stage::AddActivelyPersistedItem < Stage::LockTrackedItems);
        assert!(Stage::LockTrackedItems < Stage::CommitTrackedItemsValues);
        assert!(Stage::CommitTrackedItemsValues < Stage::CommitNewRootNodes);
        assert!(Stage::CommitNewRootNodes < Stage::AreFetchedItemsIntact);
        assert!(Stage::AreFetchedItemsIntact < Stage::CommitUpdatedNodes);
        assert!(Stage::CommitUpdatedNodes < Stage::CommitRemovedNodes);
        assert!(Stage::CommitRemovedNodes < Stage::CommitAddedNodes);
        assert!(Stage::CommitAddedNodes < Stage::CommitStoreInfo);
        assert!(Stage::CommitStoreInfo < Stage::BeforeFinalize);
        assert!(Stage::BeforeFinalize < Stage::FinalizeCommit);
        assert!(Stage::FinalizeCommit < Stage::DeleteObsoleteEntries);
        assert!(Stage::DeleteObsoleteEntries < Stage::DeleteTrackedItemsValues);
    }

    #[test]
    fn wire_code_is_not_monotonic_with_logical_order() {
        // addActivelyPersistedItem sorts first logically but its wire code (99)
        // is the largest — this is the deliberate wrinkle this module exists
        // to keep safe.
        assert!(Stage::AddActivelyPersistedItem < Stage::LockTrackedItems);
        assert!(Stage::AddActivelyPersistedItem.as_wire_code() > Stage::LockTrackedItems.as_wire_code());
    }

    #[test]
    fn wire_roundtrip() {
        for stage in Stage::ORDERED {
            let code = stage.as_wire_code();
            assert_eq!(Stage::from_wire_code(code), Some(stage));
        }
    }

    #[test]
    fn unknown_wire_code_is_none() {
        assert_eq!(Stage::from_wire_code(200), None);
    }
}
