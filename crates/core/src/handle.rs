//! Handle & Versioning (spec §4.A)
//!
//! A `Handle` mediates every logical object in the registry. Two physical
//! IDs let a writer stage a new version (the *inactive* ID) without
//! disturbing readers (who always read the *active* ID). A successful
//! commit flips active and bumps `version`.

use crate::clock::Clock;
use crate::types::{LogicalId, PhysicalId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from invalid `Handle` state transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandleError {
    /// `allocate_inactive_id` was called while an inactive slot was already allocated.
    #[error("inactive physical ID already allocated for {0}")]
    InactiveAlreadyAllocated(LogicalId),
    /// `flip_active` / `activate` was called with no inactive slot allocated.
    #[error("no inactive physical ID allocated for {0}")]
    NoInactiveAllocated(LogicalId),
}

/// Registry record binding a logical ID to active/inactive physical slots.
///
/// Invariants (spec §3, §4.A):
/// - Exactly one of `physical_id_a` / `physical_id_b` is active, and the
///   active slot is always populated.
/// - `version` is monotonically increasing.
/// - `is_deleted = true` is a logical deletion awaiting finalization.
/// - `work_in_progress_timestamp != 0` marks an in-flight commit owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    /// The logical identifier this handle serves.
    pub logical_id: LogicalId,
    /// Physical slot A; `None` only when slot A is the (unallocated) shadow.
    pub physical_id_a: Option<PhysicalId>,
    /// Physical slot B; `None` only when slot B is the (unallocated) shadow.
    pub physical_id_b: Option<PhysicalId>,
    /// True if slot A is the active (reader-visible) slot.
    pub active_is_a: bool,
    /// Monotonically increasing version.
    pub version: u64,
    /// Logical deletion pending finalization.
    pub is_deleted: bool,
    /// Non-zero while a commit owns this handle.
    pub work_in_progress_timestamp: i64,
}

impl Handle {
    /// Create a fresh handle at version 0, with slot A active and no
    /// inactive slot allocated.
    pub fn new(logical_id: LogicalId, physical_id_a: PhysicalId) -> Self {
        Handle {
            logical_id,
            physical_id_a: Some(physical_id_a),
            physical_id_b: None,
            active_is_a: true,
            version: 0,
            is_deleted: false,
            work_in_progress_timestamp: 0,
        }
    }

    /// The currently active physical ID.
    pub fn get_active_id(&self) -> PhysicalId {
        if self.active_is_a {
            self.physical_id_a.expect("active slot A must be populated")
        } else {
            self.physical_id_b.expect("active slot B must be populated")
        }
    }

    /// The currently inactive physical ID, if one is allocated.
    pub fn get_inactive_id(&self) -> Option<PhysicalId> {
        if self.active_is_a {
            self.physical_id_b
        } else {
            self.physical_id_a
        }
    }

    /// Allocate a fresh inactive physical ID so a shadow write can proceed.
    ///
    /// Fails if an inactive slot is already allocated.
    pub fn allocate_inactive_id(&mut self) -> Result<PhysicalId, HandleError> {
        if self.get_inactive_id().is_some() {
            return Err(HandleError::InactiveAlreadyAllocated(self.logical_id));
        }
        let fresh = PhysicalId::new();
        if self.active_is_a {
            self.physical_id_b = Some(fresh);
        } else {
            self.physical_id_a = Some(fresh);
        }
        Ok(fresh)
    }

    /// Clear the inactive slot, e.g. after rolling back a staged update.
    pub fn clear_inactive_id(&mut self) {
        if self.active_is_a {
            self.physical_id_b = None;
        } else {
            self.physical_id_a = None;
        }
    }

    /// Swap which slot is active. Requires an inactive slot to be allocated.
    /// Does not touch `version`.
    pub fn flip_active(&mut self) -> Result<(), HandleError> {
        if self.get_inactive_id().is_none() {
            return Err(HandleError::NoInactiveAllocated(self.logical_id));
        }
        self.active_is_a = !self.active_is_a;
        Ok(())
    }

    /// Successful finalization: bump version, clear the in-flight marker.
    pub fn touch(&mut self) {
        self.version += 1;
        self.work_in_progress_timestamp = 0;
    }

    /// Phase-1 staging of an update: flip active, bump version, and mark
    /// this handle as in-flight.
    pub fn activate(&mut self, clock: &dyn Clock) -> Result<(), HandleError> {
        self.flip_active()?;
        self.version += 1;
        self.work_in_progress_timestamp = clock.now_millis();
        Ok(())
    }

    /// True while a commit owns this handle.
    pub fn is_work_in_progress(&self) -> bool {
        self.work_in_progress_timestamp != 0
    }

    /// Clear the in-flight marker without touching version or active slot.
    ///
    /// Used at phase-2 finalization for handles that were already flipped
    /// (and version-bumped) by [`Handle::activate`] during phase-1 staging,
    /// or for removed handles whose `is_deleted` flag was set during
    /// phase-1's `commitRemovedNodes`: the only remaining step is to retire
    /// the commit-owner marker so the handle reads as quiescent again.
    pub fn clear_wip(&mut self) {
        self.work_in_progress_timestamp = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn new_handle_has_active_slot_a_and_no_inactive() {
        let h = Handle::new(LogicalId::new(), PhysicalId::new());
        assert!(h.active_is_a);
        assert_eq!(h.get_active_id(), h.physical_id_a.unwrap());
        assert!(h.get_inactive_id().is_none());
        assert_eq!(h.version, 0);
    }

    #[test]
    fn allocate_inactive_fails_when_already_allocated() {
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        h.allocate_inactive_id().unwrap();
        assert!(matches!(
            h.allocate_inactive_id(),
            Err(HandleError::InactiveAlreadyAllocated(_))
        ));
    }

    #[test]
    fn flip_active_requires_inactive_allocated() {
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        assert!(matches!(h.flip_active(), Err(HandleError::NoInactiveAllocated(_))));
        h.allocate_inactive_id().unwrap();
        assert!(h.flip_active().is_ok());
        assert!(!h.active_is_a);
    }

    #[test]
    fn active_and_inactive_are_always_distinct() {
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        h.allocate_inactive_id().unwrap();
        assert_ne!(h.get_active_id(), h.get_inactive_id().unwrap());
        h.flip_active().unwrap();
        assert_ne!(h.get_active_id(), h.get_inactive_id().unwrap());
    }

    #[test]
    fn touch_bumps_version_and_clears_wip() {
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        h.work_in_progress_timestamp = 12345;
        h.touch();
        assert_eq!(h.version, 1);
        assert_eq!(h.work_in_progress_timestamp, 0);
    }

    #[test]
    fn activate_flips_bumps_and_stamps_wip() {
        let clock = ManualClock::new(42);
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        h.allocate_inactive_id().unwrap();
        h.activate(&clock).unwrap();
        assert!(!h.active_is_a);
        assert_eq!(h.version, 1);
        assert_eq!(h.work_in_progress_timestamp, 42);
        assert!(h.is_work_in_progress());
    }

    #[test]
    fn clear_wip_leaves_version_and_active_untouched() {
        let clock = ManualClock::new(7);
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        h.allocate_inactive_id().unwrap();
        h.activate(&clock).unwrap();
        let (version, active_is_a) = (h.version, h.active_is_a);
        h.clear_wip();
        assert_eq!(h.version, version);
        assert_eq!(h.active_is_a, active_is_a);
        assert!(!h.is_work_in_progress());
    }

    #[test]
    fn activate_without_inactive_fails() {
        let clock = ManualClock::new(1);
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        assert!(h.activate(&clock).is_err());
    }

    #[test]
    fn version_is_monotonic_across_repeated_activate_touch() {
        let clock = ManualClock::new(0);
        let mut h = Handle::new(LogicalId::new(), PhysicalId::new());
        let mut last = h.version;
        for _ in 0..5 {
            h.allocate_inactive_id().unwrap();
            h.activate(&clock).unwrap();
            assert!(h.version > last);
            last = h.version;
            h.touch();
            assert!(h.version > last);
            last = h.version;
            h.clear_inactive_id();
        }
    }
}
