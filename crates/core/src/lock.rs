//! Per-item distributed lock records (spec §3, §4.B)
//!
//! A `LockRecord` is what the registry's distributed lock slot actually
//! stores: which transaction holds it and under what action. Two records on
//! the same item are compatible only when both sides are read-only `Get`
//! locks — any `Add`/`Update`/`Remove` intent conflicts with every other
//! intent, including another writer's.

use crate::types::TransactionId;
use serde::{Deserialize, Serialize};

/// The intent a transaction is tracking for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockAction {
    /// Read-only; compatible with other `Get` locks.
    Get,
    /// Insert a brand-new item.
    Add,
    /// Modify an existing item.
    Update,
    /// Delete an existing item.
    Remove,
}

impl LockAction {
    /// `Get` is the only read-only action.
    pub fn is_read_only(self) -> bool {
        matches!(self, LockAction::Get)
    }
}

/// A lock held on one tracked item by one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockRecord {
    /// The transaction holding this lock.
    pub lock_id: TransactionId,
    /// The action the holder is performing under this lock.
    pub action: LockAction,
}

impl LockRecord {
    /// Build a new lock record.
    pub fn new(lock_id: TransactionId, action: LockAction) -> Self {
        LockRecord { lock_id, action }
    }

    /// Two lock records are compatible (may coexist on the same item) iff
    /// both are held for `Get`. Any write intent excludes every other
    /// holder, including another `Get`.
    pub fn compatible_with(&self, other: &LockRecord) -> bool {
        self.action.is_read_only() && other.action.is_read_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid() -> TransactionId {
        TransactionId::new()
    }

    #[test]
    fn two_gets_are_compatible() {
        let a = LockRecord::new(tid(), LockAction::Get);
        let b = LockRecord::new(tid(), LockAction::Get);
        assert!(a.compatible_with(&b));
    }

    #[test]
    fn get_and_update_are_incompatible() {
        let a = LockRecord::new(tid(), LockAction::Get);
        let b = LockRecord::new(tid(), LockAction::Update);
        assert!(!a.compatible_with(&b));
        assert!(!b.compatible_with(&a));
    }

    #[test]
    fn two_writers_are_incompatible_even_with_same_action() {
        let a = LockRecord::new(tid(), LockAction::Update);
        let b = LockRecord::new(tid(), LockAction::Update);
        assert!(!a.compatible_with(&b));
    }

    #[test]
    fn self_get_is_compatible_with_itself() {
        let id = tid();
        let a = LockRecord::new(id, LockAction::Get);
        assert!(a.compatible_with(&a));
    }
}
