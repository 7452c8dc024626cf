//! In-memory reference [`Registry`] implementation
//!
//! Per §1, the registry's concrete backend (cassandra/redis-backed, in a
//! real deployment) is out of scope. This is the one reference/test
//! backend the workspace ships so the transaction manager is exercisable
//! end to end, the way the teacher's `ShardedStore` backs
//! `TransactionManager` tests with an in-memory `Storage` impl rather than
//! a real disk-backed one.

use dashmap::DashMap;
use vtree_core::error::{Error, Result};
use vtree_core::traits::Registry;
use vtree_core::{Handle, LogicalId};

/// A `DashMap`-backed registry: correct under concurrent access, with no
/// persistence and no distributed-sector failure modes of its own (those
/// are simulated explicitly by tests that need to exercise
/// `SectorFailure` handling).
#[derive(Default)]
pub struct InMemoryRegistry {
    handles: DashMap<LogicalId, Handle>,
}

impl InMemoryRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        InMemoryRegistry::default()
    }

    /// Total number of registered handles; mainly a test convenience.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if no handles are registered.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Registry for InMemoryRegistry {
    fn add(&self, handles: &[Handle]) -> Result<()> {
        for handle in handles {
            if self.handles.contains_key(&handle.logical_id) {
                return Err(Error::Usage(format!(
                    "registry.add: logical ID {} already registered",
                    handle.logical_id
                )));
            }
        }
        for handle in handles {
            self.handles.insert(handle.logical_id, handle.clone());
        }
        Ok(())
    }

    fn update(&self, handles: &[Handle]) -> Result<()> {
        for handle in handles {
            self.handles.insert(handle.logical_id, handle.clone());
        }
        Ok(())
    }

    fn update_no_locks(&self, all_or_nothing: bool, handles: &[Handle]) -> Result<()> {
        if all_or_nothing {
            for handle in handles {
                if !self.handles.contains_key(&handle.logical_id) {
                    return Err(Error::Conflict(format!(
                        "registry.update_no_locks: logical ID {} not registered",
                        handle.logical_id
                    )));
                }
            }
        }
        for handle in handles {
            self.handles.insert(handle.logical_id, handle.clone());
        }
        Ok(())
    }

    fn get(&self, logical_ids: &[LogicalId]) -> Result<Vec<Option<Handle>>> {
        Ok(logical_ids.iter().map(|id| self.handles.get(id).map(|h| h.clone())).collect())
    }

    fn remove(&self, logical_ids: &[LogicalId]) -> Result<()> {
        for id in logical_ids {
            self.handles.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtree_core::PhysicalId;

    fn new_handle() -> Handle {
        Handle::new(LogicalId::new(), PhysicalId::new())
    }

    #[test]
    fn add_rejects_duplicate_logical_id() {
        let registry = InMemoryRegistry::new();
        let h = new_handle();
        registry.add(&[h.clone()]).unwrap();
        assert!(registry.add(&[h]).is_err());
    }

    #[test]
    fn get_returns_none_for_unregistered() {
        let registry = InMemoryRegistry::new();
        let result = registry.get(&[LogicalId::new()]).unwrap();
        assert_eq!(result, vec![None]);
    }

    #[test]
    fn update_no_locks_all_or_nothing_rejects_unknown_id() {
        let registry = InMemoryRegistry::new();
        let known = new_handle();
        registry.add(&[known.clone()]).unwrap();
        let unknown = new_handle();
        let err = registry.update_no_locks(true, &[known, unknown]);
        assert!(err.is_err());
    }

    #[test]
    fn remove_then_get_is_none() {
        let registry = InMemoryRegistry::new();
        let h = new_handle();
        registry.add(&[h.clone()]).unwrap();
        registry.remove(&[h.logical_id]).unwrap();
        assert_eq!(registry.get(&[h.logical_id]).unwrap(), vec![None]);
    }
}
