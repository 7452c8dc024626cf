//! `acquireLocks` (spec §4.D)
//!
//! Extracts the logical IDs a commit attempt touched, sorts them into
//! UUID total order for deadlock avoidance, and attempts one batched
//! distributed lock. The post-conditions below are each named after the
//! spec's own branch so the control flow reads the same as the prose.

use vtree_core::error::{Error, Result};
use vtree_core::traits::{L2Cache, LockOutcome};
use vtree_core::TransactionId;

/// Sort and deduplicate keys into the total order `acquireLocks` requires
/// before a batched lock attempt.
pub fn sorted_unique_keys(mut keys: Vec<String>) -> Vec<String> {
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Attempt a single batched lock over `keys`, already sorted by
/// [`sorted_unique_keys`]. Mirrors `acquireLocks`'s four post-conditions.
pub fn acquire_locks(cache: &dyn L2Cache, tid: TransactionId, keys: &[String], ttl: std::time::Duration) -> Result<LockOutcome> {
    if keys.is_empty() {
        return Ok(LockOutcome { acquired: true, confirmed: true });
    }

    let outcome = cache.lock(keys, tid, ttl)?;
    if outcome.acquired && outcome.confirmed {
        return Ok(outcome);
    }
    if outcome.acquired && !outcome.confirmed {
        cache.unlock(keys, tid)?;
        return Err(Error::sector_failure_with_lock_key("partial lock acquisition", keys[0].clone()));
    }

    // outcome.acquired == false: someone else may already hold these keys.
    match cache.lock_owner(&keys[0])? {
        Some(owner) if owner != tid => {
            cache.unlock(keys, tid)?;
            Err(Error::Conflict(format!("lock key {} held by another transaction", keys[0])))
        }
        Some(_) => {
            // We already own this batch; extend and assume ownership.
            for key in keys {
                cache.get_ex(key, ttl)?;
            }
            Ok(LockOutcome { acquired: true, confirmed: true })
        }
        None => Err(Error::Resource(format!("could not attain lock for {}", keys[0]))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vtree_core::clock::ManualClock;
    use vtree_storage::InMemoryL2Cache;

    fn cache() -> InMemoryL2Cache {
        InMemoryL2Cache::new(Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn sorted_unique_keys_dedupes_and_orders() {
        let keys = sorted_unique_keys(vec!["b".into(), "a".into(), "b".into()]);
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn empty_key_set_trivially_succeeds() {
        let cache = cache();
        let tid = TransactionId::new();
        let outcome = acquire_locks(&cache, tid, &[], Duration::from_secs(60)).unwrap();
        assert!(outcome.acquired && outcome.confirmed);
    }

    #[test]
    fn fresh_keys_acquire_cleanly() {
        let cache = cache();
        let tid = TransactionId::new();
        let keys = vec!["item1".to_string(), "item2".to_string()];
        let outcome = acquire_locks(&cache, tid, &keys, Duration::from_secs(60)).unwrap();
        assert!(outcome.acquired && outcome.confirmed);
    }

    #[test]
    fn owned_by_another_transaction_conflicts() {
        let cache = cache();
        let a = TransactionId::new();
        let b = TransactionId::new();
        let keys = vec!["item1".to_string()];
        acquire_locks(&cache, a, &keys, Duration::from_secs(60)).unwrap();
        let result = acquire_locks(&cache, b, &keys, Duration::from_secs(60));
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn reacquiring_own_lock_extends_it() {
        let cache = cache();
        let tid = TransactionId::new();
        let keys = vec!["item1".to_string()];
        acquire_locks(&cache, tid, &keys, Duration::from_secs(60)).unwrap();
        let outcome = acquire_locks(&cache, tid, &keys, Duration::from_secs(60)).unwrap();
        assert!(outcome.acquired && outcome.confirmed);
    }
}
