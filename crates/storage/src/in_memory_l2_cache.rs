//! In-memory reference [`L2Cache`] implementation: TTL'd key/value store
//! plus distributed locks.
//!
//! Out of scope per §1 as a concrete distributed system; this is the
//! reference backend the rest of the workspace tests against, with a
//! [`Clock`] injected so TTL expiry is deterministic under test rather
//! than racing real wall-clock time.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vtree_core::clock::Clock;
use vtree_core::error::Result;
use vtree_core::traits::{L2Cache, LockOutcome};
use vtree_core::TransactionId;

struct Entry {
    value: Vec<u8>,
    expires_at_millis: Option<i64>,
}

struct LockEntry {
    owner: TransactionId,
    expires_at_millis: i64,
}

/// In-memory L2 cache and distributed lock table.
pub struct InMemoryL2Cache {
    clock: Arc<dyn Clock>,
    values: Mutex<HashMap<String, Entry>>,
    locks: Mutex<HashMap<String, LockEntry>>,
}

impl InMemoryL2Cache {
    /// Construct a cache driven by the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        InMemoryL2Cache {
            clock,
            values: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        match entry.expires_at_millis {
            Some(exp) => self.clock.now_millis() < exp,
            None => true,
        }
    }

    fn read_locked(&self, locks: &HashMap<String, LockEntry>, key: &str) -> Option<TransactionId> {
        let now = self.clock.now_millis();
        locks.get(key).filter(|l| l.expires_at_millis > now).map(|l| l.owner)
    }
}

impl L2Cache for InMemoryL2Cache {
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at_millis = ttl.map(|d| self.clock.now_millis() + d.as_millis() as i64);
        self.values.lock().insert(key.to_string(), Entry { value, expires_at_millis });
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut values = self.values.lock();
        match values.get(key) {
            Some(entry) if self.is_fresh(entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn get_ex(&self, key: &str, ttl: Duration) -> Result<Option<Vec<u8>>> {
        let mut values = self.values.lock();
        let fresh = values.get(key).map(|e| self.is_fresh(e)).unwrap_or(false);
        if !fresh {
            values.remove(key);
            return Ok(None);
        }
        let new_expiry = self.clock.now_millis() + ttl.as_millis() as i64;
        let entry = values.get_mut(key).expect("checked fresh above");
        entry.expires_at_millis = Some(new_expiry);
        Ok(Some(entry.value.clone()))
    }

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn lock(&self, keys: &[String], owner: TransactionId, ttl: Duration) -> Result<LockOutcome> {
        let mut locks = self.locks.lock();
        let now = self.clock.now_millis();
        for key in keys {
            if let Some(existing) = self.read_locked(&locks, key) {
                if existing != owner {
                    return Ok(LockOutcome { acquired: false, confirmed: false });
                }
            }
        }
        let expires_at_millis = now + ttl.as_millis() as i64;
        for key in keys {
            locks.insert(key.clone(), LockEntry { owner, expires_at_millis });
        }
        Ok(LockOutcome { acquired: true, confirmed: true })
    }

    fn unlock(&self, keys: &[String], owner: TransactionId) -> Result<()> {
        let mut locks = self.locks.lock();
        for key in keys {
            if locks.get(key).map(|l| l.owner) == Some(owner) {
                locks.remove(key);
            }
        }
        Ok(())
    }

    fn is_locked(&self, keys: &[String], owner: TransactionId) -> Result<bool> {
        let locks = self.locks.lock();
        Ok(keys.iter().all(|k| self.read_locked(&locks, k) == Some(owner)))
    }

    fn lock_owner(&self, key: &str) -> Result<Option<TransactionId>> {
        let locks = self.locks.lock();
        Ok(self.read_locked(&locks, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtree_core::clock::ManualClock;

    fn cache_with_clock() -> (InMemoryL2Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (InMemoryL2Cache::new(clock.clone()), clock)
    }

    #[test]
    fn set_then_get_round_trips() {
        let (cache, _clock) = cache_with_clock();
        cache.set("k", vec![1, 2, 3], None).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn value_expires_after_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", vec![1], Some(Duration::from_millis(100))).unwrap();
        clock.advance(50);
        assert_eq!(cache.get("k").unwrap(), Some(vec![1]));
        clock.advance(51);
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn get_ex_refreshes_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", vec![1], Some(Duration::from_millis(100))).unwrap();
        clock.advance(90);
        assert_eq!(cache.get_ex("k", Duration::from_millis(100)).unwrap(), Some(vec![1]));
        clock.advance(90);
        assert_eq!(cache.get("k").unwrap(), Some(vec![1]));
    }

    #[test]
    fn second_lock_by_different_owner_fails() {
        let (cache, _clock) = cache_with_clock();
        let a = TransactionId::new();
        let b = TransactionId::new();
        let keys = vec!["item1".to_string()];
        let outcome = cache.lock(&keys, a, Duration::from_secs(60)).unwrap();
        assert!(outcome.acquired);
        let outcome2 = cache.lock(&keys, b, Duration::from_secs(60)).unwrap();
        assert!(!outcome2.acquired);
    }

    #[test]
    fn same_owner_can_relock() {
        let (cache, _clock) = cache_with_clock();
        let a = TransactionId::new();
        let keys = vec!["item1".to_string()];
        cache.lock(&keys, a, Duration::from_secs(60)).unwrap();
        let outcome = cache.lock(&keys, a, Duration::from_secs(60)).unwrap();
        assert!(outcome.acquired);
    }

    #[test]
    fn lock_expires_and_can_be_reacquired_by_another() {
        let (cache, clock) = cache_with_clock();
        let a = TransactionId::new();
        let b = TransactionId::new();
        let keys = vec!["item1".to_string()];
        cache.lock(&keys, a, Duration::from_millis(100)).unwrap();
        clock.advance(101);
        let outcome = cache.lock(&keys, b, Duration::from_secs(60)).unwrap();
        assert!(outcome.acquired);
    }

    #[test]
    fn unlock_only_removes_owned_keys() {
        let (cache, _clock) = cache_with_clock();
        let a = TransactionId::new();
        let b = TransactionId::new();
        let keys = vec!["item1".to_string()];
        cache.lock(&keys, a, Duration::from_secs(60)).unwrap();
        cache.unlock(&keys, b).unwrap();
        assert!(cache.is_locked(&keys, a).unwrap());
        cache.unlock(&keys, a).unwrap();
        assert!(!cache.is_locked(&keys, a).unwrap());
    }
}
