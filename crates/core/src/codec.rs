//! Structured (de)serialization helpers layered on [`crate::traits::L2Cache`]
//!
//! The spec's `L2Cache` interface (§6) exposes `SetStruct`/`GetStruct`/
//! `GetStructs` directly. Making those trait methods would force `L2Cache`
//! to be generic and therefore not object-safe, so instead they live here
//! as free functions over the byte-level `set`/`get`/`get_many`, using
//! `bincode` the way the teacher's codec layer serializes WAL payloads.

use crate::error::{Error, Result};
use crate::traits::L2Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Serialize `value` with bincode and write it to `key` (the spec's
/// `SetStruct`).
pub fn set_struct<T: Serialize>(cache: &dyn L2Cache, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
    let bytes = bincode::serialize(value).map_err(|e| Error::Resource(format!("bincode encode: {e}")))?;
    cache.set(key, bytes, ttl)
}

/// Read and deserialize a value written by [`set_struct`] (the spec's
/// `GetStruct`).
pub fn get_struct<T: DeserializeOwned>(cache: &dyn L2Cache, key: &str) -> Result<Option<T>> {
    match cache.get(key)? {
        Some(bytes) => {
            let value = bincode::deserialize(&bytes).map_err(|e| Error::Resource(format!("bincode decode: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Batch form of [`get_struct`] (the spec's `GetStructs`).
pub fn get_structs<T: DeserializeOwned>(cache: &dyn L2Cache, keys: &[String]) -> Result<Vec<Option<T>>> {
    cache
        .get_many(keys)?
        .into_iter()
        .map(|slot| match slot {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| Error::Resource(format!("bincode decode: {e}"))),
            None => Ok(None),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockAction, LockRecord};
    use crate::types::TransactionId;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Minimal in-process L2Cache stub, just enough to exercise the codec
    /// helpers without pulling in vtree-storage (which depends on this
    /// crate, not the other way around).
    #[derive(Default)]
    struct StubCache {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl L2Cache for StubCache {
        fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            self.data.lock().insert(key.to_string(), value);
            Ok(())
        }
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.data.lock().get(key).cloned())
        }
        fn get_ex(&self, key: &str, _ttl: Duration) -> Result<Option<Vec<u8>>> {
            self.get(key)
        }
        fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            keys.iter().map(|k| self.get(k)).collect()
        }
        fn delete(&self, key: &str) -> Result<()> {
            self.data.lock().remove(key);
            Ok(())
        }
        fn lock(&self, _keys: &[String], _owner: TransactionId, _ttl: Duration) -> Result<crate::traits::LockOutcome> {
            unimplemented!("not exercised by codec tests")
        }
        fn unlock(&self, _keys: &[String], _owner: TransactionId) -> Result<()> {
            Ok(())
        }
        fn is_locked(&self, _keys: &[String], _owner: TransactionId) -> Result<bool> {
            Ok(false)
        }
        fn lock_owner(&self, _key: &str) -> Result<Option<TransactionId>> {
            Ok(None)
        }
    }

    #[test]
    fn round_trips_a_lock_record() {
        let cache = StubCache::default();
        let record = LockRecord::new(TransactionId::new(), LockAction::Update);
        set_struct(&cache, "lk:item1", &record, None).unwrap();
        let fetched: Option<LockRecord> = get_struct(&cache, "lk:item1").unwrap();
        assert_eq!(fetched, Some(record));
    }

    #[test]
    fn missing_key_is_none() {
        let cache = StubCache::default();
        let fetched: Option<LockRecord> = get_struct(&cache, "lk:missing").unwrap();
        assert_eq!(fetched, None);
    }

    #[test]
    fn get_structs_preserves_position() {
        let cache = StubCache::default();
        let a = LockRecord::new(TransactionId::new(), LockAction::Get);
        set_struct(&cache, "a", &a, None).unwrap();
        let keys = vec!["a".to_string(), "b".to_string()];
        let results: Vec<Option<LockRecord>> = get_structs(&cache, &keys).unwrap();
        assert_eq!(results, vec![Some(a), None]);
    }
}
