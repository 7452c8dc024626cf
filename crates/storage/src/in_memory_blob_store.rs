//! In-memory reference [`BlobStore`] implementation
//!
//! As with [`crate::in_memory_registry::InMemoryRegistry`], the production
//! blob store (content-addressed, backed by something like S3 or a disk
//! segment file) is out of scope per §1. This backend keyed by
//! `(table, id)` is the test double the rest of the crate family is
//! exercised against.

use dashmap::DashMap;
use vtree_core::error::Result;
use vtree_core::traits::BlobStore;
use vtree_core::PhysicalId;

/// `DashMap`-backed blob store, namespaced by table.
#[derive(Default)]
pub struct InMemoryBlobStore {
    tables: DashMap<String, DashMap<PhysicalId, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Construct an empty blob store.
    pub fn new() -> Self {
        InMemoryBlobStore::default()
    }

    /// Count of blobs currently stored in `table`; a test convenience for
    /// asserting obsolete blobs were actually reclaimed.
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.len()).unwrap_or(0)
    }
}

impl BlobStore for InMemoryBlobStore {
    fn add(&self, table: &str, id: PhysicalId, payload: Vec<u8>) -> Result<()> {
        self.tables.entry(table.to_string()).or_default().insert(id, payload);
        Ok(())
    }

    fn update(&self, table: &str, id: PhysicalId, payload: Vec<u8>) -> Result<()> {
        self.add(table, id, payload)
    }

    fn remove(&self, table: &str, id: PhysicalId) -> Result<()> {
        if let Some(t) = self.tables.get(table) {
            t.remove(&id);
        }
        Ok(())
    }

    fn get_one(&self, table: &str, id: PhysicalId) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.get(table).and_then(|t| t.get(&id).map(|v| v.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_round_trips() {
        let store = InMemoryBlobStore::new();
        let id = PhysicalId::new();
        store.add("orders/blobs", id, vec![1, 2, 3]).unwrap();
        assert_eq!(store.get_one("orders/blobs", id).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn remove_absent_blob_is_not_an_error() {
        let store = InMemoryBlobStore::new();
        assert!(store.remove("orders/blobs", PhysicalId::new()).is_ok());
    }

    #[test]
    fn tables_are_isolated() {
        let store = InMemoryBlobStore::new();
        let id = PhysicalId::new();
        store.add("a", id, vec![1]).unwrap();
        assert_eq!(store.get_one("b", id).unwrap(), None);
    }
}
