//! In-memory reference [`StoreRepository`] implementation

use dashmap::DashMap;
use vtree_core::error::Result;
use vtree_core::traits::StoreRepository;
use vtree_core::StoreInfo;

/// `DashMap`-backed store repository, keyed by store name.
#[derive(Default)]
pub struct InMemoryStoreRepository {
    stores: DashMap<String, StoreInfo>,
}

impl InMemoryStoreRepository {
    /// Construct an empty repository.
    pub fn new() -> Self {
        InMemoryStoreRepository::default()
    }

    /// Register a store's initial metadata; a test/bootstrap convenience
    /// distinct from `update` (which the spec reserves for phase-1's
    /// `commitStoreInfo`).
    pub fn register(&self, info: StoreInfo) {
        self.stores.insert(info.name.clone(), info);
    }
}

impl StoreRepository for InMemoryStoreRepository {
    fn get(&self, name: &str) -> Result<Option<StoreInfo>> {
        Ok(self.stores.get(name).map(|s| s.clone()))
    }

    fn update(&self, info: StoreInfo) -> Result<()> {
        self.stores.insert(info.name.clone(), info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtree_core::LogicalId;

    #[test]
    fn register_then_get_round_trips() {
        let repo = InMemoryStoreRepository::new();
        let info = StoreInfo::new("orders", 64, true, LogicalId::new());
        repo.register(info.clone());
        assert_eq!(repo.get("orders").unwrap(), Some(info));
    }

    #[test]
    fn update_overwrites() {
        let repo = InMemoryStoreRepository::new();
        let mut info = StoreInfo::new("orders", 64, true, LogicalId::new());
        repo.register(info.clone());
        info.count = 5;
        repo.update(info.clone()).unwrap();
        assert_eq!(repo.get("orders").unwrap().unwrap().count, 5);
    }

    #[test]
    fn get_unknown_store_is_none() {
        let repo = InMemoryStoreRepository::new();
        assert_eq!(repo.get("missing").unwrap(), None);
    }
}
