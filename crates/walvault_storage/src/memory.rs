//! In-memory archive store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::ArchiveStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory archive store.
///
/// This store keeps all objects in a sorted map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral catalogs that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use walvault_storage::{ArchiveStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.put("wals/00000001/seg", b"payload").unwrap();
/// assert_eq!(store.get("wals/00000001/seg").unwrap(), b"payload");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Removes every object. Useful for test setup.
    pub fn clear(&self) {
        self.objects.write().clear();
    }
}

impl ArchiveStore for InMemoryStore {
    fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::not_found(path))
    }

    fn put(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        self.objects.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        match self.objects.write().remove(path) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(path)),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> StoreResult<()> {
        let mut objects = self.objects.write();
        objects.retain(|path, _| !path.starts_with(prefix));
        Ok(())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn contains(&self, path: &str) -> StoreResult<bool> {
        Ok(self.objects.read().contains_key(path))
    }
}
