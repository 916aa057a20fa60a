use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::RwLock;
use crate::core::error::{Error, Result};
use crate::store::document::{DocumentStore, WriteOp};

type Collection = BTreeMap<String, Vec<u8>>;

/// In-process document store.
///
/// Shared through an `Arc`, it stands in for one database server that several
/// directory instances talk to. `set_available(false)` simulates an outage.
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
    available: AtomicBool,
    round_trips: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        MemoryDocumentStore {
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            round_trips: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of calls served so far
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::Relaxed)
    }

    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn check(&self) -> Result<()> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::unavailable("memory store is offline"))
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        MemoryDocumentStore::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let collections = self.collections.read();
        Ok(collections.get(collection).and_then(|c| c.get(key)).cloned())
    }

    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<()> {
        self.check()?;
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        self.check()?;
        let mut collections = self.collections.write();
        Ok(collections
            .get_mut(collection)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false))
    }

    fn keys(&self, collection: &str) -> Result<Vec<String>> {
        self.check()?;
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.check()?;
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn compare_and_set(
        &self,
        collection: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        self.check()?;
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();

        if docs.get(key).map(|v| v.as_slice()) != expected {
            return Ok(false);
        }

        match new {
            Some(value) => {
                docs.insert(key.to_string(), value.to_vec());
            }
            None => {
                docs.remove(key);
            }
        }
        Ok(true)
    }

    fn batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        self.check()?;
        // One write guard for the whole batch: readers see all or nothing
        let mut collections = self.collections.write();
        for op in ops {
            match op {
                WriteOp::Put { collection, key, value } => {
                    collections.entry(collection).or_default().insert(key, value);
                }
                WriteOp::Delete { collection, key } => {
                    if let Some(docs) = collections.get_mut(&collection) {
                        docs.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn compare_and_set_only_applies_on_match() {
        let store = MemoryDocumentStore::new();
        assert!(store.compare_and_set("locks", "s1", None, Some(&b"a"[..])).unwrap());
        assert!(!store.compare_and_set("locks", "s1", None, Some(&b"b"[..])).unwrap());
        assert!(!store.compare_and_set("locks", "s1", Some(&b"x"[..]), Some(&b"b"[..])).unwrap());
        assert!(store.compare_and_set("locks", "s1", Some(&b"a"[..]), None).unwrap());
        assert_eq!(store.get("locks", "s1").unwrap(), None);
    }

    #[test]
    fn batch_applies_every_operation() {
        let store = MemoryDocumentStore::new();
        store.put("files", "old", b"1").unwrap();
        store
            .batch(vec![WriteOp::put("files", "new", b"1".to_vec()), WriteOp::delete("files", "old")])
            .unwrap();
        assert_eq!(store.keys("files").unwrap(), vec!["new".to_string()]);
    }

    #[test]
    fn offline_store_reports_unavailable() {
        let store = MemoryDocumentStore::new();
        store.set_available(false);
        let err = store.get("files", "a").unwrap_err();
        assert_eq!(err.kind, ErrorKind::StoreUnavailable);
    }
}
