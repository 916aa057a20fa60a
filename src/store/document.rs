use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::core::error::Result;

/// One mutation inside an atomic [`DocumentStore::batch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put { collection: String, key: String, value: Vec<u8> },
    Delete { collection: String, key: String },
}

impl WriteOp {
    pub fn put(collection: &str, key: &str, value: Vec<u8>) -> Self {
        WriteOp::Put {
            collection: collection.to_string(),
            key: key.to_string(),
            value,
        }
    }

    pub fn delete(collection: &str, key: &str) -> Self {
        WriteOp::Delete {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }
}

/// What the directory needs from the backing document database.
///
/// Documents are opaque byte blobs addressed by `(collection, key)`. Every call is a
/// potential network round trip and may fail with `StoreUnavailable`; implementations
/// must be safe to share between threads and, for persistent backends, processes.
pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite
    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Returns whether a document was removed
    fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// All keys in a collection, sorted
    fn keys(&self, collection: &str) -> Result<Vec<String>>;

    /// All `(key, value)` pairs of a collection in key order, in one round trip
    fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Conditional write: applies `new` (None = delete) only if the current value
    /// equals `expected` (None = absent). Returns whether the write happened.
    fn compare_and_set(
        &self,
        collection: &str,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool>;

    /// Applies all operations or none of them
    fn batch(&self, ops: Vec<WriteOp>) -> Result<()>;
}

pub fn encode<T: Serialize>(doc: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(doc)?)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}

/// Typed fetch of a bincode-encoded document
pub fn get_doc<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(collection, key)? {
        Some(data) => Ok(Some(decode(&data)?)),
        None => Ok(None),
    }
}

pub fn put_doc<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    doc: &T,
) -> Result<()> {
    let data = encode(doc)?;
    store.put(collection, key, &data)
}
