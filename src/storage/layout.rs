use crate::core::types::{FileId, ShardId};

/// Collection names and document keys for one shard
#[derive(Debug, Clone)]
pub struct ShardLayout {
    pub index_name: String,
    pub shard: ShardId,
    pub files_collection: String,   // FileRecord documents keyed by file name
    pub chunks_collection: String,  // Chunk documents keyed by (file id, index)
    pub locks_collection: String,   // LockRecord documents keyed by shard, shared per index
}

impl ShardLayout {
    pub fn new(index_name: &str, shard: ShardId) -> Self {
        let files_collection = format!("{}.{}.files", index_name, shard);
        let chunks_collection = format!("{}.{}.chunks", index_name, shard);
        let locks_collection = format!("{}.locks", index_name);

        ShardLayout {
            index_name: index_name.to_string(),
            shard,
            files_collection,
            chunks_collection,
            locks_collection,
        }
    }

    /// Zero-padded so keys sort in chunk order
    pub fn chunk_key(&self, file_id: &FileId, index: u64) -> String {
        format!("{}:{:012}", file_id, index)
    }

    pub fn lock_key(&self) -> &str {
        self.shard.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_keys_sort_in_index_order() {
        let layout = ShardLayout::new("books", ShardId::new("s1"));
        let id = FileId::new();
        let mut keys = vec![layout.chunk_key(&id, 10), layout.chunk_key(&id, 9), layout.chunk_key(&id, 100)];
        keys.sort();
        assert_eq!(keys[0], layout.chunk_key(&id, 9));
        assert_eq!(keys[2], layout.chunk_key(&id, 100));
    }

    #[test]
    fn shards_get_separate_collections() {
        let a = ShardLayout::new("books", ShardId::new("s1"));
        let b = ShardLayout::new("books", ShardId::new("s2"));
        assert_ne!(a.files_collection, b.files_collection);
        assert_eq!(a.locks_collection, b.locks_collection);
    }
}
