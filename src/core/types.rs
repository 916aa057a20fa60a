use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one independent shard (logical index instance)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        ShardId(id.to_string())
    }
}

/// Lock holder identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        OwnerId(id.into())
    }

    pub fn random() -> Self {
        OwnerId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage identity of a file's content. Chunks hang off this, not off the name,
/// so a rename only rewrites metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        FileId(Uuid::new_v4())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// File metadata document, one per (shard, name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub file_id: FileId,
    pub length: u64,
    pub last_modified: DateTime<Utc>,
    pub chunk_size: u32,
    pub chunk_count: u64,
    pub revision: u64,     // Bumped on every persisted write
}

impl FileRecord {
    pub fn new(name: &str, chunk_size: u32, now: DateTime<Utc>) -> Self {
        FileRecord {
            name: name.to_string(),
            file_id: FileId::new(),
            length: 0,
            last_modified: now,
            chunk_size,
            chunk_count: 0,
            revision: 0,
        }
    }

    pub fn chunks_for(&self, length: u64) -> u64 {
        length.div_ceil(self.chunk_size as u64)
    }

    /// Bytes actually covered by chunk `index` given the current length
    pub fn chunk_len(&self, index: u64) -> usize {
        let start = index * self.chunk_size as u64;
        if start >= self.length {
            return 0;
        }
        (self.length - start).min(self.chunk_size as u64) as usize
    }
}

/// One fixed-size slice of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDoc {
    pub file_id: FileId,
    pub index: u64,
    pub crc: u32,
    pub payload: Vec<u8>,
}

impl ChunkDoc {
    pub fn new(file_id: FileId, index: u64, payload: Vec<u8>) -> Self {
        let crc = crc32fast::hash(&payload);
        ChunkDoc { file_id, index, crc, payload }
    }

    pub fn verify(&self) -> bool {
        crc32fast::hash(&self.payload) == self.crc
    }
}

/// Lease record, at most one live record per shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub shard: ShardId,
    pub owner: OwnerId,
    pub acquired_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl LockRecord {
    /// A lease is live up to and including its expiry instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}
