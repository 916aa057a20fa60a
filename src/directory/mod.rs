pub mod cache;
pub mod distributed;

use chrono::{DateTime, Utc};
use crate::core::error::Result;
use crate::reader::chunk_input::ChunkInput;
use crate::writer::chunk_output::ChunkOutput;

pub use cache::DirectoryCache;
pub use distributed::{DirectoryStats, DistributedDirectory, ShardDirectory};

/// Flat file namespace a segment index reads and writes through.
///
/// Nothing about chunking, shards or the backing store shows through here.
pub trait Directory: Send + Sync {
    /// Names of every file, in sorted order
    fn list_all(&self) -> Result<Vec<String>>;

    fn file_exists(&self, name: &str) -> Result<bool>;

    /// `NotFound` if the file does not exist
    fn file_length(&self, name: &str) -> Result<u64>;

    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>>;

    /// Create a new empty file for writing. `AlreadyExists` if the name is taken.
    fn create_output(&self, name: &str) -> Result<ChunkOutput>;

    /// Open an existing file for reading
    fn open_input(&self, name: &str) -> Result<ChunkInput>;

    /// Atomically replace `to` with the content of `from`
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Deleting a missing file succeeds
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Take the exclusive write lock, waiting up to the configured timeout
    fn obtain_lock(&self) -> Result<()>;

    fn release_lock(&self) -> Result<()>;

    /// Release held locks and reject further calls
    fn close(&self) -> Result<()>;
}
