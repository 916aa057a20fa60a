pub mod core;
pub mod store;
pub mod storage;
pub mod memory;
pub mod reader;
pub mod writer;
pub mod directory;
pub mod export;

pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{FileRecord, OwnerId, ShardId};
pub use crate::directory::{Directory, DistributedDirectory, ShardDirectory};
pub use crate::export::{ExportReport, ExportedFile};
pub use crate::reader::chunk_input::ChunkInput;
pub use crate::store::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};
pub use crate::writer::chunk_output::ChunkOutput;

/*
┌──────────────────────────────────── DIRECTORY LAYER ────────────────────────────────────┐
│                                                                                          │
│  ┌──────────────────────────────────────┐     ┌──────────────────────────────────────┐  │
│  │ struct DistributedDirectory          │     │ struct ShardDirectory (impl Directory)│  │
│  │ • shards: BTreeMap<ShardId, State>   │────▶│ • list_all / file_length / exists     │  │
│  │ • cache: Arc<DirectoryCache>         │     │ • create_output -> ChunkOutput        │  │
│  │ • held: Mutex<Map<ShardId, Guard>>   │     │ • open_input    -> ChunkInput         │  │
│  │ • copy_to_local() -> ExportReport    │     │ • rename / delete_file / obtain_lock  │  │
│  └──────────────────────────────────────┘     └──────────────────────────────────────┘  │
└──────────────────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────────── STORAGE LAYER ─────────────────────────────────────┐
│                                                                                          │
│  ┌────────────────────────┐  ┌────────────────────────┐  ┌────────────────────────────┐ │
│  │ struct ChunkStore      │  │ struct DistributedLock │  │ struct BlockCache          │ │
│  │ • layout: ShardLayout  │  │ • lease via CAS        │  │ • (file, revision, index)  │ │
│  │ • blocks: BlockCache   │  │ • LockGuard heartbeat  │  │   -> Bytes, LRU            │ │
│  └────────────────────────┘  └────────────────────────┘  └────────────────────────────┘ │
└──────────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────────── STORE LAYER ──────────────────────────────────────┐
│                                                                                          │
│  trait DocumentStore: get / put / delete / keys / scan / compare_and_set / batch         │
│  ├── MemoryDocumentStore   (tests, single process)                                       │
│  └── SqliteDocumentStore   (shared file, many processes)                                 │
│                                                                                          │
│  <index>.<shard>.files   FileRecord per name                                             │
│  <index>.<shard>.chunks  ChunkDoc per (file id, index)                                   │
│  <index>.locks           LockRecord per shard                                            │
└──────────────────────────────────────────────────────────────────────────────────────────┘
*/
