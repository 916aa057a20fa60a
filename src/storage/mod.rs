pub mod layout;
pub mod block_cache;
pub mod chunk_store;
pub mod shard_lock;
