use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use crate::core::types::{FileRecord, ShardId};
use crate::storage::block_cache::CacheStats;

pub type FileMap = BTreeMap<String, FileRecord>;

struct ShardEntry {
    generation: u64,
    files: Option<Arc<FileMap>>,
    loaded_at: Instant,
}

impl ShardEntry {
    fn empty(generation: u64) -> Self {
        ShardEntry {
            generation,
            files: None,
            loaded_at: Instant::now(),
        }
    }
}

/// Per-directory snapshot of each shard's file records.
///
/// Never authoritative: entries expire after `ttl` and are dropped whenever this
/// directory writes to the shard. The generation counter makes a load that raced an
/// invalidation harmless, since its result is discarded.
pub struct DirectoryCache {
    entries: RwLock<HashMap<ShardId, ShardEntry>>,
    ttl: Duration,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl DirectoryCache {
    /// `ttl == 0` disables caching
    pub fn new(ttl: Duration) -> Self {
        DirectoryCache {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn generation(&self, shard: &ShardId) -> u64 {
        self.entries
            .read()
            .get(shard)
            .map(|entry| entry.generation)
            .unwrap_or(0)
    }

    /// Fresh snapshot of a shard, if one is cached
    pub fn get(&self, shard: &ShardId) -> Option<Arc<FileMap>> {
        if !self.enabled() {
            return None;
        }

        let entries = self.entries.read();
        let files = entries
            .get(shard)
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .and_then(|entry| entry.files.clone());

        match files {
            Some(files) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(files)
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a snapshot loaded while the shard was at `generation`.
    /// Returns false when an invalidation happened in between.
    pub fn fill(&self, shard: &ShardId, generation: u64, files: Arc<FileMap>) -> bool {
        if !self.enabled() {
            return false;
        }

        let mut entries = self.entries.write();
        let entry = entries
            .entry(shard.clone())
            .or_insert_with(|| ShardEntry::empty(0));
        if entry.generation != generation {
            return false;
        }
        entry.files = Some(files);
        entry.loaded_at = Instant::now();
        true
    }

    pub fn invalidate(&self, shard: &ShardId) {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(shard.clone())
            .or_insert_with(|| ShardEntry::empty(0));
        entry.generation += 1;
        entry.files = None;
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        for entry in entries.values_mut() {
            entry.generation += 1;
            entry.files = None;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: entries.values().filter(|e| e.files.is_some()).count(),
            capacity: entries.len(),
        }
    }
}
