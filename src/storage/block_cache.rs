use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use crate::core::types::FileId;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct BlockKey {
    pub file_id: FileId,
    pub revision: u64,
    pub index: u64,
}

/// LRU cache of verified chunk payloads, shared by every handle of one chunk store
pub struct BlockCache {
    cache: Option<Mutex<LruCache<BlockKey, Bytes>>>,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl BlockCache {
    /// `capacity == 0` disables caching
    pub fn new(capacity: usize) -> Self {
        BlockCache {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &BlockKey) -> Option<Bytes> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock();
        if let Some(block) = cache.get(key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            Some(block.clone())
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, key: BlockKey, block: Bytes) {
        if let Some(cache) = &self.cache {
            cache.lock().put(key, block);
        }
    }

    /// Drop every cached block of a file, whatever its revision
    pub fn invalidate_file(&self, file_id: &FileId) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            let stale: Vec<BlockKey> = cache
                .iter()
                .filter(|(k, _)| k.file_id == *file_id)
                .map(|(k, _)| *k)
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0),
            capacity: self.cache.as_ref().map(|c| c.lock().cap().get()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_file_drops_only_that_file() {
        let cache = BlockCache::new(8);
        let a = FileId::new();
        let b = FileId::new();
        cache.put(BlockKey { file_id: a, revision: 1, index: 0 }, Bytes::from_static(b"a0"));
        cache.put(BlockKey { file_id: a, revision: 2, index: 1 }, Bytes::from_static(b"a1"));
        cache.put(BlockKey { file_id: b, revision: 1, index: 0 }, Bytes::from_static(b"b0"));

        cache.invalidate_file(&a);

        assert!(cache.get(&BlockKey { file_id: a, revision: 1, index: 0 }).is_none());
        assert!(cache.get(&BlockKey { file_id: a, revision: 2, index: 1 }).is_none());
        assert_eq!(
            cache.get(&BlockKey { file_id: b, revision: 1, index: 0 }),
            Some(Bytes::from_static(b"b0"))
        );
    }

    #[test]
    fn zero_capacity_never_caches() {
        let cache = BlockCache::new(0);
        let key = BlockKey { file_id: FileId::new(), revision: 0, index: 0 };
        cache.put(key, Bytes::from_static(b"x"));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().capacity, 0);
    }
}
