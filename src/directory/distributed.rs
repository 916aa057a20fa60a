use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FileRecord, OwnerId, ShardId};
use crate::directory::Directory;
use crate::directory::cache::{DirectoryCache, FileMap};
use crate::memory::buffer_pool::BufferPool;
use crate::reader::chunk_input::ChunkInput;
use crate::storage::block_cache::CacheStats;
use crate::storage::chunk_store::ChunkStore;
use crate::storage::layout::ShardLayout;
use crate::storage::shard_lock::{DistributedLock, LockGuard};
use crate::store::document::DocumentStore;
use crate::writer::chunk_output::{ChunkOutput, FlushHook};

struct ShardState {
    store: Arc<ChunkStore>,
    lock: Arc<DistributedLock>,
    acquiring: Mutex<()>,  // One lock attempt at a time, so a shard never gets two guards
}

struct Inner {
    index_name: String,
    owner: OwnerId,
    config: Config,
    shards: BTreeMap<ShardId, ShardState>,
    cache: Arc<DirectoryCache>,
    pool: Arc<BufferPool>,
    held: Mutex<HashMap<ShardId, LockGuard>>,
    closed: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct DirectoryStats {
    pub shards: usize,
    pub locks_held: usize,
    pub metadata_cache: CacheStats,
    pub chunk_cache: CacheStats,  // Summed over shards
}

/// One logical index spread over several shards of a document store.
///
/// Each shard has its own chunk store and lease lock. Metadata lookups go through a
/// per-instance cache that is refreshed on TTL expiry, on this instance's own writes,
/// and whenever a cached name turns out to be gone.
#[derive(Clone)]
pub struct DistributedDirectory {
    inner: Arc<Inner>,
}

impl DistributedDirectory {
    pub fn open(
        store: Arc<dyn DocumentStore>,
        index_name: &str,
        shards: &[ShardId],
        config: Config,
    ) -> Result<Self> {
        Self::open_with_clock(store, index_name, shards, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        store: Arc<dyn DocumentStore>,
        index_name: &str,
        shards: &[ShardId],
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        validate_name("index", index_name)?;
        for shard in shards {
            validate_name("shard", shard.as_str())?;
        }
        if shards.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "at least one shard is required".to_string()));
        }

        let owner = config
            .owner
            .clone()
            .map(OwnerId::new)
            .unwrap_or_else(OwnerId::random);

        let mut states = BTreeMap::new();
        for shard in shards {
            let layout = ShardLayout::new(index_name, shard.clone());
            let lock = DistributedLock::new(store.clone(), &layout, owner.clone(), &config, clock.clone());
            let chunk_store = ChunkStore::new(store.clone(), layout, &config, clock.clone());
            let state = ShardState {
                store: Arc::new(chunk_store),
                lock: Arc::new(lock),
                acquiring: Mutex::new(()),
            };
            if states.insert(shard.clone(), state).is_some() {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("shard {} listed twice", shard),
                ));
            }
        }

        // Enough pooled memory to recycle one write buffer per shard
        let pool = BufferPool::new(config.write_buffer_size() * states.len());

        info!(
            "DistributedDirectory: opened index '{}' with {} shards as {}",
            index_name,
            states.len(),
            owner
        );

        Ok(DistributedDirectory {
            inner: Arc::new(Inner {
                index_name: index_name.to_string(),
                owner,
                cache: Arc::new(DirectoryCache::new(config.cache_ttl())),
                config,
                shards: states,
                pool: Arc::new(pool),
                held: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.inner.index_name
    }

    pub fn owner(&self) -> &OwnerId {
        &self.inner.owner
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.inner.shards.keys().cloned().collect()
    }

    /// Directory handle for one shard
    pub fn shard(&self, shard: impl Into<ShardId>) -> Result<ShardDirectory> {
        let shard = shard.into();
        self.inner.ensure_open()?;
        self.inner.state(&shard)?;
        Ok(ShardDirectory {
            inner: self.inner.clone(),
            shard,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Union of every shard's files. A name found in two shards is an error.
    pub fn list_all(&self) -> Result<Vec<String>> {
        self.inner.ensure_open()?;
        let mut owners: BTreeMap<String, &ShardId> = BTreeMap::new();

        for shard in self.inner.shards.keys() {
            let (files, _) = self.inner.snapshot(shard)?;
            for name in files.keys() {
                if let Some(other) = owners.insert(name.clone(), shard) {
                    return Err(Error::invalid_state(format!(
                        "file '{}' exists in both shard {} and shard {}",
                        name, other, shard
                    )));
                }
            }
        }

        Ok(owners.into_keys().collect())
    }

    pub fn list_by_shard(&self) -> Result<BTreeMap<ShardId, Vec<String>>> {
        self.inner.ensure_open()?;
        let mut listing = BTreeMap::new();
        for shard in self.inner.shards.keys() {
            let (files, _) = self.inner.snapshot(shard)?;
            listing.insert(shard.clone(), files.keys().cloned().collect());
        }
        Ok(listing)
    }

    pub fn obtain_lock(&self, shard: &ShardId) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.obtain_lock(shard)
    }

    pub fn release_lock(&self, shard: &ShardId) -> Result<()> {
        self.inner.release_lock(shard)
    }

    /// Shards whose lock this directory currently holds
    pub fn held_locks(&self) -> Vec<ShardId> {
        let mut held: Vec<ShardId> = self.inner.held.lock().keys().cloned().collect();
        held.sort();
        held
    }

    /// Release every held lock and drop cached metadata. Later calls fail with `InvalidState`.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let guards: Vec<LockGuard> = self.inner.held.lock().drain().map(|(_, guard)| guard).collect();
        let mut first_error = None;
        for guard in guards {
            let shard = guard.shard().clone();
            if let Err(e) = guard.release() {
                warn!("DistributedDirectory: releasing lock of shard {} failed: {}", shard, e);
                first_error.get_or_insert(e);
            }
        }
        self.inner.cache.clear();

        info!("DistributedDirectory: closed index '{}'", self.inner.index_name);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DirectoryStats {
        let mut chunk_cache = CacheStats::default();
        for state in self.inner.shards.values() {
            let stats = state.store.stats();
            chunk_cache.hit_count += stats.hit_count;
            chunk_cache.miss_count += stats.miss_count;
            chunk_cache.size += stats.size;
            chunk_cache.capacity += stats.capacity;
        }

        DirectoryStats {
            shards: self.inner.shards.len(),
            locks_held: self.inner.held.lock().len(),
            metadata_cache: self.inner.cache.stats(),
            chunk_cache,
        }
    }

    pub(crate) fn chunk_store(&self, shard: &ShardId) -> Result<Arc<ChunkStore>> {
        self.inner.ensure_open()?;
        Ok(self.inner.state(shard)?.store.clone())
    }
}

/// Names become parts of `<index>.<shard>.<kind>` collection names
fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("{} name '{}' must be non-empty and must not contain '.'", what, name),
        ));
    }
    Ok(())
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::invalid_state(format!(
                "directory of index '{}' is closed",
                self.index_name
            )));
        }
        Ok(())
    }

    fn state(&self, shard: &ShardId) -> Result<&ShardState> {
        self.shards.get(shard).ok_or_else(|| {
            Error::not_found(format!("shard {} is not part of index '{}'", shard, self.index_name))
        })
    }

    /// File records of a shard, and whether they came from the cache
    fn snapshot(&self, shard: &ShardId) -> Result<(Arc<FileMap>, bool)> {
        if let Some(files) = self.cache.get(shard) {
            return Ok((files, true));
        }
        Ok((self.load(shard)?, false))
    }

    fn load(&self, shard: &ShardId) -> Result<Arc<FileMap>> {
        let state = self.state(shard)?;
        let generation = self.cache.generation(shard);
        let files: FileMap = state
            .store
            .records()?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        let files = Arc::new(files);
        if !self.cache.fill(shard, generation, files.clone()) && self.cache.enabled() {
            debug!("DistributedDirectory: discarded stale listing of shard {}", shard);
        }
        Ok(files)
    }

    /// Record of `name`, refreshing a cached shard listing once when the name is missing
    fn lookup(&self, shard: &ShardId, name: &str) -> Result<Option<FileRecord>> {
        let (files, cached) = self.snapshot(shard)?;
        if let Some(record) = files.get(name) {
            return Ok(Some(record.clone()));
        }
        if !cached {
            return Ok(None);
        }

        self.cache.invalidate(shard);
        Ok(self.load(shard)?.get(name).cloned())
    }

    /// Authoritative record of `name`. A cached entry that disagrees with it
    /// (gone, re-created or rewritten elsewhere) drops the shard's listing.
    fn current(&self, shard: &ShardId, name: &str) -> Result<FileRecord> {
        let cached = self.cache.get(shard).map(|files| files.get(name).cloned());
        let current = self.state(shard)?.store.record(name)?;

        if let Some(cached) = cached {
            let agrees = match (&cached, &current) {
                (Some(a), Some(b)) => a.file_id == b.file_id && a.revision == b.revision,
                (None, None) => true,
                _ => false,
            };
            if !agrees {
                debug!("DistributedDirectory: cached record of {} in shard {} is stale", name, shard);
                self.cache.invalidate(shard);
            }
        }

        current.ok_or_else(|| {
            Error::not_found(format!("file '{}' not found in shard {}", name, shard))
        })
    }

    fn obtain_lock(&self, shard: &ShardId) -> Result<()> {
        let state = self.state(shard)?;
        let _acquiring = state.acquiring.lock();
        if self.held.lock().contains_key(shard) {
            return Ok(());
        }

        // Waiting happens outside the map lock so release_lock and close are not held up
        let guard = state.lock.lock(self.config.lock_timeout())?;

        let mut held = self.held.lock();
        if self.closed.load(Ordering::SeqCst) {
            drop(held);
            guard.release()?;
            return Err(Error::invalid_state(format!(
                "directory of index '{}' closed while locking shard {}",
                self.index_name, shard
            )));
        }
        held.insert(shard.clone(), guard);
        Ok(())
    }

    fn release_lock(&self, shard: &ShardId) -> Result<()> {
        self.state(shard)?;
        let guard = self.held.lock().remove(shard);
        match guard {
            Some(guard) => guard.release(),
            None => Ok(()),
        }
    }
}

/// `Directory` view of a single shard.
///
/// Cheap to clone. Closing a handle releases that shard's lock; closing the
/// owning `DistributedDirectory` closes every handle.
#[derive(Clone)]
pub struct ShardDirectory {
    inner: Arc<Inner>,
    shard: ShardId,
    closed: Arc<AtomicBool>,
}

impl ShardDirectory {
    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn is_locked(&self) -> bool {
        self.inner.held.lock().contains_key(&self.shard)
    }

    fn ensure_open(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::invalid_state(format!(
                "directory of shard {} is closed",
                self.shard
            )));
        }
        Ok(())
    }

    fn store(&self) -> Result<&Arc<ChunkStore>> {
        Ok(&self.inner.state(&self.shard)?.store)
    }

    fn invalidate(&self) {
        self.inner.cache.invalidate(&self.shard);
    }
}

impl Directory for ShardDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let (files, _) = self.inner.snapshot(&self.shard)?;
        Ok(files.keys().cloned().collect())
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.lookup(&self.shard, name)?.is_some())
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.inner.current(&self.shard, name)?.length)
    }

    fn last_modified(&self, name: &str) -> Result<DateTime<Utc>> {
        self.ensure_open()?;
        Ok(self.inner.current(&self.shard, name)?.last_modified)
    }

    fn create_output(&self, name: &str) -> Result<ChunkOutput> {
        self.ensure_open()?;
        let store = self.store()?.clone();
        let record = store.create(name)?;
        self.invalidate();

        let cache = self.inner.cache.clone();
        let shard = self.shard.clone();
        let hook: FlushHook = Arc::new(move |_: &FileRecord| cache.invalidate(&shard));

        Ok(ChunkOutput::new(
            store,
            record,
            self.inner.config.write_buffer_size(),
            self.inner.pool.clone(),
        )
        .with_flush_hook(hook))
    }

    fn open_input(&self, name: &str) -> Result<ChunkInput> {
        self.ensure_open()?;
        let store = self.store()?.clone();
        let record = match store.open(name) {
            Ok(record) => record,
            Err(e) => {
                if e.kind == ErrorKind::NotFound {
                    self.invalidate();
                }
                return Err(e);
            }
        };
        Ok(ChunkInput::new(store, record, self.inner.config.read_buffer_chunks))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.ensure_open()?;
        let result = self.store()?.rename(from, to);
        self.invalidate();
        result
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let result = self.store()?.delete(name);
        self.invalidate();
        result
    }

    fn obtain_lock(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.obtain_lock(&self.shard)
    }

    fn release_lock(&self) -> Result<()> {
        self.inner.release_lock(&self.shard)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.invalidate();
        self.inner.release_lock(&self.shard)
    }
}
