use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{LockRecord, OwnerId, ShardId};
use crate::storage::layout::ShardLayout;
use crate::store::document::{decode, encode, DocumentStore};

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Single writer per shard, backed by a lease document updated with compare-and-set.
///
/// A holder that stops heartbeating loses the shard once the lease runs out. This
/// favours liveness: a stalled (not dead) holder may briefly overlap with the next one.
pub struct DistributedLock {
    store: Arc<dyn DocumentStore>,
    collection: String,
    key: String,
    shard: ShardId,
    owner: OwnerId,
    lease: chrono::Duration,
    heartbeat_interval: Duration,
    retry_backoff: Duration,
    clock: Arc<dyn Clock>,
}

impl DistributedLock {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        layout: &ShardLayout,
        owner: OwnerId,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        DistributedLock {
            store,
            collection: layout.locks_collection.clone(),
            key: layout.lock_key().to_string(),
            shard: layout.shard.clone(),
            owner,
            lease: chrono::Duration::milliseconds(config.lease_duration_ms as i64),
            heartbeat_interval: config.heartbeat_interval(),
            retry_backoff: config.lock_retry_backoff(),
            clock,
        }
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn read(&self) -> Result<Option<(Vec<u8>, LockRecord)>> {
        match self.store.get(&self.collection, &self.key)? {
            Some(raw) => {
                let record = decode(&raw)?;
                Ok(Some((raw, record)))
            }
            None => Ok(None),
        }
    }

    /// The unexpired lease on this shard, whoever holds it
    pub fn current(&self) -> Result<Option<LockRecord>> {
        let now = self.clock.now();
        Ok(self
            .read()?
            .map(|(_, record)| record)
            .filter(|record| !record.is_expired(now)))
    }

    pub fn is_held(&self) -> Result<bool> {
        Ok(self
            .current()?
            .map(|record| record.owner == self.owner)
            .unwrap_or(false))
    }

    /// One acquisition attempt. Fails with `LockBusy` while another owner's lease is live.
    pub fn try_acquire(&self) -> Result<LockRecord> {
        let now = self.clock.now();
        let current = self.read()?;

        let mut acquired_at = now;
        if let Some((_, held)) = &current {
            if held.owner != self.owner {
                if !held.is_expired(now) {
                    return Err(Error::lock_busy(format!(
                        "shard {} is held by {} until {}",
                        self.shard, held.owner, held.expiry
                    )));
                }
                info!(
                    "DistributedLock[{}]: reclaiming lease of {} that expired at {}",
                    self.shard, held.owner, held.expiry
                );
            } else if !held.is_expired(now) {
                acquired_at = held.acquired_at;
            }
        }

        let record = LockRecord {
            shard: self.shard.clone(),
            owner: self.owner.clone(),
            acquired_at,
            expiry: now + self.lease,
        };
        let data = encode(&record)?;
        let expected = current.as_ref().map(|(raw, _)| raw.as_slice());
        if !self
            .store
            .compare_and_set(&self.collection, &self.key, expected, Some(data.as_slice()))?
        {
            return Err(Error::lock_busy(format!(
                "shard {} was taken concurrently",
                self.shard
            )));
        }

        debug!("DistributedLock[{}]: held by {} until {}", self.shard, self.owner, record.expiry);
        Ok(record)
    }

    /// Retry `try_acquire` with exponential backoff until `timeout` passes.
    /// A zero timeout makes exactly one attempt.
    pub fn acquire(&self, timeout: Duration) -> Result<LockRecord> {
        let deadline = Instant::now() + timeout;
        let mut backoff = self.retry_backoff.max(Duration::from_millis(1));

        loop {
            match self.try_acquire() {
                Err(e) if e.kind == ErrorKind::LockBusy => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(e);
                    }
                    thread::sleep(backoff.min(deadline - now));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                other => return other,
            }
        }
    }

    /// Acquire and keep the lease alive on a heartbeat thread until the guard goes away
    pub fn lock(self: &Arc<Self>, timeout: Duration) -> Result<LockGuard> {
        let record = self.acquire(timeout)?;
        let heartbeat = Heartbeat::start(self.clone(), self.heartbeat_interval)?;
        Ok(LockGuard {
            lock: self.clone(),
            record,
            heartbeat: Some(heartbeat),
            released: false,
        })
    }

    /// Extend the caller's lease. `LockBusy` if the lease now belongs to someone else.
    pub fn renew(&self) -> Result<LockRecord> {
        let now = self.clock.now();
        let (raw, held) = match self.read()? {
            Some((raw, held)) if held.owner == self.owner => (raw, held),
            Some((_, held)) => {
                return Err(Error::lock_busy(format!(
                    "lease on shard {} was lost to {}",
                    self.shard, held.owner
                )));
            }
            None => {
                return Err(Error::lock_busy(format!(
                    "lease on shard {} is no longer recorded",
                    self.shard
                )));
            }
        };

        let record = LockRecord {
            expiry: now + self.lease,
            ..held
        };
        let data = encode(&record)?;
        if !self
            .store
            .compare_and_set(&self.collection, &self.key, Some(raw.as_slice()), Some(data.as_slice()))?
        {
            return Err(Error::lock_busy(format!(
                "lease on shard {} changed during renewal",
                self.shard
            )));
        }
        Ok(record)
    }

    /// Drop the lease if the caller holds it; otherwise nothing happens
    pub fn release(&self) -> Result<()> {
        if let Some((raw, held)) = self.read()? {
            if held.owner == self.owner {
                let removed = self
                    .store
                    .compare_and_set(&self.collection, &self.key, Some(raw.as_slice()), None)?;
                if removed {
                    debug!("DistributedLock[{}]: released by {}", self.shard, self.owner);
                }
            }
        }
        Ok(())
    }
}

struct Heartbeat {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn start(lock: Arc<DistributedLock>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let name = format!("lease-heartbeat-{}", lock.shard);

        let handle = thread::Builder::new().name(name).spawn(move || {
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        // A failed renewal is not fatal; the lease may still be valid
                        if let Err(e) = lock.renew() {
                            warn!("DistributedLock[{}]: heartbeat failed: {}", lock.shard, e);
                        }
                    }
                    _ => break,
                }
            }
        })?;

        Ok(Heartbeat { stop, handle })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("DistributedLock: heartbeat thread panicked");
        }
    }
}

/// A held shard lease with a running heartbeat. Released on `release()` or drop.
pub struct LockGuard {
    lock: Arc<DistributedLock>,
    record: LockRecord,
    heartbeat: Option<Heartbeat>,
    released: bool,
}

impl LockGuard {
    pub fn shard(&self) -> &ShardId {
        self.lock.shard()
    }

    /// Lease as of acquisition; heartbeats extend it in the store
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Whether the store still shows this owner holding a live lease
    pub fn is_valid(&self) -> Result<bool> {
        self.lock.is_held()
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        self.lock.release()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        if !self.released {
            if let Err(e) = self.lock.release() {
                warn!("DistributedLock[{}]: release on drop failed: {}", self.lock.shard, e);
            }
        }
    }
}
