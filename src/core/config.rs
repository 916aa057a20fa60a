use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Chunk store
    pub chunk_size: usize,                // Bytes per chunk document
    pub chunk_cache_capacity: usize,      // Chunks kept in the LRU block cache (0 = off)

    // File handles
    pub read_buffer_chunks: usize,        // Chunks fetched per read-buffer refill
    pub write_buffer_chunks: usize,       // Chunks buffered before an output flushes

    // Distributed lock
    pub owner: Option<String>,            // Lock owner identity, random when unset
    pub lease_duration_ms: u64,
    pub heartbeat_interval_ms: u64,       // Must be < lease_duration_ms
    pub lock_timeout_ms: u64,             // 0 = fail immediately with LockBusy
    pub lock_retry_backoff_ms: u64,       // First backoff step, doubled per attempt

    // Directory cache
    pub cache_ttl_ms: u64,                // 0 = no metadata caching

    // Export
    pub export_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: 32 * 1024,           // 32KB per chunk document
            chunk_cache_capacity: 1024,      // ~32MB of cached chunks

            read_buffer_chunks: 1,
            write_buffer_chunks: 4,

            owner: None,
            lease_duration_ms: 30_000,       // 30s lease
            heartbeat_interval_ms: 10_000,   // Renew three times per lease
            lock_timeout_ms: 0,
            lock_retry_backoff_ms: 50,

            cache_ttl_ms: 5_000,

            export_threads: num_cpus::get(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > u32::MAX as usize {
            return Err(invalid(format!("chunk_size must be in 1..=u32::MAX, got {}", self.chunk_size)));
        }
        if self.read_buffer_chunks == 0 || self.write_buffer_chunks == 0 {
            return Err(invalid("buffer sizes must be at least one chunk".to_string()));
        }
        if self.lease_duration_ms == 0 {
            return Err(invalid("lease_duration_ms must be positive".to_string()));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_interval_ms >= self.lease_duration_ms {
            return Err(invalid(format!(
                "heartbeat_interval_ms ({}) must be positive and shorter than lease_duration_ms ({})",
                self.heartbeat_interval_ms, self.lease_duration_ms
            )));
        }
        if self.export_threads == 0 {
            return Err(invalid("export_threads must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_retry_backoff_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn write_buffer_size(&self) -> usize {
        self.chunk_size * self.write_buffer_chunks
    }
}

fn invalid(context: String) -> Error {
    Error::new(ErrorKind::InvalidArgument, context)
}
