use std::io::Write;
use std::sync::Arc;
use crc32fast::Hasher;
use log::warn;
use crate::core::error::{Error, Result};
use crate::core::types::FileRecord;
use crate::memory::buffer_pool::BufferPool;
use crate::storage::chunk_store::ChunkStore;

/// Called after every batch of bytes reaches the store
pub type FlushHook = Arc<dyn Fn(&FileRecord) + Send + Sync>;

/// Buffered sequential writer for one file of a chunk store.
///
/// Bytes are pushed out in whole chunks once the buffer reaches its threshold, so the
/// common write-once path never has to read a chunk back.
pub struct ChunkOutput {
    store: Arc<ChunkStore>,
    record: FileRecord,
    buffer: Vec<u8>,
    buffer_start: u64,  // File offset of buffer[0]
    threshold: usize,
    hasher: Hasher,
    pool: Arc<BufferPool>,
    on_flush: Option<FlushHook>,
    closed: bool,
}

impl ChunkOutput {
    pub fn new(
        store: Arc<ChunkStore>,
        record: FileRecord,
        threshold: usize,
        pool: Arc<BufferPool>,
    ) -> Self {
        let buffer = pool.get(threshold);
        let buffer_start = record.length;
        ChunkOutput {
            store,
            record,
            buffer,
            buffer_start,
            threshold: threshold.max(1),
            hasher: Hasher::new(),
            pool,
            on_flush: None,
            closed: false,
        }
    }

    pub fn with_flush_hook(mut self, hook: FlushHook) -> Self {
        self.on_flush = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Offset the next byte will be written at
    pub fn file_pointer(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    /// Record as last persisted; buffered bytes are not counted yet
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// CRC32 of every byte written through this output
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte])
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.hasher.update(data);
        self.buffer.extend_from_slice(data);

        if self.buffer.len() >= self.threshold {
            self.flush_whole_chunks()?;
        }
        Ok(())
    }

    /// Push every buffered byte to the store
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_prefix(self.buffer.len())
    }

    /// Flush remaining bytes and refuse further writes
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush_prefix(self.buffer.len());
        self.closed = true;
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.return_buffer(buffer);
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state(format!(
                "output '{}' is already closed",
                self.record.name
            )));
        }
        Ok(())
    }

    fn flush_whole_chunks(&mut self) -> Result<()> {
        let chunk_size = self.record.chunk_size as u64;
        let aligned_end = (self.file_pointer() / chunk_size) * chunk_size;
        if aligned_end <= self.buffer_start {
            return Ok(());
        }
        self.flush_prefix((aligned_end - self.buffer_start) as usize)
    }

    fn flush_prefix(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.store
            .write_at(&mut self.record, self.buffer_start, &self.buffer[..len])?;
        self.buffer.drain(..len);
        self.buffer_start += len as u64;

        if let Some(hook) = &self.on_flush {
            (hook.as_ref())(&self.record);
        }
        Ok(())
    }
}

impl Write for ChunkOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        ChunkOutput::flush(self)?;
        Ok(())
    }
}

impl Drop for ChunkOutput {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("ChunkOutput: flush of '{}' on drop failed: {}", self.record.name, e);
            }
        }
    }
}
