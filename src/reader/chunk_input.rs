use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use bytes::Bytes;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::FileRecord;
use crate::storage::chunk_store::ChunkStore;

/// Buffered random-access reader over one file of a chunk store.
///
/// Clones share the file view and the current buffer but move independently,
/// so many readers can walk the same segment file at once.
#[derive(Clone)]
pub struct ChunkInput {
    store: Arc<ChunkStore>,
    record: Arc<FileRecord>,
    base: u64,          // Absolute offset of this view (non-zero for slices)
    length: u64,        // Bytes visible through this view
    position: u64,      // Relative to base
    buffer: Bytes,
    buffer_start: u64,  // Absolute offset of buffer[0]
    buffer_chunks: usize,
}

impl ChunkInput {
    pub fn new(store: Arc<ChunkStore>, record: FileRecord, buffer_chunks: usize) -> Self {
        let length = record.length;
        ChunkInput {
            store,
            record: Arc::new(record),
            base: 0,
            length,
            position: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
            buffer_chunks: buffer_chunks.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.length - self.position
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.length {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!("seek to {} past end of '{}' (length {})", position, self.record.name, self.length),
            ));
        }
        self.position = position;
        Ok(())
    }

    /// A view of `[offset, offset + length)` of this input, starting at position 0
    pub fn slice(&self, offset: u64, length: u64) -> Result<ChunkInput> {
        if offset.checked_add(length).map_or(true, |end| end > self.length) {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!(
                    "slice [{}, +{}) exceeds '{}' (length {})",
                    offset, length, self.record.name, self.length
                ),
            ));
        }

        let mut slice = self.clone();
        slice.base = self.base + offset;
        slice.length = length;
        slice.position = 0;
        Ok(slice)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    /// Fill `dst` completely or fail with `OutOfRange`
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        if dst.len() as u64 > self.remaining() {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!(
                    "read of {} bytes at {} past end of '{}' (length {})",
                    dst.len(), self.position, self.record.name, self.length
                ),
            ));
        }

        let mut filled = 0;
        while filled < dst.len() {
            let absolute = self.base + self.position;
            if !self.buffered(absolute) {
                self.refill(absolute)?;
            }
            let within = (absolute - self.buffer_start) as usize;
            let take = (self.buffer.len() - within).min(dst.len() - filled);
            dst[filled..filled + take].copy_from_slice(&self.buffer[within..within + take]);
            filled += take;
            self.position += take as u64;
        }
        Ok(())
    }

    fn buffered(&self, absolute: u64) -> bool {
        absolute >= self.buffer_start && absolute < self.buffer_start + self.buffer.len() as u64
    }

    /// Load the chunk-aligned window containing `absolute`
    fn refill(&mut self, absolute: u64) -> Result<()> {
        let chunk_size = self.record.chunk_size as u64;
        let index = absolute / chunk_size;

        self.buffer = if self.buffer_chunks == 1 {
            self.store.read_chunk(&self.record, index)?
        } else {
            let window = chunk_size as usize * self.buffer_chunks;
            Bytes::from(self.store.read_at(&self.record, index * chunk_size, window)?)
        };
        self.buffer_start = index * chunk_size;

        if !self.buffered(absolute) {
            return Err(Error::corrupted(format!(
                "chunk {} of '{}' is shorter than the file length implies",
                index, self.record.name
            )));
        }
        Ok(())
    }
}

impl Read for ChunkInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.read_bytes(&mut buf[..n])?;
        Ok(n)
    }
}

impl Seek for ChunkInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        ChunkInput::seek(self, target)?;
        Ok(target)
    }
}
