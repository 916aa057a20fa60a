use std::borrow::Cow;
use std::sync::Arc;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ChunkDoc, FileRecord, ShardId};
use crate::storage::block_cache::{BlockCache, BlockKey, CacheStats};
use crate::storage::layout::ShardLayout;
use crate::store::document::{decode, encode, get_doc, put_doc, DocumentStore, WriteOp};

/// Largest gap a write past the end may zero-fill
const MAX_ZERO_FILL: u64 = 64 * 1024 * 1024;

/// Files of one shard, stored as a FileRecord plus fixed-size chunk documents.
///
/// Write exclusivity is the caller's job (see `DistributedLock`); everything here
/// is safe to call from many threads at once.
pub struct ChunkStore {
    store: Arc<dyn DocumentStore>,
    layout: ShardLayout,
    chunk_size: u32,
    clock: Arc<dyn Clock>,
    blocks: BlockCache,
}

impl ChunkStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        layout: ShardLayout,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ChunkStore {
            store,
            layout,
            chunk_size: config.chunk_size as u32,
            clock,
            blocks: BlockCache::new(config.chunk_cache_capacity),
        }
    }

    pub fn shard(&self) -> &ShardId {
        &self.layout.shard
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current record of `name`, if any
    pub fn record(&self, name: &str) -> Result<Option<FileRecord>> {
        get_doc(self.store.as_ref(), &self.layout.files_collection, name)
    }

    /// Every record of the shard in one round trip
    pub fn records(&self) -> Result<Vec<FileRecord>> {
        self.store
            .scan(&self.layout.files_collection)?
            .into_iter()
            .map(|(_, data)| decode(&data))
            .collect()
    }

    pub fn create(&self, name: &str) -> Result<FileRecord> {
        if name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "file name must not be empty".to_string()));
        }

        let record = FileRecord::new(name, self.chunk_size, self.clock.now());
        let data = encode(&record)?;
        let created = self
            .store
            .compare_and_set(&self.layout.files_collection, name, None, Some(data.as_slice()))?;
        if !created {
            return Err(Error::already_exists(format!(
                "file '{}' already exists in shard {}",
                name, self.layout.shard
            )));
        }

        debug!("ChunkStore[{}]: created {}", self.layout.shard, name);
        Ok(record)
    }

    pub fn open(&self, name: &str) -> Result<FileRecord> {
        self.record(name)?.ok_or_else(|| {
            Error::not_found(format!("file '{}' not found in shard {}", name, self.layout.shard))
        })
    }

    /// Write `data` at `offset`, then publish the new length.
    ///
    /// Chunks go out before the record, so a record never claims chunks that are
    /// not stored yet. Writing past the end zero-fills the gap. The record is only
    /// published over the exact version `record` holds; a file renamed, deleted or
    /// replaced in the meantime fails the write instead of coming back.
    pub fn write_at(&self, record: &mut FileRecord, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() && offset <= record.length {
            return Ok(());
        }
        if offset.saturating_sub(record.length) > MAX_ZERO_FILL
            || offset.checked_add(data.len() as u64).is_none()
        {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "write at {} is too far past the end of '{}' (length {})",
                    offset, record.name, record.length
                ),
            ));
        }

        let persisted = encode(&*record)?;
        let current = self.store.get(&self.layout.files_collection, &record.name)?;
        if current.as_deref() != Some(persisted.as_slice()) {
            return Err(self.stale_record(record, current)?);
        }

        let (offset, data): (u64, Cow<[u8]>) = if offset > record.length {
            let mut padded = vec![0u8; (offset - record.length) as usize];
            padded.extend_from_slice(data);
            (record.length, Cow::Owned(padded))
        } else {
            (offset, Cow::Borrowed(data))
        };

        let chunk_size = record.chunk_size as u64;
        let end = offset + data.len() as u64;
        let first = offset / chunk_size;
        let last = (end - 1) / chunk_size;

        for index in first..=last {
            let chunk_start = index * chunk_size;
            let from = offset.max(chunk_start);
            let to = end.min(chunk_start + chunk_size);
            let within = (from - chunk_start) as usize;
            let src = &data[(from - offset) as usize..(to - offset) as usize];

            // Partial chunk over existing bytes: read-modify-write
            let whole = within == 0 && src.len() as u64 == chunk_size;
            let mut payload = if !whole && index < record.chunk_count {
                self.read_chunk(record, index)?.to_vec()
            } else {
                Vec::with_capacity(within + src.len())
            };
            if payload.len() < within + src.len() {
                payload.resize(within + src.len(), 0);
            }
            payload[within..within + src.len()].copy_from_slice(src);

            let chunk = ChunkDoc::new(record.file_id, index, payload);
            put_doc(
                self.store.as_ref(),
                &self.layout.chunks_collection,
                &self.layout.chunk_key(&record.file_id, index),
                &chunk,
            )?;
        }

        let mut updated = record.clone();
        updated.length = record.length.max(end);
        updated.chunk_count = updated.chunks_for(updated.length);
        updated.last_modified = self.clock.now();
        updated.revision += 1;
        let published = self.store.compare_and_set(
            &self.layout.files_collection,
            &updated.name,
            Some(persisted.as_slice()),
            Some(encode(&updated)?.as_slice()),
        )?;

        self.blocks.invalidate_file(&record.file_id);
        if !published {
            // Lost a race with rename/delete: drop the chunks nothing will ever claim
            let orphans: Vec<WriteOp> = (first.max(record.chunk_count)..=last)
                .map(|index| {
                    WriteOp::delete(
                        &self.layout.chunks_collection,
                        &self.layout.chunk_key(&record.file_id, index),
                    )
                })
                .collect();
            if !orphans.is_empty() {
                self.store.batch(orphans)?;
            }
            let current = self.store.get(&self.layout.files_collection, &record.name)?;
            return Err(self.stale_record(record, current)?);
        }
        *record = updated;
        Ok(())
    }

    /// Read up to `len` bytes at `offset`. Short only at end of file.
    pub fn read_at(&self, record: &FileRecord, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset > record.length {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!("read at {} past end of '{}' (length {})", offset, record.name, record.length),
            ));
        }

        let end = record.length.min(offset.saturating_add(len as u64));
        let chunk_size = record.chunk_size as u64;
        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;

        while pos < end {
            let index = pos / chunk_size;
            let chunk = self.read_chunk(record, index)?;
            let within = (pos - index * chunk_size) as usize;
            let take = (chunk.len() - within).min((end - pos) as usize);
            out.extend_from_slice(&chunk[within..within + take]);
            pos += take as u64;
        }

        Ok(out)
    }

    /// Verified payload of chunk `index`, trimmed to the bytes the record covers
    pub fn read_chunk(&self, record: &FileRecord, index: u64) -> Result<Bytes> {
        if index >= record.chunk_count {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!("chunk {} of '{}' beyond chunk count {}", index, record.name, record.chunk_count),
            ));
        }

        let key = BlockKey {
            file_id: record.file_id,
            revision: record.revision,
            index,
        };
        if let Some(block) = self.blocks.get(&key) {
            return Ok(block);
        }

        let expected = record.chunk_len(index);
        let chunk: ChunkDoc = match get_doc(
            self.store.as_ref(),
            &self.layout.chunks_collection,
            &self.layout.chunk_key(&record.file_id, index),
        )? {
            Some(chunk) => chunk,
            None => return Err(self.missing_chunk(record, index)?),
        };

        if chunk.file_id != record.file_id || chunk.index != index || !chunk.verify() {
            return Err(Error::corrupted(format!(
                "chunk {} of '{}' in shard {} failed verification",
                index, record.name, self.layout.shard
            )));
        }
        if chunk.payload.len() < expected {
            return Err(Error::corrupted(format!(
                "chunk {} of '{}' holds {} bytes, expected {}",
                index, record.name, chunk.payload.len(), expected
            )));
        }

        let mut payload = chunk.payload;
        payload.truncate(expected);
        let block = Bytes::from(payload);
        self.blocks.put(key, block.clone());
        Ok(block)
    }

    /// Why the stored record no longer matches the one a writer holds
    fn stale_record(&self, record: &FileRecord, current: Option<Vec<u8>>) -> Result<Error> {
        let current: Option<FileRecord> = current.map(|raw| decode(&raw)).transpose()?;
        Ok(match current {
            None => Error::not_found(format!(
                "file '{}' was renamed or deleted in shard {} while open for writing",
                record.name, self.layout.shard
            )),
            Some(current) if current.file_id != record.file_id => Error::invalid_state(format!(
                "file '{}' in shard {} was replaced while open for writing",
                record.name, self.layout.shard
            )),
            Some(current) => Error::invalid_state(format!(
                "file '{}' in shard {} is at revision {}, writer holds revision {}",
                record.name, self.layout.shard, current.revision, record.revision
            )),
        })
    }

    /// A chunk vanished: either the file was deleted under the reader or the store lost data
    fn missing_chunk(&self, record: &FileRecord, index: u64) -> Result<Error> {
        match self.record(&record.name)? {
            Some(current) if current.file_id == record.file_id => Ok(Error::corrupted(format!(
                "chunk {} of '{}' in shard {} is missing",
                index, record.name, self.layout.shard
            ))),
            _ => Ok(Error::not_found(format!(
                "file '{}' was removed from shard {} while being read",
                record.name, self.layout.shard
            ))),
        }
    }

    /// Point `to` at the content of `from` and drop `from`, in one atomic batch.
    /// Any file previously named `to` is deleted afterwards.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let record = self.open(from)?;
        if from == to {
            return Ok(());
        }
        if to.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "file name must not be empty".to_string()));
        }

        let replaced = self.record(to)?;

        let mut renamed = record.clone();
        renamed.name = to.to_string();
        self.store.batch(vec![
            WriteOp::put(&self.layout.files_collection, to, encode(&renamed)?),
            WriteOp::delete(&self.layout.files_collection, from),
        ])?;
        debug!("ChunkStore[{}]: renamed {} -> {}", self.layout.shard, from, to);

        if let Some(old) = replaced {
            if old.file_id != record.file_id {
                self.delete_chunks(&old)?;
            }
        }
        Ok(())
    }

    /// Remove a file and its chunks. Absent files are not an error.
    pub fn delete(&self, name: &str) -> Result<()> {
        let record = match self.record(name)? {
            Some(record) => record,
            None => return Ok(()),
        };

        // The name disappears first, then the content
        self.store.delete(&self.layout.files_collection, name)?;
        self.delete_chunks(&record)?;
        debug!("ChunkStore[{}]: deleted {} ({} chunks)", self.layout.shard, name, record.chunk_count);
        Ok(())
    }

    fn delete_chunks(&self, record: &FileRecord) -> Result<()> {
        self.blocks.invalidate_file(&record.file_id);
        if record.chunk_count == 0 {
            return Ok(());
        }
        let ops = (0..record.chunk_count)
            .map(|index| {
                WriteOp::delete(
                    &self.layout.chunks_collection,
                    &self.layout.chunk_key(&record.file_id, index),
                )
            })
            .collect();
        self.store.batch(ops)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.store.keys(&self.layout.files_collection)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.record(name)?.is_some())
    }

    pub fn file_length(&self, name: &str) -> Result<u64> {
        Ok(self.open(name)?.length)
    }

    pub fn last_modified(&self, name: &str) -> Result<DateTime<Utc>> {
        Ok(self.open(name)?.last_modified)
    }

    pub fn stats(&self) -> CacheStats {
        self.blocks.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::store::memory::MemoryDocumentStore;

    fn store_with_chunk_size(chunk_size: usize) -> (Arc<MemoryDocumentStore>, ChunkStore) {
        let docs = Arc::new(MemoryDocumentStore::new());
        let config = Config { chunk_size, ..Config::default() };
        let store = ChunkStore::new(
            docs.clone(),
            ShardLayout::new("test", ShardId::new("s1")),
            &config,
            Arc::new(SystemClock),
        );
        (docs, store)
    }

    #[test]
    fn five_bytes_with_chunk_size_two_make_three_chunks() {
        let (docs, store) = store_with_chunk_size(2);
        let mut record = store.create("segment.bin").unwrap();
        store.write_at(&mut record, 0, b"ABCDE").unwrap();

        assert_eq!(record.chunk_count, 3);
        assert_eq!(docs.collection_len("test.s1.chunks"), 3);
        assert_eq!(store.read_chunk(&record, 0).unwrap().as_ref(), b"AB");
        assert_eq!(store.read_chunk(&record, 1).unwrap().as_ref(), b"CD");
        assert_eq!(store.read_chunk(&record, 2).unwrap().as_ref(), b"E");
        assert_eq!(store.read_at(&record, 1, 3).unwrap(), b"BCD");
    }

    #[test]
    fn partial_overwrite_keeps_surrounding_bytes() {
        let (_, store) = store_with_chunk_size(4);
        let mut record = store.create("f").unwrap();
        store.write_at(&mut record, 0, b"0123456789").unwrap();
        store.write_at(&mut record, 3, b"xyz").unwrap();

        assert_eq!(record.length, 10);
        assert_eq!(store.read_at(&record, 0, 10).unwrap(), b"012xyz6789");
    }

    #[test]
    fn writing_past_end_zero_fills_the_gap() {
        let (_, store) = store_with_chunk_size(3);
        let mut record = store.create("f").unwrap();
        store.write_at(&mut record, 0, b"ab").unwrap();
        store.write_at(&mut record, 5, b"z").unwrap();

        assert_eq!(record.length, 6);
        assert_eq!(store.read_at(&record, 0, 6).unwrap(), b"ab\0\0\0z");
    }

    #[test]
    fn read_past_end_is_out_of_range_and_read_at_end_is_empty() {
        let (_, store) = store_with_chunk_size(4);
        let mut record = store.create("f").unwrap();
        store.write_at(&mut record, 0, b"abc").unwrap();

        assert_eq!(store.read_at(&record, 3, 10).unwrap(), b"");
        assert_eq!(store.read_at(&record, 1, 10).unwrap(), b"bc");
        let err = store.read_at(&record, 4, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn create_twice_is_already_exists() {
        let (_, store) = store_with_chunk_size(4);
        store.create("f").unwrap();
        assert_eq!(store.create("f").unwrap_err().kind, ErrorKind::AlreadyExists);
    }

    #[test]
    fn rename_over_existing_file_drops_its_chunks() {
        let (docs, store) = store_with_chunk_size(2);
        let mut a = store.create("a").unwrap();
        store.write_at(&mut a, 0, b"aaaa").unwrap();
        let mut b = store.create("b").unwrap();
        store.write_at(&mut b, 0, b"bbbbbb").unwrap();

        store.rename("a", "b").unwrap();

        assert_eq!(store.list().unwrap(), vec!["b".to_string()]);
        let b = store.open("b").unwrap();
        assert_eq!(store.read_at(&b, 0, 10).unwrap(), b"aaaa");
        assert_eq!(docs.collection_len("test.s1.chunks"), 2);
    }

    #[test]
    fn corrupt_chunk_is_detected() {
        let (docs, store) = store_with_chunk_size(2);
        let mut record = store.create("f").unwrap();
        store.write_at(&mut record, 0, b"abcd").unwrap();

        let key = store.layout().chunk_key(&record.file_id, 1);
        let mut chunk: ChunkDoc = get_doc(docs.as_ref(), "test.s1.chunks", &key).unwrap().unwrap();
        chunk.payload[0] ^= 0xff;
        put_doc(docs.as_ref(), "test.s1.chunks", &key, &chunk).unwrap();

        assert_eq!(store.read_at(&record, 0, 2).unwrap(), b"ab");
        assert_eq!(store.read_at(&record, 0, 4).unwrap_err().kind, ErrorKind::Corrupted);
    }

    #[test]
    fn reading_a_deleted_file_is_not_found() {
        let (_, store) = store_with_chunk_size(2);
        let mut record = store.create("f").unwrap();
        store.write_at(&mut record, 0, b"abcd").unwrap();
        store.delete("f").unwrap();

        assert_eq!(store.read_at(&record, 0, 4).unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn write_after_delete_does_not_bring_the_name_back() {
        let (docs, store) = store_with_chunk_size(4);
        let mut record = store.create("tmp").unwrap();
        store.write_at(&mut record, 0, b"0123456789").unwrap();
        store.delete("tmp").unwrap();

        let err = store.write_at(&mut record, 10, b"ab").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(store.list().unwrap().is_empty());
        assert_eq!(docs.collection_len("test.s1.chunks"), 0);
    }

    #[test]
    fn write_after_rename_leaves_only_the_new_name() {
        let (_, store) = store_with_chunk_size(4);
        let mut record = store.create("pending").unwrap();
        store.write_at(&mut record, 0, b"abc").unwrap();
        store.rename("pending", "segments_1").unwrap();

        assert_eq!(store.write_at(&mut record, 3, b"def").unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(store.list().unwrap(), vec!["segments_1".to_string()]);
        let renamed = store.open("segments_1").unwrap();
        assert_eq!(store.read_at(&renamed, 0, 10).unwrap(), b"abc");
    }

    #[test]
    fn write_to_a_replaced_file_is_invalid_state() {
        let (_, store) = store_with_chunk_size(4);
        let mut stale = store.create("segments.gen").unwrap();
        store.delete("segments.gen").unwrap();
        let mut fresh = store.create("segments.gen").unwrap();
        store.write_at(&mut fresh, 0, b"new").unwrap();

        assert_eq!(store.write_at(&mut stale, 0, b"old").unwrap_err().kind, ErrorKind::InvalidState);
        assert_eq!(store.read_at(&fresh, 0, 10).unwrap(), b"new");
    }

    #[test]
    fn read_to_end_with_huge_len_does_not_overflow() {
        let (_, store) = store_with_chunk_size(2);
        let mut record = store.create("f").unwrap();
        store.write_at(&mut record, 0, b"abcd").unwrap();

        assert_eq!(store.read_at(&record, 1, usize::MAX).unwrap(), b"bcd");
        assert_eq!(store.read_at(&record, 4, usize::MAX).unwrap(), b"");
    }

    #[test]
    fn absurd_gaps_are_rejected() {
        let (_, store) = store_with_chunk_size(2);
        let mut record = store.create("f").unwrap();

        let err = store.write_at(&mut record, u64::MAX - 1, b"ab").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        let err = store.write_at(&mut record, MAX_ZERO_FILL + 1, b"x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(store.file_length("f").unwrap(), 0);
    }
}
