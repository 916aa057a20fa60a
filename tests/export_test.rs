use std::fs;
use std::io::Write;
use std::sync::Arc;
use docdir::core::clock::SystemClock;
use docdir::core::config::Config;
use docdir::core::error::ErrorKind;
use docdir::core::types::ShardId;
use docdir::directory::{Directory, DistributedDirectory};
use docdir::storage::chunk_store::ChunkStore;
use docdir::storage::layout::ShardLayout;
use docdir::store::document::DocumentStore;
use docdir::store::memory::MemoryDocumentStore;

fn config() -> Config {
    Config {
        chunk_size: 16,
        export_threads: 4,
        ..Config::default()
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn populated(store: &Arc<MemoryDocumentStore>) -> DistributedDirectory {
    let dir = DistributedDirectory::open(
        store.clone(),
        "books",
        &[ShardId::new("s1"), ShardId::new("s2")],
        config(),
    )
    .unwrap();

    let s1 = dir.shard("s1").unwrap();
    let mut out = s1.create_output("a").unwrap();
    out.write_all(&payload(100)).unwrap();
    out.close().unwrap();
    s1.create_output("b").unwrap().close().unwrap();

    let s2 = dir.shard("s2").unwrap();
    let mut out = s2.create_output("segments_1").unwrap();
    out.write_all(b"commit").unwrap();
    out.close().unwrap();
    dir
}

/// Flip the last payload byte of one stored chunk so its CRC no longer matches
fn corrupt_chunk(store: &Arc<MemoryDocumentStore>, shard: &str, name: &str, index: u64) {
    let layout = ShardLayout::new("books", ShardId::new(shard));
    let chunks = ChunkStore::new(store.clone(), layout.clone(), &config(), Arc::new(SystemClock));
    let record = chunks.open(name).unwrap();
    let key = layout.chunk_key(&record.file_id, index);

    let mut raw = store.get(&layout.chunks_collection, &key).unwrap().unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0xff;
    store.put(&layout.chunks_collection, &key, &raw).unwrap();
}

fn local_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn every_shard_lands_in_its_own_folder() {
    let store = Arc::new(MemoryDocumentStore::new());
    let dir = populated(&store);
    let target = tempfile::tempdir().unwrap();

    let report = dir.copy_to_local(target.path()).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.copied.len(), 3);
    assert_eq!(report.total_bytes(), 106);
    assert_eq!(fs::read(target.path().join("s1").join("a")).unwrap(), payload(100));
    assert_eq!(fs::read(target.path().join("s1").join("b")).unwrap().len(), 0);
    assert_eq!(fs::read(target.path().join("s2").join("segments_1")).unwrap(), b"commit".to_vec());

    let files = report.into_result().unwrap();
    assert_eq!(files[0].name, "a");
    assert_eq!(files[0].length, 100);
}

#[test]
fn corrupt_chunk_fails_only_that_file() {
    let store = Arc::new(MemoryDocumentStore::new());
    let dir = populated(&store);
    corrupt_chunk(&store, "s1", "a", 2);
    let target = tempfile::tempdir().unwrap();

    let report = dir.copy_shard_to_local(&ShardId::new("s1"), target.path()).unwrap();

    assert_eq!(report.copied.len(), 1);
    assert_eq!(report.copied[0].name, "b");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "a");
    assert_eq!(report.failed[0].error.kind, ErrorKind::CopyIncomplete);

    // No truncated copy and no leftover temp file
    assert_eq!(local_names(&target.path().join("s1")), vec!["b".to_string()]);
    assert_eq!(report.into_result().unwrap_err().kind, ErrorKind::CopyIncomplete);
}

#[test]
fn missing_chunk_is_copy_incomplete() {
    let store = Arc::new(MemoryDocumentStore::new());
    let dir = populated(&store);

    let layout = ShardLayout::new("books", ShardId::new("s2"));
    let chunks = ChunkStore::new(store.clone(), layout.clone(), &config(), Arc::new(SystemClock));
    let record = chunks.open("segments_1").unwrap();
    store.delete(&layout.chunks_collection, &layout.chunk_key(&record.file_id, 0)).unwrap();

    let target = tempfile::tempdir().unwrap();
    let report = dir.copy_to_local(target.path()).unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].shard, ShardId::new("s2"));
    assert_eq!(report.failed[0].error.kind, ErrorKind::CopyIncomplete);
    assert!(!target.path().join("s2").join("segments_1").exists());
}

#[test]
fn unreachable_store_fails_the_whole_export() {
    let store = Arc::new(MemoryDocumentStore::new());
    let dir = populated(&store);
    let target = tempfile::tempdir().unwrap();

    store.set_available(false);
    let err = dir.copy_to_local(target.path()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::StoreUnavailable);
}

#[test]
fn single_threaded_export_matches() {
    let store = Arc::new(MemoryDocumentStore::new());
    let dir = DistributedDirectory::open(
        store.clone(),
        "books",
        &[ShardId::new("s1")],
        Config { export_threads: 1, ..config() },
    )
    .unwrap();
    let s1 = dir.shard("s1").unwrap();
    for i in 0..5 {
        let mut out = s1.create_output(&format!("_{}.cfs", i)).unwrap();
        out.write_all(&payload(i * 7)).unwrap();
        out.close().unwrap();
    }

    let target = tempfile::tempdir().unwrap();
    let files = dir.copy_to_local(target.path()).unwrap().into_result().unwrap();

    assert_eq!(files.len(), 5);
    for file in files {
        assert_eq!(fs::metadata(&file.path).unwrap().len(), file.length);
    }
}
