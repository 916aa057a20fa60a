use std::io::{Read, Write};
use std::sync::Arc;
use docdir::core::config::Config;
use docdir::core::error::ErrorKind;
use docdir::core::types::ShardId;
use docdir::directory::{Directory, DistributedDirectory};
use docdir::store::document::DocumentStore;
use docdir::store::sqlite::SqliteDocumentStore;

fn open_dir(path: &std::path::Path, owner: &str) -> DistributedDirectory {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::open(path).unwrap());
    let config = Config {
        chunk_size: 8,
        cache_ttl_ms: 0,
        owner: Some(owner.to_string()),
        ..Config::default()
    };
    DistributedDirectory::open(store, "books", &[ShardId::new("s1")], config).unwrap()
}

#[test]
fn files_survive_reopening_the_database() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("index.db");

    {
        let dir = open_dir(&path, "writer");
        let s1 = dir.shard("s1").unwrap();
        let mut out = s1.create_output("_0.cfs").unwrap();
        out.write_all(b"persisted across connections").unwrap();
        out.close().unwrap();
        dir.close().unwrap();
    }

    let dir = open_dir(&path, "reader");
    let s1 = dir.shard("s1").unwrap();
    assert_eq!(s1.list_all().unwrap(), vec!["_0.cfs".to_string()]);

    let mut data = String::new();
    s1.open_input("_0.cfs").unwrap().read_to_string(&mut data).unwrap();
    assert_eq!(data, "persisted across connections");
}

#[test]
fn two_connections_contend_for_one_lock() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("index.db");
    let a = open_dir(&path, "node-a");
    let b = open_dir(&path, "node-b");

    a.shard("s1").unwrap().obtain_lock().unwrap();
    assert_eq!(b.shard("s1").unwrap().obtain_lock().unwrap_err().kind, ErrorKind::LockBusy);

    a.release_lock(&ShardId::new("s1")).unwrap();
    b.shard("s1").unwrap().obtain_lock().unwrap();
}

#[test]
fn rename_is_visible_to_the_other_connection() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("index.db");
    let a = open_dir(&path, "node-a");
    let b = open_dir(&path, "node-b");

    let a1 = a.shard("s1").unwrap();
    let mut out = a1.create_output("pending_segments_2").unwrap();
    out.write_all(&[7u8; 20]).unwrap();
    out.close().unwrap();
    a1.rename("pending_segments_2", "segments_2").unwrap();

    let b1 = b.shard("s1").unwrap();
    assert!(!b1.file_exists("pending_segments_2").unwrap());
    assert_eq!(b1.file_length("segments_2").unwrap(), 20);
}

#[test]
fn compare_and_set_on_disk() {
    let store = SqliteDocumentStore::open_in_memory().unwrap();
    assert!(store.compare_and_set("c", "k", None, Some(&b"v1"[..])).unwrap());
    assert!(!store.compare_and_set("c", "k", None, Some(&b"v2"[..])).unwrap());
    assert!(store.compare_and_set("c", "k", Some(&b"v1"[..]), None).unwrap());
    assert_eq!(store.get("c", "k").unwrap(), None);
}
