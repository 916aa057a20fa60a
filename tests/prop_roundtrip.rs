//! Property tests: whatever goes through an output comes back through an input,
//! for any chunk size, buffer size and split of the writes.

use std::io::Read;
use std::sync::Arc;
use docdir::core::config::Config;
use docdir::core::types::ShardId;
use docdir::directory::{Directory, DistributedDirectory};
use docdir::store::memory::MemoryDocumentStore;
use proptest::prelude::*;

fn open(chunk_size: usize, write_buffer_chunks: usize, read_buffer_chunks: usize) -> DistributedDirectory {
    let config = Config {
        chunk_size,
        write_buffer_chunks,
        read_buffer_chunks,
        ..Config::default()
    };
    DistributedDirectory::open(
        Arc::new(MemoryDocumentStore::new()),
        "prop",
        &[ShardId::new("s1")],
        config,
    )
    .unwrap()
}

/// Data plus the sizes of the pieces it is written in
fn arb_writes() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
    prop::collection::vec(any::<u8>(), 0..2048).prop_flat_map(|data| {
        let len = data.len();
        (Just(data), prop::collection::vec(0..=len.max(1), 0..8))
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: None,
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn written_bytes_read_back_unchanged(
        (data, cuts) in arb_writes(),
        chunk_size in 1usize..64,
        write_chunks in 1usize..4,
        read_chunks in 1usize..4,
    ) {
        let dir = open(chunk_size, write_chunks, read_chunks);
        let s1 = dir.shard("s1").unwrap();

        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
        cuts.push(0);
        cuts.push(data.len());
        cuts.sort_unstable();

        let mut out = s1.create_output("f").unwrap();
        for piece in cuts.windows(2) {
            out.write_bytes(&data[piece[0]..piece[1]]).unwrap();
        }
        prop_assert_eq!(out.file_pointer(), data.len() as u64);
        prop_assert_eq!(out.checksum(), crc32fast::hash(&data));
        out.close().unwrap();

        prop_assert_eq!(s1.file_length("f").unwrap(), data.len() as u64);

        let mut back = Vec::new();
        s1.open_input("f").unwrap().read_to_end(&mut back).unwrap();
        prop_assert_eq!(back, data);
    }

    #[test]
    fn random_access_matches_the_source(
        data in prop::collection::vec(any::<u8>(), 1..1024),
        chunk_size in 1usize..32,
        offset_seed in any::<usize>(),
        len_seed in any::<usize>(),
    ) {
        let dir = open(chunk_size, 2, 1);
        let s1 = dir.shard("s1").unwrap();
        let mut out = s1.create_output("f").unwrap();
        out.write_bytes(&data).unwrap();
        out.close().unwrap();

        let offset = offset_seed % data.len();
        let len = len_seed % (data.len() - offset + 1);

        let mut input = s1.open_input("f").unwrap();
        input.seek(offset as u64).unwrap();
        let mut buf = vec![0u8; len];
        input.read_bytes(&mut buf).unwrap();
        prop_assert_eq!(&buf[..], &data[offset..offset + len]);
        prop_assert_eq!(input.position(), (offset + len) as u64);
    }
}
