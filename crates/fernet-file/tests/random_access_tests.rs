//! Randomized consistency tests: an encrypted stream driven alongside a
//! plain reference buffer must never disagree with it.

use std::io::SeekFrom;

use fernet_file::{FernetFile, FernetKey, MemoryStore};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn memory_stream(chunk_size: usize) -> FernetFile<MemoryStore> {
    FernetFile::new(FernetKey::generate(), MemoryStore::new(), chunk_size).unwrap()
}

fn read_all(stream: &mut FernetFile<MemoryStore>) -> Vec<u8> {
    stream.seek(SeekFrom::Start(0)).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

/// Drive random overwrites and reads against both the stream and a
/// reference buffer, then compare the final contents.
fn random_ops_match_reference(chunk_size: usize, data_len: usize, seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut reference = vec![0u8; data_len];
    rng.fill(&mut reference[..]);

    let mut stream = memory_stream(chunk_size);
    stream.write(&reference).unwrap();

    for _ in 0..100 {
        let start = rng.random_range(0..data_len);
        let len = rng.random_range(0..=(3 * chunk_size).min(data_len - start));

        if rng.random_bool(0.5) {
            let mut patch = vec![0u8; len];
            rng.fill(&mut patch[..]);
            reference[start..start + len].copy_from_slice(&patch);

            stream.seek(SeekFrom::Start(start as u64)).unwrap();
            assert_eq!(stream.write(&patch).unwrap(), len);
        } else {
            let mut buf = vec![0u8; len];
            stream.seek(SeekFrom::Start(start as u64)).unwrap();
            let n = stream.read(&mut buf).unwrap();
            assert_eq!(n, len, "short read at {start}+{len}");
            assert_eq!(buf, &reference[start..start + len]);
        }
    }

    assert_eq!(read_all(&mut stream), reference);
}

#[test]
fn test_random_ops_small_chunks() {
    random_ops_match_reference(16, 1000, 0xfeed);
}

#[test]
fn test_random_ops_medium_chunks() {
    random_ops_match_reference(256, 10_000, 0xbeef);
}

#[test]
fn test_random_ops_chunk_larger_than_payload() {
    random_ops_match_reference(4096, 700, 0xcafe);
}

#[test]
fn test_interleaved_sessions_persist() {
    // Overwrites through a fresh stream over the previous image must
    // behave exactly like overwrites within one session.
    let mut rng = ChaCha8Rng::seed_from_u64(0xd00d);
    let mut reference = vec![0u8; 3000];
    rng.fill(&mut reference[..]);

    let key = FernetKey::generate();
    let encoded = key.to_base64();

    let mut stream = FernetFile::new(key, MemoryStore::new(), 128).unwrap();
    stream.write(&reference).unwrap();
    let mut image = stream.into_backing().unwrap().into_inner();

    for round in 0..10 {
        let key = FernetKey::from_base64(&encoded).unwrap();
        let mut stream = FernetFile::new(key, MemoryStore::from_vec(image), 128).unwrap();

        let start = rng.random_range(0..reference.len() - 300);
        let mut patch = vec![0u8; 300];
        rng.fill(&mut patch[..]);
        reference[start..start + 300].copy_from_slice(&patch);

        stream.seek(SeekFrom::Start(start as u64)).unwrap();
        stream.write(&patch).unwrap();

        assert_eq!(read_all(&mut stream), reference, "round {round}");
        image = stream.into_backing().unwrap().into_inner();
    }
}

proptest! {
    #[test]
    fn prop_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 1usize..96,
    ) {
        let mut stream = memory_stream(chunk_size);
        prop_assert_eq!(stream.write(&data).unwrap(), data.len());
        prop_assert_eq!(read_all(&mut stream), data);
    }

    #[test]
    fn prop_split_writes_equal_one_write(
        data in proptest::collection::vec(any::<u8>(), 1..1024),
        chunk_size in 1usize..64,
        cut_seed in any::<u64>(),
    ) {
        // Issue the payload as several sequential writes; the result must
        // match writing it in one call.
        let mut rng = ChaCha8Rng::seed_from_u64(cut_seed);
        let mut stream = memory_stream(chunk_size);

        let mut offset = 0;
        while offset < data.len() {
            let len = rng.random_range(1..=data.len() - offset);
            stream.write(&data[offset..offset + len]).unwrap();
            offset += len;
        }

        prop_assert_eq!(stream.position(), data.len() as u64);
        prop_assert_eq!(read_all(&mut stream), data);
    }

    #[test]
    fn prop_overwrites_match_reference(
        base in proptest::collection::vec(any::<u8>(), 64..512),
        patches in proptest::collection::vec(
            (any::<u16>(), proptest::collection::vec(any::<u8>(), 1..64)),
            0..8,
        ),
        chunk_size in 1usize..48,
    ) {
        let mut reference = base.clone();
        let mut stream = memory_stream(chunk_size);
        stream.write(&base).unwrap();

        for (raw_start, patch) in &patches {
            let start = *raw_start as usize % reference.len();
            let len = patch.len().min(reference.len() - start);
            reference[start..start + len].copy_from_slice(&patch[..len]);

            stream.seek(SeekFrom::Start(start as u64)).unwrap();
            stream.write(&patch[..len]).unwrap();
        }

        prop_assert_eq!(read_all(&mut stream), reference);
    }
}
