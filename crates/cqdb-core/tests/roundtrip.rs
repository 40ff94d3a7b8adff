use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Cursor, Seek, SeekFrom, Write};

use cqdb_core::{hashlittle, KeyHasher, OpenError, Reader, Writer, WriterOptions};

fn words(count: usize) -> Vec<String> {
    (0..count).map(|n| format!("word-{n:05}")).collect()
}

fn build_with<H: KeyHasher>(
    pairs: &[(String, i32)],
    options: WriterOptions,
    hasher: H,
) -> Vec<u8> {
    let mut writer = Writer::create_with_hasher(Cursor::new(Vec::new()), options, hasher)
        .expect("create writer");
    for (key, id) in pairs {
        writer.put(key, *id).expect("put");
    }
    assert_eq!(writer.num_records(), pairs.len());
    writer.close().expect("close").into_inner()
}

#[test]
fn forward_and_reverse_round_trip() {
    let pairs: Vec<(String, i32)> = words(2_000)
        .into_iter()
        .zip((0..).map(|n: i32| n * 3 + 1))
        .collect();
    let bytes = build_with(&pairs, WriterOptions::default(), cqdb_core::Lookup3::default());
    let db = Reader::open(&bytes).expect("open");

    assert_eq!(db.num_records(), pairs.len());
    for (key, id) in &pairs {
        assert_eq!(db.to_id(key), Some(*id), "forward lookup for {key}");
        assert_eq!(db.to_str(*id), Some(key.as_str()), "reverse lookup for {id}");
    }
    // Ids between the sparse ones were never inserted.
    assert_eq!(db.to_key(2), None);
    assert_eq!(db.to_key(3), None);
    assert_eq!(db.to_id("word-99999"), None);
    assert_eq!(db.to_id(""), None);
}

#[test]
fn one_way_chunks_never_answer_reverse_queries() {
    let pairs: Vec<(String, i32)> = words(300).into_iter().zip(0..).collect();
    let one_way = build_with(&pairs, WriterOptions::one_way(), cqdb_core::Lookup3::default());
    let two_way = build_with(&pairs, WriterOptions::default(), cqdb_core::Lookup3::default());
    assert!(one_way.len() < two_way.len());
    assert_eq!(two_way.len() - one_way.len(), pairs.len() * 4);

    let db = Reader::open(&one_way).expect("open");
    for (key, id) in &pairs {
        assert_eq!(db.to_id(key), Some(*id));
        assert_eq!(db.to_key(*id), None);
    }
}

/// Forces every key into bucket class 7 while keeping the upper bits varied.
struct SingleBucket;

impl KeyHasher for SingleBucket {
    fn hash(&self, bytes: &[u8]) -> u32 {
        (hashlittle(bytes, 0) & !0xff) | 7
    }
}

/// Every key gets the same hash, so lookups depend on full key comparison.
struct Colliding;

impl KeyHasher for Colliding {
    fn hash(&self, _bytes: &[u8]) -> u32 {
        0x1234_5607
    }
}

#[test]
fn thousand_keys_in_one_bucket_remain_reachable() {
    let pairs: Vec<(String, i32)> = words(1_000).into_iter().zip(0..).collect();
    let bytes = build_with(&pairs, WriterOptions::default(), SingleBucket);
    let db = Reader::open_with_hasher(&bytes, SingleBucket).expect("open");

    let sizes = db.bucket_sizes();
    assert_eq!(sizes[7], 2_000);
    assert_eq!(sizes.iter().sum::<usize>(), 2_000);
    assert_eq!(db.num_records(), 1_000);
    for (key, id) in &pairs {
        assert_eq!(db.to_id(key), Some(*id), "lookup for {key}");
    }
    assert_eq!(db.to_id("absent"), None);
}

#[test]
fn identical_hashes_fall_back_to_key_comparison() {
    let pairs: Vec<(String, i32)> = words(64).into_iter().zip(100..).collect();
    let bytes = build_with(&pairs, WriterOptions::default(), Colliding);
    let db = Reader::open_with_hasher(&bytes, Colliding).expect("open");
    for (key, id) in &pairs {
        assert_eq!(db.to_id(key), Some(*id));
        assert_eq!(db.to_str(*id), Some(key.as_str()));
    }
    assert_eq!(db.to_id("word-00064"), None);
}

#[test]
fn records_enumerates_the_whole_batch() {
    let pairs: Vec<(String, i32)> = words(500).into_iter().zip(0..).collect();
    let bytes = build_with(&pairs, WriterOptions::one_way(), cqdb_core::Lookup3::default());
    let db = Reader::open(&bytes).expect("open");
    let seen: HashSet<(Vec<u8>, i32)> = db.records().map(|(k, id)| (k.to_vec(), id)).collect();
    let expected: HashSet<(Vec<u8>, i32)> = pairs
        .iter()
        .map(|(k, id)| (k.as_bytes().to_vec(), *id))
        .collect();
    assert_eq!(seen, expected);
}

#[test]
fn chunks_can_be_stacked_in_one_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("stacked.cqdb");
    let file = File::create(&path).expect("create file");

    let mut first = Writer::create(file, WriterOptions::default()).expect("first writer");
    first.put("north", 0).expect("put");
    first.put("south", 1).expect("put");
    let file = first.close().expect("close first");

    let mut second = Writer::create(file, WriterOptions::one_way()).expect("second writer");
    second.put("east", 0).expect("put");
    let mut file = second.close().expect("close second");
    let end = file.stream_position().expect("tell");
    file.flush().expect("flush");
    drop(file);

    let bytes = fs::read(&path).expect("read back");
    assert_eq!(bytes.len() as u64, end);

    let outer = Reader::open(&bytes).expect("open first");
    assert_eq!(outer.to_id("south"), Some(1));
    assert_eq!(outer.to_id("east"), None);

    let inner = Reader::open(&bytes[outer.chunk_size()..]).expect("open second");
    assert_eq!(inner.to_id("east"), Some(0));
    assert!(inner.is_one_way());
    assert_eq!(inner.chunk_size() + outer.chunk_size(), bytes.len());
}

#[test]
fn writer_respects_embedding_offset_in_existing_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("embedded.bin");
    let mut file = File::create(&path).expect("create file");
    file.write_all(&[0xAA; 100]).expect("preamble");
    file.seek(SeekFrom::Start(100)).expect("seek");

    let mut writer = Writer::create(file, WriterOptions::default()).expect("writer");
    writer.put("inner", 42).expect("put");
    drop(writer.close().expect("close"));

    let bytes = fs::read(&path).expect("read back");
    assert!(bytes[..100].iter().all(|b| *b == 0xAA));
    let db = Reader::open(&bytes[100..]).expect("open");
    assert_eq!(db.to_id("inner"), Some(42));
    assert_eq!(db.to_str(42), Some("inner"));
}

#[test]
fn header_corruption_never_yields_a_reader() {
    let pairs: Vec<(String, i32)> = words(10).into_iter().zip(0..).collect();
    let bytes = build_with(&pairs, WriterOptions::default(), cqdb_core::Lookup3::default());

    let mut bad_magic = bytes.clone();
    bad_magic[3] ^= 0xff;
    assert!(matches!(
        Reader::open(&bad_magic),
        Err(OpenError::BadMagic { .. })
    ));

    let mut flipped = bytes.clone();
    flipped[12..16].reverse();
    assert!(matches!(
        Reader::open(&flipped),
        Err(OpenError::ByteOrder { .. })
    ));

    let mut oversized = bytes.clone();
    let too_big = u32::try_from(bytes.len() + 1).unwrap();
    oversized[4..8].copy_from_slice(&too_big.to_le_bytes());
    assert!(matches!(
        Reader::open(&oversized),
        Err(OpenError::SizeMismatch { .. })
    ));

    assert!(matches!(
        Reader::open(&bytes[..16]),
        Err(OpenError::TooSmall { .. })
    ));
}
