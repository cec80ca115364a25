use rekord_types::ObjectId;

use crate::error::RekordError;
use crate::object::{
    decode, encode, DirEntry, DirectoryObject, EntryKind, FileChunkRef, FileContent, FileObject,
    LinkObject, Object, ObjectType, RootKind, SnapshotObject,
};

fn sample_id(byte: u8) -> ObjectId {
    ObjectId([byte; 32])
}

fn sample_entry(name: &str, kind: EntryKind, id_byte: u8) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        kind,
        id: sample_id(id_byte),
        mode: 0o644,
        mtime: 1_700_000_000_000_000,
        size: 42,
    }
}

#[test]
fn type_tags_match_format() {
    assert_eq!(ObjectType::Chunk as u8, 0);
    assert_eq!(ObjectType::File as u8, 1);
    assert_eq!(ObjectType::Directory1 as u8, 2);
    assert_eq!(ObjectType::Snapshot1 as u8, 3);
    assert_eq!(ObjectType::Link as u8, 4);
    assert_eq!(ObjectType::Directory2 as u8, 5);
    assert_eq!(ObjectType::Snapshot2 as u8, 6);
    assert!(matches!(
        ObjectType::from_u8(7),
        Err(RekordError::UnknownObjectType(7))
    ));
}

#[test]
fn chunk_encoding_is_identity() {
    let object = Object::Chunk(b"raw bytes".to_vec());
    assert_eq!(encode(&object), b"raw bytes");
    assert_eq!(decode(ObjectType::Chunk, b"raw bytes").unwrap(), object);
}

#[test]
fn file_roundtrip_chunked() {
    let object = Object::File(FileObject {
        len: 2048,
        content: FileContent::Chunks(vec![
            FileChunkRef {
                offset: 0,
                id: sample_id(1),
            },
            FileChunkRef {
                offset: 1024,
                id: sample_id(2),
            },
        ]),
    });
    let encoded = encode(&object);
    assert_eq!(decode(ObjectType::File, &encoded).unwrap(), object);
}

#[test]
fn file_roundtrip_inline() {
    let object = Object::File(FileObject {
        len: 6,
        content: FileContent::Inline(b"hello\n".to_vec()),
    });
    let encoded = encode(&object);
    assert_eq!(decode(ObjectType::File, &encoded).unwrap(), object);
}

#[test]
fn file_rejects_unsorted_offsets() {
    let object = Object::File(FileObject {
        len: 2048,
        content: FileContent::Chunks(vec![
            FileChunkRef {
                offset: 1024,
                id: sample_id(1),
            },
            FileChunkRef {
                offset: 0,
                id: sample_id(2),
            },
        ]),
    });
    let encoded = encode(&object);
    assert!(matches!(
        decode(ObjectType::File, &encoded),
        Err(RekordError::Corrupt(_))
    ));
}

#[test]
fn file_rejects_nonzero_first_offset() {
    let object = Object::File(FileObject {
        len: 2048,
        content: FileContent::Chunks(vec![FileChunkRef {
            offset: 17,
            id: sample_id(1),
        }]),
    });
    let encoded = encode(&object);
    assert!(matches!(
        decode(ObjectType::File, &encoded),
        Err(RekordError::Corrupt(_))
    ));
}

#[test]
fn directory_entries_sorted_on_encode() {
    let forward = DirectoryObject {
        entries: vec![
            sample_entry("alpha", EntryKind::File, 1),
            sample_entry("beta", EntryKind::Directory, 2),
        ],
    };
    let reversed = DirectoryObject {
        entries: vec![
            sample_entry("beta", EntryKind::Directory, 2),
            sample_entry("alpha", EntryKind::File, 1),
        ],
    };
    assert_eq!(
        encode(&Object::Directory(forward)),
        encode(&Object::Directory(reversed)),
        "encoding must be independent of entry arrival order"
    );
}

#[test]
fn directory_roundtrip_v2() {
    let object = Object::Directory(DirectoryObject {
        entries: vec![
            sample_entry("a.txt", EntryKind::File, 1),
            sample_entry("sub", EntryKind::Directory, 2),
            sample_entry("z-link", EntryKind::Link, 3),
        ],
    });
    let encoded = encode(&object);
    assert_eq!(decode(ObjectType::Directory2, &encoded).unwrap(), object);
}

#[test]
fn directory_v1_read_support() {
    // Hand-build a v1 encoding: v2 without the per-entry size field.
    let entry = sample_entry("legacy", EntryKind::File, 9);
    let mut encoded = Vec::new();
    encoded.extend_from_slice(&1u32.to_le_bytes());
    encoded.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
    encoded.extend_from_slice(entry.name.as_bytes());
    encoded.push(entry.kind as u8);
    encoded.extend_from_slice(&entry.id.0);
    encoded.extend_from_slice(&entry.mode.to_le_bytes());
    encoded.extend_from_slice(&entry.mtime.to_le_bytes());

    let decoded = decode(ObjectType::Directory1, &encoded).unwrap();
    let Object::Directory(dir) = decoded else {
        panic!("expected directory");
    };
    assert_eq!(dir.entries.len(), 1);
    assert_eq!(dir.entries[0].name, "legacy");
    assert_eq!(dir.entries[0].size, 0, "v1 entries carry no size");
}

#[test]
fn directory_rejects_unsorted_entries() {
    // encode() sorts, so build the out-of-order stream by hand.
    let mut encoded = Vec::new();
    encoded.extend_from_slice(&2u32.to_le_bytes());
    for name in ["b", "a"] {
        let entry = sample_entry(name, EntryKind::File, 1);
        encoded.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        encoded.extend_from_slice(entry.name.as_bytes());
        encoded.push(entry.kind as u8);
        encoded.extend_from_slice(&entry.id.0);
        encoded.extend_from_slice(&entry.mode.to_le_bytes());
        encoded.extend_from_slice(&entry.mtime.to_le_bytes());
        encoded.extend_from_slice(&entry.size.to_le_bytes());
    }
    assert!(matches!(
        decode(ObjectType::Directory2, &encoded),
        Err(RekordError::Corrupt(_))
    ));
}

#[test]
fn snapshot_roundtrip_v2() {
    let object = Object::Snapshot(SnapshotObject {
        time: 1_700_000_000_000_000,
        name: "nightly".to_string(),
        root: sample_id(7),
        root_kind: RootKind::Directory,
        logical_size: 123_456,
        stored_size: 78_910,
    });
    let encoded = encode(&object);
    assert_eq!(decode(ObjectType::Snapshot2, &encoded).unwrap(), object);
}

#[test]
fn snapshot_v1_read_support() {
    // v1 = v2 without the trailing stored_size.
    let mut encoded = Vec::new();
    encoded.extend_from_slice(&42i64.to_le_bytes());
    encoded.extend_from_slice(&0u16.to_le_bytes());
    encoded.extend_from_slice(&[7u8; 32]);
    encoded.push(RootKind::File as u8);
    encoded.extend_from_slice(&99i64.to_le_bytes());

    let decoded = decode(ObjectType::Snapshot1, &encoded).unwrap();
    let Object::Snapshot(snapshot) = decoded else {
        panic!("expected snapshot");
    };
    assert_eq!(snapshot.time, 42);
    assert_eq!(snapshot.name, "");
    assert_eq!(snapshot.root_kind, RootKind::File);
    assert_eq!(snapshot.logical_size, 99);
    assert_eq!(snapshot.stored_size, 0, "v1 snapshots carry no stored size");
}

#[test]
fn link_roundtrip() {
    let object = Object::Link(LinkObject {
        target: "../shared/data".to_string(),
    });
    let encoded = encode(&object);
    assert_eq!(decode(ObjectType::Link, &encoded).unwrap(), object);
}

#[test]
fn decode_rejects_trailing_bytes() {
    let object = Object::Link(LinkObject {
        target: "x".to_string(),
    });
    let mut encoded = encode(&object);
    encoded.push(0);
    assert!(matches!(
        decode(ObjectType::Link, &encoded),
        Err(RekordError::Corrupt(_))
    ));
}

#[test]
fn decode_rejects_truncation() {
    let object = Object::Snapshot(SnapshotObject {
        time: 1,
        name: "s".to_string(),
        root: sample_id(1),
        root_kind: RootKind::Directory,
        logical_size: 0,
        stored_size: 0,
    });
    let encoded = encode(&object);
    assert!(matches!(
        decode(ObjectType::Snapshot2, &encoded[..encoded.len() - 1]),
        Err(RekordError::Corrupt(_))
    ));
}

#[test]
fn decode_rejects_invalid_utf8_name() {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(&2u32.to_le_bytes());
    encoded.extend_from_slice(&[0xFF, 0xFE]);
    assert!(matches!(
        decode(ObjectType::Link, &encoded),
        Err(RekordError::Corrupt(_))
    ));
}

#[test]
fn encoding_is_byte_stable() {
    let object = Object::Directory(DirectoryObject {
        entries: vec![
            sample_entry("one", EntryKind::File, 1),
            sample_entry("two", EntryKind::Directory, 2),
        ],
    });
    assert_eq!(encode(&object), encode(&object.clone()));
}
