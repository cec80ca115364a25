use rekord_types::ObjectId;

use crate::error::RekordError;
use crate::index::{cache_path, IndexCache};

fn sample_id(byte: u8) -> ObjectId {
    ObjectId([byte; 32])
}

#[test]
fn insert_then_contains() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::open(dir.path(), &[0x01; 32]).unwrap();

    let id = sample_id(0xAB);
    assert!(!cache.contains(&id).unwrap());
    cache.insert(&id).unwrap();
    assert!(cache.contains(&id).unwrap(), "buffered inserts are visible");
    cache.flush().unwrap();
    assert!(cache.contains(&id).unwrap());
}

#[test]
fn entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let repo_id = [0x02; 32];
    {
        let cache = IndexCache::open(dir.path(), &repo_id).unwrap();
        cache.insert(&sample_id(1)).unwrap();
        cache.insert(&sample_id(2)).unwrap();
        // Dropped without an explicit flush; Drop flushes best-effort.
    }
    let cache = IndexCache::open(dir.path(), &repo_id).unwrap();
    assert!(cache.contains(&sample_id(1)).unwrap());
    assert!(cache.contains(&sample_id(2)).unwrap());
    assert!(!cache.contains(&sample_id(3)).unwrap());
    assert_eq!(cache.len().unwrap(), 2);
}

#[test]
fn duplicate_inserts_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::open(dir.path(), &[0x03; 32]).unwrap();
    for _ in 0..10 {
        cache.insert(&sample_id(7)).unwrap();
    }
    cache.flush().unwrap();
    assert_eq!(cache.len().unwrap(), 1);
}

#[test]
fn different_repositories_use_different_files() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = cache_path(dir.path(), &[0xAA; 32]);
    let path_b = cache_path(dir.path(), &[0xBB; 32]);
    assert_ne!(path_a, path_b);

    let cache_a = IndexCache::open(dir.path(), &[0xAA; 32]).unwrap();
    cache_a.insert(&sample_id(1)).unwrap();
    cache_a.flush().unwrap();

    let cache_b = IndexCache::open(dir.path(), &[0xBB; 32]).unwrap();
    assert!(!cache_b.contains(&sample_id(1)).unwrap());
}

#[test]
fn foreign_database_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let repo_id = [0x04; 32];
    let path = cache_path(dir.path(), &repo_id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    // A valid SQLite file with the wrong application_id.
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA application_id = 12345; CREATE TABLE other (x INTEGER);")
        .unwrap();
    drop(conn);

    let result = IndexCache::open(dir.path(), &repo_id);
    assert!(matches!(result, Err(RekordError::Config(_))));
}

#[test]
fn batch_flush_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let cache = IndexCache::open(dir.path(), &[0x05; 32]).unwrap();
    for i in 0..1500u32 {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&i.to_le_bytes());
        cache.insert(&ObjectId(bytes)).unwrap();
    }
    cache.flush().unwrap();
    assert_eq!(cache.len().unwrap(), 1500);
}
