use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::crypto::key::KdfParams;
use crate::error::{RekordError, Result};
use crate::repo::Repository;
use crate::storage::{BlobProducer, BlobStore, WriteOutcome};

pub const TEST_FULL_PWD: &str = "test-full-password";
pub const TEST_WRITE_PWD: &str = "test-write-password";

/// In-memory blob store for testing. Thread-safe via Mutex, and counts
/// successful (non-deduplicated) writes so tests can assert dedup.
pub struct MemoryStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of writes that actually stored bytes (AlreadyExists excluded).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Keys currently stored under a prefix.
    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        let map = self.data.lock().unwrap();
        map.keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Overwrite a stored blob in place (corruption tests).
    pub fn tamper(&self, key: &str, f: impl FnOnce(&mut Vec<u8>)) {
        let mut map = self.data.lock().unwrap();
        let blob = map.get_mut(key).expect("tamper target must exist");
        f(blob);
    }
}

impl BlobStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn write(&self, key: &str, len: u64, produce: BlobProducer) -> Result<WriteOutcome> {
        {
            let map = self.data.lock().unwrap();
            if map.contains_key(key) {
                return Ok(WriteOutcome::AlreadyExists);
            }
        }
        let mut blob = Vec::with_capacity(len as usize);
        produce(&mut blob)?;
        if blob.len() as u64 != len {
            return Err(RekordError::Other(format!(
                "blob producer wrote {} bytes, declared {len}",
                blob.len()
            )));
        }
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), blob);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Written(len))
    }

    fn test_fast(&self, key: &str) -> Result<bool> {
        self.test_slow(key)
    }

    fn test_slow(&self, key: &str) -> Result<bool> {
        let map = self.data.lock().unwrap();
        Ok(map.contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(key);
        Ok(())
    }

    fn create_dir(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

impl BlobStore for Arc<MemoryStore> {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).read(key)
    }
    fn write(&self, key: &str, len: u64, produce: BlobProducer) -> Result<WriteOutcome> {
        (**self).write(key, len, produce)
    }
    fn test_fast(&self, key: &str) -> Result<bool> {
        (**self).test_fast(key)
    }
    fn test_slow(&self, key: &str) -> Result<bool> {
        (**self).test_slow(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }
    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
    fn create_dir(&self, key: &str) -> Result<()> {
        (**self).create_dir(key)
    }
}

/// Create a memory-backed repository with cheap KDF parameters, returning
/// the store handle alongside for inspection.
pub fn test_repo_with_store() -> (Repository, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let repo = Repository::init(
        Box::new(Arc::clone(&store)),
        TEST_FULL_PWD,
        TEST_WRITE_PWD,
        &KdfParams::insecure_for_tests(),
    )
    .expect("failed to init test repo");
    (repo, store)
}

/// Create a memory-backed repository with cheap KDF parameters.
pub fn test_repo() -> Repository {
    test_repo_with_store().0
}

/// Reopen a shared memory store with the given password.
pub fn reopen(store: &Arc<MemoryStore>, password: &str) -> Result<Repository> {
    Repository::open(Box::new(Arc::clone(store)), password)
}

/// Deterministic pseudo-random bytes for content fixtures.
pub fn pseudo_random(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E3779B97F4A7C15).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}
