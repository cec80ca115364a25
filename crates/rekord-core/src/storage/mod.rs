pub mod local_backend;
pub mod retry;

use std::io::Write;

use crate::error::Result;

/// Outcome of a blob write. `AlreadyExists` is an expected, non-error
/// result: object paths are content-derived, so a colliding write means
/// the exact bytes are already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The blob was written; carries the number of bytes stored.
    Written(u64),
    /// A blob already exists at this key; nothing was written.
    AlreadyExists,
}

impl WriteOutcome {
    /// Bytes actually written (zero for `AlreadyExists`).
    pub fn bytes_written(&self) -> u64 {
        match self {
            WriteOutcome::Written(n) => *n,
            WriteOutcome::AlreadyExists => 0,
        }
    }
}

/// Pull-based blob producer: invoked zero or one times with the store's
/// sink, and must write exactly the declared number of bytes.
pub type BlobProducer<'a> = &'a mut dyn FnMut(&mut dyn Write) -> Result<()>;

/// Abstract key→blob storage for repository objects.
/// Keys are `/`-separated string paths (e.g. "objects/ab/ab01cd02...").
///
/// Writes must be atomic to observers: a reader sees either the whole blob
/// or no blob. Backends without native atomicity write to a temporary name
/// and rename.
pub trait BlobStore: Send + Sync {
    /// Read a blob by key. Returns `None` if not found.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a blob of exactly `len` bytes supplied by `produce`.
    ///
    /// The store may skip calling `produce` entirely when the key already
    /// exists (returning `AlreadyExists`).
    fn write(&self, key: &str, len: u64, produce: BlobProducer) -> Result<WriteOutcome>;

    /// Cheap existence probe. False negatives are allowed; callers use it
    /// only as a hint and confirm misses with `test_slow`.
    fn test_fast(&self, key: &str) -> Result<bool>;

    /// Authoritative existence check.
    fn test_slow(&self, key: &str) -> Result<bool>;

    /// List all keys under a prefix. Returns full key paths.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a blob. Used only for init rollback and tag maintenance.
    fn delete(&self, key: &str) -> Result<()>;

    /// Create a directory marker (no-op for flat object stores).
    fn create_dir(&self, key: &str) -> Result<()>;
}

impl BlobStore for Box<dyn BlobStore> {
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
