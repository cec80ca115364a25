use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use rand::RngCore;

use crate::error::{RekordError, Result};
use crate::storage::retry::with_retry;
use crate::storage::{BlobProducer, BlobStore, WriteOutcome};

/// Blob store backed by a local directory using `std::fs` directly.
///
/// Writes go to a randomized temporary name in the destination directory
/// and are renamed into place, so concurrent readers never observe a
/// partial blob.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at the given directory path.
    pub fn new(root: &Path) -> Result<Self> {
        // Canonicalize if the path already exists for clearer errors and
        // correct behavior with symlinked roots.
        let root = if root.exists() {
            fs::canonicalize(root)?
        } else {
            root.to_path_buf()
        };
        Ok(Self { root })
    }

    /// Reject storage keys that could escape the repository root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(RekordError::InvalidFormat("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(RekordError::InvalidFormat(format!(
                "unsafe storage key: absolute path '{key}'"
            )));
        }
        if key.contains('\\') {
            return Err(RekordError::InvalidFormat(format!(
                "unsafe storage key: contains backslash '{key}'"
            )));
        }
        let path = Path::new(key);
        for component in path.components() {
            if component == Component::ParentDir {
                return Err(RekordError::InvalidFormat(format!(
                    "unsafe storage key: parent traversal '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a `/`-separated storage key to a filesystem path under the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Recursively list all files under `dir`, adding their paths relative
    /// to `self.root` as `/`-separated keys.
    fn list_recursive(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.list_recursive(&entry.path(), keys)?;
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

/// Sink wrapper that counts bytes so the store can verify the producer
/// delivered exactly the declared length.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl BlobStore for LocalStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match with_retry("local read", || fs::read(&path)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, len: u64, produce: BlobProducer) -> Result<WriteOutcome> {
        let path = self.resolve(key)?;
        if self.test_slow(key)? {
            return Ok(WriteOutcome::AlreadyExists);
        }
        if let Some(parent) = path.parent() {
            with_retry("local mkdir", || fs::create_dir_all(parent))?;
        }

        let tmp_path = path.with_extension(format!("tmp{:016x}", rand::thread_rng().next_u64()));
        let file = with_retry("local create", || fs::File::create(&tmp_path))?;
        let mut sink = CountingWriter {
            inner: file,
            written: 0,
        };

        let result = produce(&mut sink).and_then(|()| {
            sink.flush()?;
            if sink.written != len {
                return Err(RekordError::Other(format!(
                    "blob producer wrote {} bytes, declared {len}",
                    sink.written
                )));
            }
            Ok(())
        });
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        drop(sink);

        // Last writer wins; content-derived keys make colliding writes
        // byte-identical anyway.
        if let Err(e) = with_retry("local rename", || fs::rename(&tmp_path, &path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(WriteOutcome::Written(len))
    }

    fn test_fast(&self, key: &str) -> Result<bool> {
        self.test_slow(key)
    }

    fn test_slow(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix.trim_end_matches('/'))?;
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                let mut keys = Vec::new();
                self.list_recursive(&dir, &mut keys)?;
                Ok(keys)
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match with_retry("local delete", || fs::remove_file(&path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn create_dir(&self, key: &str) -> Result<()> {
        let path = self.resolve(key.trim_end_matches('/'))?;
        fs::create_dir_all(&path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_all(store: &LocalStore, key: &str, data: &[u8]) -> Result<WriteOutcome> {
        store.write(key, data.len() as u64, &mut |sink| {
            sink.write_all(data)?;
            Ok(())
        })
    }

    #[test]
    fn validate_key_rejects_unsafe_keys() {
        assert!(LocalStore::validate_key("/etc/passwd").is_err());
        assert!(LocalStore::validate_key("\\Windows\\System32").is_err());
        assert!(LocalStore::validate_key("../../outside").is_err());
        assert!(LocalStore::validate_key("foo/../../etc/passwd").is_err());
        assert!(LocalStore::validate_key("foo\\bar").is_err());
        assert!(LocalStore::validate_key("").is_err());
    }

    #[test]
    fn validate_key_accepts_safe_keys() {
        assert!(LocalStore::validate_key("meta/id").is_ok());
        assert!(LocalStore::validate_key("objects/ab/deadbeef").is_ok());
        assert!(LocalStore::validate_key("tags/abc123").is_ok());
        assert!(LocalStore::validate_key("keys/full").is_ok());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let outcome = write_all(&store, "objects/ab/abcd", b"hello").unwrap();
        assert_eq!(outcome, WriteOutcome::Written(5));
        assert_eq!(store.read("objects/ab/abcd").unwrap().unwrap(), b"hello");
    }

    #[test]
    fn second_write_reports_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        write_all(&store, "objects/ab/abcd", b"hello").unwrap();
        let outcome = write_all(&store, "objects/ab/abcd", b"hello").unwrap();
        assert_eq!(outcome, WriteOutcome::AlreadyExists);
    }

    #[test]
    fn short_producer_is_an_error_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let result = store.write("objects/ab/abcd", 10, &mut |sink| {
            sink.write_all(b"short")?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!store.test_slow("objects/ab/abcd").unwrap());
        // No temp file left behind either.
        assert!(store.list("objects").unwrap().is_empty());
    }

    #[test]
    fn zero_length_write_creates_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let outcome = store.write("tags/abcd", 0, &mut |_| Ok(())).unwrap();
        assert_eq!(outcome, WriteOutcome::Written(0));
        assert!(store.test_slow("tags/abcd").unwrap());
        assert_eq!(store.read("tags/abcd").unwrap().unwrap().len(), 0);
    }

    #[test]
    fn exists_and_list_on_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        assert!(!store.test_slow("no_such_file").unwrap());
        assert!(store.list("no_such_dir").unwrap().is_empty());
    }

    #[test]
    fn list_returns_full_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        write_all(&store, "tags/aa", b"").unwrap();
        write_all(&store, "tags/bb", b"").unwrap();
        let mut keys = store.list("tags/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["tags/aa".to_string(), "tags/bb".to_string()]);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        write_all(&store, "tags/aa", b"").unwrap();
        store.delete("tags/aa").unwrap();
        store.delete("tags/aa").unwrap();
        assert!(!store.test_slow("tags/aa").unwrap());
    }

    #[test]
    fn resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        assert!(store.read("../../etc/passwd").is_err());
        assert!(store.delete("/absolute").is_err());
    }
}
