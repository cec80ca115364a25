use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use rekord_types::ObjectId;

use crate::error::{RekordError, Result};

/// SQLite `application_id` identifying rekord index cache files.
const CACHE_APPLICATION_ID: i32 = 0x726b_4944; // "rkID"
const CACHE_USER_VERSION: i32 = 1;

/// Buffered inserts are flushed after this many IDs...
const FLUSH_BATCH: usize = 1024;
/// ...or once the oldest buffered insert is this old.
const FLUSH_AGE_SECS: u64 = 5;

/// Process-local, persistent set of object IDs known to be present in the
/// blob store. Sound but not complete: a hit means the object exists (the
/// core has no delete path, so entries never go stale); a miss means
/// nothing and callers fall back to the store's own existence checks.
pub struct IndexCache {
    conn: Mutex<Connection>,
    pending: Mutex<PendingInserts>,
}

struct PendingInserts {
    ids: Vec<[u8; 32]>,
    oldest: Option<Instant>,
}

/// Cache file path for a repository: `<cache_dir>/rekord/<repo-id-hex>.db`.
/// Embedding the full repository ID keys the cache by repository.
pub fn cache_path(cache_dir: &Path, repo_id: &[u8; 32]) -> PathBuf {
    cache_dir.join("rekord").join(format!("{}.db", hex::encode(repo_id)))
}

impl IndexCache {
    /// Open (or create) the cache for a repository under `cache_dir`.
    ///
    /// A file at the computed path that is not a rekord cache is a fatal
    /// error, never silently overwritten.
    pub fn open(cache_dir: &Path, repo_id: &[u8; 32]) -> Result<Self> {
        let path = cache_path(cache_dir, repo_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        let app_id: i32 = conn.query_row("PRAGMA application_id", [], |row| row.get(0))?;
        let user_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if app_id == 0 && user_version == 0 {
            // Fresh database.
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA application_id = {CACHE_APPLICATION_ID};
                 PRAGMA user_version = {CACHE_USER_VERSION};
                 CREATE TABLE IF NOT EXISTS known (id BLOB PRIMARY KEY) WITHOUT ROWID;"
            ))?;
            debug!(path = %path.display(), "created index cache");
        } else if app_id != CACHE_APPLICATION_ID {
            return Err(RekordError::Config(format!(
                "'{}' exists but is not a rekord index cache",
                path.display()
            )));
        } else if user_version != CACHE_USER_VERSION {
            return Err(RekordError::Config(format!(
                "index cache '{}' has unsupported version {user_version}",
                path.display()
            )));
        } else {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            pending: Mutex::new(PendingInserts {
                ids: Vec::new(),
                oldest: None,
            }),
        })
    }

    /// Is this ID known to be present in the store?
    pub fn contains(&self, id: &ObjectId) -> Result<bool> {
        {
            let pending = self.pending.lock().unwrap();
            if pending.ids.contains(&id.0) {
                return Ok(true);
            }
        }
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT 1 FROM known WHERE id = ?1",
                params![&id.0[..]],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record that this ID is present in the store. Buffered; flushed in
    /// batches, on age, or on an explicit `flush()` when a pipeline drains.
    pub fn insert(&self, id: &ObjectId) -> Result<()> {
        let should_flush = {
            let mut pending = self.pending.lock().unwrap();
            pending.ids.push(id.0);
            if pending.oldest.is_none() {
                pending.oldest = Some(Instant::now());
            }
            pending.ids.len() >= FLUSH_BATCH
                || pending
                    .oldest
                    .is_some_and(|t| t.elapsed().as_secs() >= FLUSH_AGE_SECS)
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Write all buffered IDs in one transaction.
    pub fn flush(&self) -> Result<()> {
        let ids = {
            let mut pending = self.pending.lock().unwrap();
            pending.oldest = None;
            std::mem::take(&mut pending.ids)
        };
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("INSERT OR IGNORE INTO known (id) VALUES (?1)")?;
            for id in &ids {
                stmt.execute(params![&id[..]])?;
            }
        }
        tx.commit()?;
        debug!(count = ids.len(), "flushed index cache inserts");
        Ok(())
    }

    /// Number of known IDs (diagnostics and tests). Flushes first so the
    /// count reflects buffered inserts exactly once.
    pub fn len(&self) -> Result<u64> {
        self.flush()?;
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM known", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Drop for IndexCache {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
