mod pipeline;
mod walk;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use tracing::info;

use rekord_types::ObjectId;

use crate::error::{RekordError, Result};
use crate::object::{DirectoryObject, EntryKind, Object, RootKind, SnapshotObject};
use crate::repo::Repository;

/// Settings for a put operation.
#[derive(Debug, Clone, Default)]
pub struct PutSettings {
    /// Optional user-friendly snapshot name.
    pub name: Option<String>,
    /// Follow symbolic links instead of storing them as link objects.
    pub follow_symlinks: bool,
    /// Skip the snapshot object and tag; return the root data ID directly.
    pub raw: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PutStats {
    pub files: u64,
    pub dirs: u64,
    pub links: u64,
    /// Entries skipped over soft errors (unreadable, unrepresentable).
    pub skipped: u64,
}

/// Result of a put: the snapshot ID (or root data ID with `raw`), the
/// logical size of the stored tree, and the bytes physically written
/// (already-present objects excluded).
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub id: ObjectId,
    pub logical_size: i64,
    pub written: u64,
    pub stats: PutStats,
}

/// Store one or more filesystem trees as a snapshot.
pub fn run(
    repo: &Repository,
    settings: &PutSettings,
    paths: &[PathBuf],
    cancel: &AtomicBool,
) -> Result<PutOutcome> {
    if paths.is_empty() {
        return Err(RekordError::Config("no paths to store".into()));
    }

    let tree = pipeline::run_pipeline(
        repo,
        paths,
        settings.follow_symlinks,
        repo.threads(),
        cancel,
    )?;
    let mut written = tree.written;

    // A single file or directory becomes the snapshot root itself; multiple
    // inputs (or a lone symlink) get a synthesized root directory.
    let direct_root = match tree.entries.as_slice() {
        [entry] if entry.kind == EntryKind::Directory => Some((entry.id, RootKind::Directory)),
        [entry] if entry.kind == EntryKind::File => Some((entry.id, RootKind::File)),
        _ => None,
    };
    let (root_id, root_kind) = match direct_root {
        Some(root) => root,
        None => {
            let (id, dir_written) = repo.store_object(&Object::Directory(DirectoryObject {
                entries: tree.entries,
            }))?;
            written += dir_written;
            (id, RootKind::Directory)
        }
    };

    let id = if settings.raw {
        root_id
    } else {
        let snapshot = SnapshotObject {
            time: Utc::now().timestamp_micros(),
            name: settings.name.clone().unwrap_or_default(),
            root: root_id,
            root_kind,
            logical_size: tree.logical,
            stored_size: written as i64,
        };
        let (snapshot_id, snapshot_written) = repo.store_object(&Object::Snapshot(snapshot))?;
        written += snapshot_written;
        repo.write_tag(&snapshot_id)?;
        snapshot_id
    };

    repo.flush_index_cache()?;

    info!(
        files = tree.stats.files,
        dirs = tree.stats.dirs,
        links = tree.stats.links,
        skipped = tree.stats.skipped,
        logical = tree.logical,
        written,
        "put finished"
    );

    Ok(PutOutcome {
        id,
        logical_size: tree.logical,
        written,
        stats: tree.stats,
    })
}
