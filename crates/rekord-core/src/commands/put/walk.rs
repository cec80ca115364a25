use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::{RekordError, Result};
use crate::platform::fs::{summarize_metadata, MetadataSummary};

/// One event of the depth-first walk, in emission order. Directory
/// boundaries travel through the pipeline alongside files so the consumer
/// can rebuild the tree post-order.
pub(super) enum WalkEntry {
    File {
        name: String,
        abs_path: PathBuf,
        meta: MetadataSummary,
    },
    Link {
        name: String,
        target: String,
        meta: MetadataSummary,
    },
    EnterDir {
        name: String,
        meta: MetadataSummary,
    },
    LeaveDir,
    /// An unreadable or unrepresentable entry; warned about and counted.
    Skipped,
}

/// Walk all source paths depth-first, feeding entries to `emit` in order.
///
/// Entries within a directory are sorted by byte-wise ascending name,
/// matching the directory-object encoding. Unreadable entries produce a
/// warning and a `Skipped` event; only `emit` failures (pipeline gone) and
/// cancellation abort the walk.
pub(super) fn walk_sources(
    paths: &[PathBuf],
    follow_symlinks: bool,
    cancel: &AtomicBool,
    emit: &mut dyn FnMut(WalkEntry) -> Result<()>,
) -> Result<()> {
    for path in paths {
        let name = match entry_name(path) {
            Some(name) => name,
            None => {
                warn!(path = %path.display(), "source path has no usable name, skipping");
                emit(WalkEntry::Skipped)?;
                continue;
            }
        };
        walk_one(path, name, follow_symlinks, cancel, emit)?;
    }
    Ok(())
}

/// The entry name a source path contributes to the snapshot root.
/// Falls back to the canonical path for inputs like `.` that have no
/// file-name component of their own.
fn entry_name(path: &Path) -> Option<String> {
    if let Some(os_name) = path.file_name() {
        return os_name.to_str().map(str::to_string);
    }
    let canonical = fs::canonicalize(path).ok()?;
    canonical.file_name()?.to_str().map(str::to_string)
}

fn walk_one(
    path: &Path,
    name: String,
    follow_symlinks: bool,
    cancel: &AtomicBool,
    emit: &mut dyn FnMut(WalkEntry) -> Result<()>,
) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(RekordError::Interrupted);
    }

    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if is_soft_io_error(&e) => {
            warn!(path = %path.display(), error = %e, "cannot stat entry, skipping");
            return emit(WalkEntry::Skipped);
        }
        Err(e) => return Err(e.into()),
    };
    let file_type = metadata.file_type();
    let meta = summarize_metadata(&metadata, &file_type);

    if file_type.is_symlink() {
        if follow_symlinks {
            return walk_followed(path, name, cancel, emit);
        }
        let target = match fs::read_link(path) {
            Ok(t) => t,
            Err(e) if is_soft_io_error(&e) => {
                warn!(path = %path.display(), error = %e, "cannot read symlink, skipping");
                return emit(WalkEntry::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        let target = match target.to_str() {
            Some(t) => t.to_string(),
            None => {
                warn!(path = %path.display(), "symlink target is not UTF-8, skipping");
                return emit(WalkEntry::Skipped);
            }
        };
        return emit(WalkEntry::Link { name, target, meta });
    }

    if file_type.is_dir() {
        return walk_dir(path, name, meta, follow_symlinks, cancel, emit);
    }

    if file_type.is_file() {
        return emit(WalkEntry::File {
            name,
            abs_path: path.to_path_buf(),
            meta,
        });
    }

    // Sockets, fifos, device nodes: not representable in a snapshot.
    warn!(path = %path.display(), "special file is not supported, skipping");
    emit(WalkEntry::Skipped)
}

/// Re-stat through the link and walk whatever it points at.
fn walk_followed(
    path: &Path,
    name: String,
    cancel: &AtomicBool,
    emit: &mut dyn FnMut(WalkEntry) -> Result<()>,
) -> Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if is_soft_io_error(&e) => {
            warn!(path = %path.display(), error = %e, "broken symlink, skipping");
            return emit(WalkEntry::Skipped);
        }
        Err(e) => return Err(e.into()),
    };
    let file_type = metadata.file_type();
    let meta = summarize_metadata(&metadata, &file_type);

    if file_type.is_dir() {
        walk_dir(path, name, meta, true, cancel, emit)
    } else if file_type.is_file() {
        emit(WalkEntry::File {
            name,
            abs_path: path.to_path_buf(),
            meta,
        })
    } else {
        warn!(path = %path.display(), "special file is not supported, skipping");
        emit(WalkEntry::Skipped)
    }
}

fn walk_dir(
    path: &Path,
    name: String,
    meta: MetadataSummary,
    follow_symlinks: bool,
    cancel: &AtomicBool,
    emit: &mut dyn FnMut(WalkEntry) -> Result<()>,
) -> Result<()> {
    let reader = match fs::read_dir(path) {
        Ok(r) => r,
        Err(e) if is_soft_io_error(&e) => {
            warn!(path = %path.display(), error = %e, "cannot read directory, skipping");
            return emit(WalkEntry::Skipped);
        }
        Err(e) => return Err(e.into()),
    };

    let mut children: Vec<(String, PathBuf)> = Vec::new();
    for entry in reader {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if is_soft_io_error(&e) => {
                warn!(path = %path.display(), error = %e, "unreadable directory entry, skipping");
                emit(WalkEntry::Skipped)?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        match entry.file_name().to_str() {
            Some(child_name) => children.push((child_name.to_string(), entry.path())),
            None => {
                warn!(
                    path = %entry.path().display(),
                    "entry name is not UTF-8, skipping"
                );
                emit(WalkEntry::Skipped)?;
            }
        }
    }
    children.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    emit(WalkEntry::EnterDir { name, meta })?;
    for (child_name, child_path) in children {
        walk_one(&child_path, child_name, follow_symlinks, cancel, emit)?;
    }
    emit(WalkEntry::LeaveDir)
}

/// Returns `true` for I/O errors safe to skip (permission denied, entry
/// vanished between listing and stat).
pub(super) fn is_soft_io_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
    )
}
