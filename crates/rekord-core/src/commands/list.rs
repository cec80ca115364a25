use tracing::warn;

use rekord_types::ObjectId;

use crate::error::{RekordError, Result};
use crate::object::Object;
use crate::repo::{DiskMode, Repository};

/// One snapshot known to the repository.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub id: ObjectId,
    /// Empty string means the snapshot was stored unnamed.
    pub name: String,
    /// Creation time, Unix microseconds.
    pub time: i64,
    pub logical_size: i64,
    pub stored_size: i64,
}

/// Enumerate all tagged snapshots, oldest first.
///
/// Tags pointing at missing or non-snapshot objects are reported and
/// skipped rather than failing the listing.
pub fn run(repo: &Repository) -> Result<Vec<SnapshotInfo>> {
    if repo.mode() != DiskMode::ReadWrite {
        return Err(RekordError::WriteOnly);
    }
    let mut snapshots = Vec::new();
    for id in repo.list_tags()? {
        match repo.read_object(&id) {
            Ok(Object::Snapshot(snapshot)) => snapshots.push(SnapshotInfo {
                id,
                name: snapshot.name,
                time: snapshot.time,
                logical_size: snapshot.logical_size,
                stored_size: snapshot.stored_size,
            }),
            Ok(_) => warn!(id = %id, "tag does not reference a snapshot, skipping"),
            Err(e) => warn!(id = %id, error = %e, "cannot read tagged snapshot, skipping"),
        }
    }
    snapshots.sort_by_key(|s| s.time);
    Ok(snapshots)
}
