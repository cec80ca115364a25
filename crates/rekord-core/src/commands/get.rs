use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use rekord_types::ObjectId;

use crate::error::{RekordError, Result};
use crate::object::{DirEntry, DirectoryObject, EntryKind, FileContent, FileObject, Object, RootKind};
use crate::platform::fs as platform_fs;
use crate::repo::Repository;

/// Settings for a get operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetSettings {
    /// Write a snapshot-rooted tree as a flat list of files whose names
    /// are their relative paths with separators replaced; creates no
    /// intermediate directories and skips symlinks.
    pub flat: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetStats {
    pub files: u64,
    pub dirs: u64,
    pub links: u64,
    pub bytes: u64,
}

/// A file queued for the parallel restore phase.
struct PlannedFile {
    rel: PathBuf,
    file: FileObject,
    mode: u32,
    mtime: i64,
}

/// A directory whose metadata is applied after its contents land.
struct PlannedDir {
    rel: PathBuf,
    mode: u32,
    mtime: i64,
    depth: usize,
}

/// One directory entry queued for the parallel plan phase.
struct EntryWork {
    parent_rel: PathBuf,
    depth: usize,
    entry: DirEntry,
}

/// What a plan worker produced for one directory entry.
enum PlannedEntry {
    File(PlannedFile),
    Dir {
        planned: Option<PlannedDir>,
        rel: PathBuf,
        depth: usize,
        entries: Vec<DirEntry>,
    },
    Link,
    /// A symlink skipped in flat mode.
    Skipped,
}

/// Shared DAG-visit set: memoized object fetches, so subtrees referenced
/// from several places are fetched and decoded once.
///
/// Two workers racing on the same ID may both fetch it; the first insert
/// wins and the duplicate is dropped, which is harmless in a
/// content-addressed store.
struct VisitMap {
    objects: Mutex<HashMap<ObjectId, Arc<Object>>>,
}

impl VisitMap {
    fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn fetch(&self, repo: &Repository, id: &ObjectId) -> Result<Arc<Object>> {
        if let Some(object) = self.objects.lock().unwrap().get(id) {
            return Ok(Arc::clone(object));
        }
        let object = Arc::new(repo.read_object(id)?);
        let mut objects = self.objects.lock().unwrap();
        Ok(Arc::clone(objects.entry(*id).or_insert(object)))
    }
}

/// Materialize an object tree at `dest`.
///
/// A failure partway through leaves a partial tree on disk; no cleanup is
/// attempted. Every decryption failure is fatal for the whole restore.
pub fn run(
    repo: &Repository,
    id: &ObjectId,
    settings: &GetSettings,
    dest: &Path,
    cancel: &AtomicBool,
) -> Result<GetStats> {
    let root = repo.read_object(id)?;

    let root = match root {
        Object::Snapshot(snapshot) => {
            debug!(root = %snapshot.root, "descending into snapshot root");
            let inner = repo.read_object(&snapshot.root)?;
            match (snapshot.root_kind, &inner) {
                (RootKind::Directory, Object::Directory(_)) => inner,
                (RootKind::File, Object::File(_)) => inner,
                _ => {
                    return Err(RekordError::Corrupt(
                        "snapshot root kind does not match root object".into(),
                    ));
                }
            }
        }
        other => other,
    };

    let stats = match root {
        Object::Directory(dir) => restore_tree(repo, dir, settings, dest, cancel)?,
        Object::File(file) => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = restore_file_content(repo, dest, &file, cancel)?;
            GetStats {
                files: 1,
                bytes,
                ..GetStats::default()
            }
        }
        Object::Chunk(data) => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, &data)?;
            GetStats {
                files: 1,
                bytes: data.len() as u64,
                ..GetStats::default()
            }
        }
        Object::Link(link) => {
            platform_fs::create_symlink(Path::new(&link.target), dest)?;
            GetStats {
                links: 1,
                ..GetStats::default()
            }
        }
        Object::Snapshot(_) => {
            return Err(RekordError::Corrupt("snapshot points at a snapshot".into()));
        }
    };

    info!(
        files = stats.files,
        dirs = stats.dirs,
        links = stats.links,
        bytes = stats.bytes,
        "restored to {}",
        dest.display()
    );
    Ok(stats)
}

fn restore_tree(
    repo: &Repository,
    root: DirectoryObject,
    settings: &GetSettings,
    dest: &Path,
    cancel: &AtomicBool,
) -> Result<GetStats> {
    fs::create_dir_all(dest)?;

    let threads = repo.threads();
    let mut stats = GetStats::default();
    let visit = VisitMap::new();
    let mut planned_files: Vec<PlannedFile> = Vec::new();
    let mut planned_dirs: Vec<PlannedDir> = Vec::new();

    // Plan phase: expand the DAG level by level. Each level's entries fan
    // out across a bounded worker pool that fetches and decodes child
    // objects in parallel; directories and symlinks are materialized as
    // their entries are processed, files are queued for the next phase.
    let mut frontier: Vec<EntryWork> = root
        .entries
        .iter()
        .cloned()
        .map(|entry| EntryWork {
            parent_rel: PathBuf::new(),
            depth: 0,
            entry,
        })
        .collect();

    while !frontier.is_empty() {
        if cancel.load(Ordering::Relaxed) {
            return Err(RekordError::Interrupted);
        }
        let level = plan_level(
            repo,
            std::mem::take(&mut frontier),
            &visit,
            settings.flat,
            dest,
            threads,
            cancel,
        )?;
        for outcome in level {
            match outcome {
                PlannedEntry::File(planned) => planned_files.push(planned),
                PlannedEntry::Dir {
                    planned,
                    rel,
                    depth,
                    entries,
                } => {
                    stats.dirs += 1;
                    if let Some(planned) = planned {
                        planned_dirs.push(planned);
                    }
                    frontier.extend(entries.into_iter().map(|entry| EntryWork {
                        parent_rel: rel.clone(),
                        depth,
                        entry,
                    }));
                }
                PlannedEntry::Link => stats.links += 1,
                PlannedEntry::Skipped => {}
            }
        }
    }
    drop(visit);

    debug!(
        files = planned_files.len(),
        dirs = planned_dirs.len(),
        "restore plan built"
    );

    // Restore phase: planned files stream through a bounded channel to the
    // worker pool; the first error aborts the feed and wins.
    let bytes = AtomicU64::new(0);
    let file_count = planned_files.len() as u64;
    let abort = AtomicBool::new(false);
    let first_err: Mutex<Option<RekordError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        let (tx, rx) = crossbeam_channel::bounded::<PlannedFile>(threads * 2);
        let bytes_ref = &bytes;
        let abort_ref = &abort;
        let first_err_ref = &first_err;

        for _ in 0..threads {
            let rx = rx.clone();
            scope.spawn(move || {
                for planned in rx {
                    if abort_ref.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                        continue; // Drain without working.
                    }
                    let path = dest.join(&planned.rel);
                    match restore_file_content(repo, &path, &planned.file, cancel) {
                        Ok(n) => {
                            bytes_ref.fetch_add(n, Ordering::Relaxed);
                            // Mode and mtime are best-effort; hosts without
                            // Unix permissions silently relax them.
                            let _ = platform_fs::apply_mode(&path, planned.mode);
                            let _ = platform_fs::set_file_mtime(&path, planned.mtime);
                        }
                        Err(e) => {
                            let mut slot = first_err_ref.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            abort_ref.store(true, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
        drop(rx);

        for planned in planned_files {
            if abort.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                break;
            }
            if tx.send(planned).is_err() {
                break;
            }
        }
        // tx drops here; workers drain and exit, scope joins them.
    });

    if let Some(e) = first_err.into_inner().unwrap() {
        return Err(e);
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(RekordError::Interrupted);
    }

    // Directory metadata last, deepest first, so parent mtimes are not
    // disturbed by writes inside them.
    planned_dirs.sort_by(|a, b| b.depth.cmp(&a.depth));
    for dir in &planned_dirs {
        let path = dest.join(&dir.rel);
        let _ = platform_fs::apply_mode(&path, dir.mode);
        let _ = platform_fs::set_file_mtime(&path, dir.mtime);
    }

    stats.files = file_count;
    stats.bytes = bytes.into_inner();
    Ok(stats)
}

/// Fan one level of directory entries out across a bounded worker pool.
///
/// Workers fetch and decode each entry's object via the shared visit map
/// and materialize directories and symlinks. Results are unordered; the
/// first error aborts the level and wins.
fn plan_level(
    repo: &Repository,
    work: Vec<EntryWork>,
    visit: &VisitMap,
    flat: bool,
    dest: &Path,
    threads: usize,
    cancel: &AtomicBool,
) -> Result<Vec<PlannedEntry>> {
    let abort = AtomicBool::new(false);
    let first_err: Mutex<Option<RekordError>> = Mutex::new(None);
    let mut outcomes = Vec::with_capacity(work.len());

    std::thread::scope(|scope| {
        let (work_tx, work_rx) = crossbeam_channel::bounded::<EntryWork>(threads * 2);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<Result<PlannedEntry>>(threads * 2);
        let abort_ref = &abort;

        for _ in 0..threads {
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            scope.spawn(move || {
                for item in rx {
                    if abort_ref.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                        continue; // Drain without working.
                    }
                    if tx.send(plan_entry(repo, item, visit, flat, dest)).is_err() {
                        return; // Consumer gone.
                    }
                }
            });
        }
        drop(work_rx);
        drop(result_tx);

        // Feeder thread, so the consumer below never blocks the pool by
        // holding unsent work while results back up.
        scope.spawn(move || {
            for item in work {
                if abort_ref.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                    break;
                }
                if work_tx.send(item).is_err() {
                    break;
                }
            }
        });

        for result in result_rx {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let mut slot = first_err.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    abort.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
        // Dropping the result iterator unblocks workers; the scope joins
        // everything before returning.
    });

    if let Some(e) = first_err.into_inner().unwrap() {
        return Err(e);
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(RekordError::Interrupted);
    }
    Ok(outcomes)
}

/// Fetch, decode, and materialize one directory entry.
fn plan_entry(
    repo: &Repository,
    work: EntryWork,
    visit: &VisitMap,
    flat: bool,
    dest: &Path,
) -> Result<PlannedEntry> {
    let entry = work.entry;
    let rel = work.parent_rel.join(&entry.name);
    match entry.kind {
        EntryKind::Directory => {
            let object = visit.fetch(repo, &entry.id)?;
            let entries = match &*object {
                Object::Directory(dir) => dir.entries.clone(),
                _ => {
                    return Err(RekordError::Corrupt(format!(
                        "directory entry '{}' does not reference a directory",
                        entry.name
                    )));
                }
            };
            let planned = if flat {
                None
            } else {
                fs::create_dir_all(dest.join(&rel))?;
                Some(PlannedDir {
                    rel: rel.clone(),
                    mode: entry.mode,
                    mtime: entry.mtime,
                    depth: work.depth + 1,
                })
            };
            Ok(PlannedEntry::Dir {
                planned,
                rel,
                depth: work.depth + 1,
                entries,
            })
        }
        EntryKind::File => {
            let object = visit.fetch(repo, &entry.id)?;
            let file = match &*object {
                Object::File(file) => file.clone(),
                _ => {
                    return Err(RekordError::Corrupt(format!(
                        "file entry '{}' does not reference a file",
                        entry.name
                    )));
                }
            };
            let target_rel = if flat {
                PathBuf::from(flatten_rel_path(&rel))
            } else {
                rel
            };
            Ok(PlannedEntry::File(PlannedFile {
                rel: target_rel,
                file,
                mode: entry.mode,
                mtime: entry.mtime,
            }))
        }
        EntryKind::Link => {
            if flat {
                warn!(name = %entry.name, "flat restore skips symlinks");
                return Ok(PlannedEntry::Skipped);
            }
            let object = visit.fetch(repo, &entry.id)?;
            let link = match &*object {
                Object::Link(link) => link.clone(),
                _ => {
                    return Err(RekordError::Corrupt(format!(
                        "link entry '{}' does not reference a link",
                        entry.name
                    )));
                }
            };
            let link_path = dest.join(&rel);
            platform_fs::create_symlink(Path::new(&link.target), &link_path)?;
            let _ = platform_fs::set_file_mtime(&link_path, entry.mtime);
            Ok(PlannedEntry::Link)
        }
    }
}

/// Flat-mode name: the relative path with separators replaced.
fn flatten_rel_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("_")
}

/// Stream a file object's content to `path`, verifying chunk offsets and
/// the declared total length.
fn restore_file_content(
    repo: &Repository,
    path: &Path,
    file: &FileObject,
    cancel: &AtomicBool,
) -> Result<u64> {
    let mut out = fs::File::create(path)?;

    match &file.content {
        FileContent::Inline(bytes) => {
            if bytes.len() as u64 != file.len {
                return Err(RekordError::Corrupt("inline file length mismatch".into()));
            }
            out.write_all(bytes)?;
        }
        FileContent::Chunks(chunks) => {
            let mut position = 0u64;
            for chunk_ref in chunks {
                if cancel.load(Ordering::Relaxed) {
                    return Err(RekordError::Interrupted);
                }
                if chunk_ref.offset != position {
                    return Err(RekordError::Corrupt(format!(
                        "chunk offset {} does not match stream position {position}",
                        chunk_ref.offset
                    )));
                }
                let data = match repo.read_object(&chunk_ref.id)? {
                    Object::Chunk(data) => data,
                    _ => {
                        return Err(RekordError::Corrupt(
                            "file chunk list references a non-chunk object".into(),
                        ));
                    }
                };
                out.write_all(&data)?;
                position += data.len() as u64;
            }
            if position != file.len {
                return Err(RekordError::Corrupt(format!(
                    "file length mismatch: declared {}, assembled {position}",
                    file.len
                )));
            }
        }
    }

    out.flush()?;
    Ok(file.len)
}
