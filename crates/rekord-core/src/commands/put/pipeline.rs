use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::chunker::{self, ChunkerConfig};
use crate::error::{RekordError, Result};
use crate::object::{
    DirEntry, DirectoryObject, EntryKind, FileChunkRef, FileContent, FileObject, LinkObject,
    Object,
};
use crate::platform::fs::MetadataSummary;
use crate::repo::Repository;

use super::walk::{walk_sources, WalkEntry};
use super::PutStats;

/// Result of processing one walk entry in a worker.
enum ProcessedEntry {
    /// A regular file: its chunk list is stored, the file object is not.
    FileDone {
        name: String,
        meta: MetadataSummary,
        chunks: Vec<FileChunkRef>,
        len: u64,
        written: u64,
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
    Skipped,
}

/// Messages on the result channel.
///
/// Worker outcomes carry a sequence index and are committed in walk order
/// through a reorder buffer; walk-thread errors bypass it and fail fast.
enum PipelineResult {
    Done(usize, Box<ProcessedEntry>),
    WorkerErr(usize, RekordError),
    WalkErr(RekordError),
}

/// What the consumer accumulated: the synthetic root's children plus
/// totals for the snapshot object.
pub(super) struct TreeResult {
    pub entries: Vec<DirEntry>,
    pub logical: i64,
    pub written: u64,
    pub stats: PutStats,
}

/// Chunk, hash, deduplicate, seal, and store one file's bytes.
/// Returns the ordered chunk list, the byte length, and bytes written.
fn process_file(
    repo: &Repository,
    abs_path: &Path,
    config: &ChunkerConfig,
    cancel: &AtomicBool,
) -> Result<(Vec<FileChunkRef>, u64, u64)> {
    let file = File::open(abs_path)?;
    let file_len = file.metadata()?.len();

    // Small file: a single chunk, no content-defined boundaries to find.
    if file_len < config.min_size as u64 {
        let mut data = Vec::with_capacity(file_len as usize);
        let mut reader = file;
        reader.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok((Vec::new(), 0, 0));
        }
        let len = data.len() as u64;
        let (id, written) = repo.store_chunk(&data)?;
        return Ok((vec![FileChunkRef { offset: 0, id }], len, written));
    }

    let mut chunks: Vec<FileChunkRef> = Vec::new();
    let mut len = 0u64;
    let mut written = 0u64;
    for chunk in chunker::chunk_stream(file, config) {
        if cancel.load(Ordering::Relaxed) {
            return Err(RekordError::Interrupted);
        }
        let chunk = chunk?;
        let (id, chunk_written) = repo.store_chunk(&chunk.data)?;
        chunks.push(FileChunkRef {
            offset: chunk.offset,
            id,
        });
        len = chunk.offset + chunk.data.len() as u64;
        written += chunk_written;
    }
    Ok((chunks, len, written))
}

/// Worker wrapper: converts soft per-file I/O errors into `Skipped` so one
/// unreadable file doesn't fail the whole backup. Chunks already stored
/// for a skipped file stay behind as unreferenced objects, which is
/// harmless in a content-addressed store.
fn process_entry(
    repo: &Repository,
    entry: WalkEntry,
    config: &ChunkerConfig,
    cancel: &AtomicBool,
) -> Result<ProcessedEntry> {
    match entry {
        WalkEntry::File {
            name,
            abs_path,
            meta,
        } => match process_file(repo, &abs_path, config, cancel) {
            Ok((chunks, len, written)) => Ok(ProcessedEntry::FileDone {
                name,
                meta,
                chunks,
                len,
                written,
            }),
            Err(e) if e.is_soft_file_error() => {
                warn!(path = %abs_path.display(), error = %e, "skipping unreadable file");
                Ok(ProcessedEntry::Skipped)
            }
            Err(e) => Err(e),
        },
        WalkEntry::Link { name, target, meta } => Ok(ProcessedEntry::Link { name, target, meta }),
        WalkEntry::EnterDir { name, meta } => Ok(ProcessedEntry::EnterDir { name, meta }),
        WalkEntry::LeaveDir => Ok(ProcessedEntry::LeaveDir),
        WalkEntry::Skipped => Ok(ProcessedEntry::Skipped),
    }
}

/// Directory being assembled while its children stream past.
struct DirBuilder {
    name: String,
    meta: Option<MetadataSummary>,
    entries: Vec<DirEntry>,
    logical: i64,
}

impl DirBuilder {
    fn root() -> Self {
        Self {
            name: String::new(),
            meta: None,
            entries: Vec::new(),
            logical: 0,
        }
    }
}

/// Apply one in-order entry to the directory stack, storing file,
/// link, and completed directory objects through the repository.
fn consume_entry(
    repo: &Repository,
    entry: ProcessedEntry,
    stack: &mut Vec<DirBuilder>,
    written: &mut u64,
    stats: &mut PutStats,
) -> Result<()> {
    match entry {
        ProcessedEntry::FileDone {
            name,
            meta,
            chunks,
            len,
            written: chunk_written,
        } => {
            *written += chunk_written;
            let file = Object::File(FileObject {
                len,
                content: FileContent::Chunks(chunks),
            });
            let (id, file_written) = repo.store_object(&file)?;
            *written += file_written;

            let top = stack.last_mut().expect("root builder always present");
            top.entries.push(DirEntry {
                name,
                kind: EntryKind::File,
                id,
                mode: meta.mode,
                mtime: meta.mtime_us,
                size: len as i64,
            });
            top.logical += len as i64;
            stats.files += 1;
        }
        ProcessedEntry::Link { name, target, meta } => {
            let (id, link_written) = repo.store_object(&Object::Link(LinkObject { target }))?;
            *written += link_written;

            let top = stack.last_mut().expect("root builder always present");
            top.entries.push(DirEntry {
                name,
                kind: EntryKind::Link,
                id,
                mode: meta.mode,
                mtime: meta.mtime_us,
                size: 0,
            });
            stats.links += 1;
        }
        ProcessedEntry::EnterDir { name, meta } => {
            stack.push(DirBuilder {
                name,
                meta: Some(meta),
                entries: Vec::new(),
                logical: 0,
            });
        }
        ProcessedEntry::LeaveDir => {
            if stack.len() < 2 {
                return Err(RekordError::Other("unbalanced directory walk".into()));
            }
            let builder = stack.pop().expect("checked above");
            let meta = builder.meta.expect("non-root builders carry metadata");
            let dir = Object::Directory(DirectoryObject {
                entries: builder.entries,
            });
            let (id, dir_written) = repo.store_object(&dir)?;
            *written += dir_written;

            let top = stack.last_mut().expect("root builder always present");
            top.entries.push(DirEntry {
                name: builder.name,
                kind: EntryKind::Directory,
                id,
                mode: meta.mode,
                mtime: meta.mtime_us,
                size: builder.logical,
            });
            top.logical += builder.logical;
            stats.dirs += 1;
        }
        ProcessedEntry::Skipped => {
            stats.skipped += 1;
        }
    }
    Ok(())
}

/// Run the parallel put pipeline.
///
/// Walk thread → bounded work channel → worker pool (chunk + hash +
/// encrypt + store) → bounded result channel → reorder buffer →
/// sequential consumer rebuilding the tree post-order.
pub(super) fn run_pipeline(
    repo: &Repository,
    paths: &[PathBuf],
    follow_symlinks: bool,
    num_workers: usize,
    cancel: &AtomicBool,
) -> Result<TreeResult> {
    debug_assert!(num_workers > 0, "num_workers must be non-zero");
    let config = ChunkerConfig::default();
    let channel_cap = num_workers * 2;

    std::thread::scope(|scope| {
        let (work_tx, work_rx) = crossbeam_channel::bounded::<(usize, WalkEntry)>(channel_cap);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<PipelineResult>(channel_cap);

        // --- Walk thread: enumerate entries in tree order ---
        let walk_result_tx = result_tx.clone();
        scope.spawn(move || {
            let mut seq = 0usize;
            let walk = walk_sources(paths, follow_symlinks, cancel, &mut |entry| {
                if work_tx.send((seq, entry)).is_err() {
                    // Workers and consumer are gone; stop walking.
                    return Err(RekordError::Interrupted);
                }
                seq += 1;
                Ok(())
            });
            if let Err(e) = walk {
                if !matches!(e, RekordError::Interrupted) {
                    let _ = walk_result_tx.send(PipelineResult::WalkErr(e));
                }
            }
            // work_tx drops here → workers drain remaining items and exit.
        });

        // --- Worker pool ---
        for _ in 0..num_workers {
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            let worker_config = config;
            scope.spawn(move || {
                for (seq, entry) in rx {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let msg = match process_entry(repo, entry, &worker_config, cancel) {
                        Ok(processed) => PipelineResult::Done(seq, Box::new(processed)),
                        Err(e) => PipelineResult::WorkerErr(seq, e),
                    };
                    if tx.send(msg).is_err() {
                        return; // Consumer gone.
                    }
                }
            });
        }
        // Drop originals so channels close when all clones drop.
        drop(work_rx);
        drop(result_tx);

        // --- Consumer: reorder to walk order and rebuild the tree ---
        let mut stack = vec![DirBuilder::root()];
        let mut written = 0u64;
        let mut stats = PutStats::default();
        let mut next_expected = 0usize;
        let mut pending: BTreeMap<usize, std::result::Result<ProcessedEntry, RekordError>> =
            BTreeMap::new();
        let mut first_err: Option<RekordError> = None;

        for msg in &result_rx {
            if cancel.load(Ordering::Relaxed) {
                first_err = Some(RekordError::Interrupted);
                break;
            }
            match msg {
                PipelineResult::Done(seq, entry) => {
                    pending.insert(seq, Ok(*entry));
                }
                PipelineResult::WorkerErr(seq, e) => {
                    pending.insert(seq, Err(e));
                }
                PipelineResult::WalkErr(e) => {
                    first_err = Some(e);
                    break;
                }
            }

            while let Some(result) = pending.remove(&next_expected) {
                next_expected += 1;
                match result {
                    Ok(entry) => {
                        if let Err(e) =
                            consume_entry(repo, entry, &mut stack, &mut written, &mut stats)
                        {
                            first_err = Some(e);
                            break;
                        }
                    }
                    Err(e) => {
                        first_err = Some(e);
                        break;
                    }
                }
            }
            if first_err.is_some() {
                break;
            }
        }

        // Unblock workers stuck on result_tx.send(), then let the scope
        // join them; in-flight blob writes complete before workers exit.
        drop(result_rx);

        if let Some(e) = first_err {
            return Err(e);
        }
        if cancel.load(Ordering::Relaxed) {
            return Err(RekordError::Interrupted);
        }
        if stack.len() != 1 {
            return Err(RekordError::Other("walk ended inside a directory".into()));
        }

        let root = stack.pop().expect("root builder always present");
        debug!(
            files = stats.files,
            dirs = stats.dirs,
            links = stats.links,
            skipped = stats.skipped,
            written,
            "put pipeline drained"
        );
        Ok(TreeResult {
            entries: root.entries,
            logical: root.logical,
            written,
            stats,
        })
    })
}
