use std::fs::{FileType, Metadata};
use std::path::Path;

/// The slice of filesystem metadata a snapshot records per entry.
#[derive(Debug, Clone, Copy)]
pub struct MetadataSummary {
    pub mode: u32,
    /// Modification time in microseconds since the Unix epoch.
    pub mtime_us: i64,
    pub size: u64,
}

pub fn summarize_metadata(metadata: &Metadata, file_type: &FileType) -> MetadataSummary {
    #[cfg(unix)]
    {
        let _ = file_type;
        use std::os::unix::fs::MetadataExt;

        MetadataSummary {
            mode: metadata.mode() & 0o7777,
            mtime_us: metadata.mtime() * 1_000_000 + metadata.mtime_nsec() / 1_000,
            size: metadata.len(),
        }
    }

    #[cfg(not(unix))]
    {
        use std::time::UNIX_EPOCH;

        let readonly = metadata.permissions().readonly();
        let mode = if file_type.is_dir() {
            if readonly {
                0o555
            } else {
                0o755
            }
        } else if readonly {
            0o444
        } else {
            0o644
        };
        let mtime_us = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);

        MetadataSummary {
            mode,
            mtime_us,
            size: metadata.len(),
        }
    }
}

/// Apply permission bits. On hosts without Unix permissions this degrades
/// to the read-only bit.
pub fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_readonly((mode & 0o200) == 0);
        std::fs::set_permissions(path, perms)
    }
}

pub fn create_symlink(link_target: &Path, target: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(link_target, target)
    }

    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(link_target, target)
            .or_else(|_| std::os::windows::fs::symlink_dir(link_target, target))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (link_target, target);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlink creation is not supported on this platform",
        ))
    }
}

/// Set a path's modification time from Unix microseconds.
pub fn set_file_mtime(path: &Path, mtime_us: i64) -> std::io::Result<()> {
    let secs = mtime_us.div_euclid(1_000_000);
    let micros = mtime_us.rem_euclid(1_000_000);

    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains null")
        })?;
        let times = [
            libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            },
            libc::timespec {
                tv_sec: secs as _,
                tv_nsec: (micros * 1_000) as _,
            },
        ];
        if unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) } == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    {
        use std::fs::FileTimes;
        use std::time::{Duration, SystemTime};

        let time = if secs >= 0 {
            SystemTime::UNIX_EPOCH + Duration::new(secs as u64, (micros * 1_000) as u32)
        } else {
            SystemTime::UNIX_EPOCH - Duration::new(secs.unsigned_abs(), 0)
                + Duration::new(0, (micros * 1_000) as u32)
        };
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_times(FileTimes::new().set_modified(time))
    }
}
