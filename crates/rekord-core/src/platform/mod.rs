pub mod fs;

use std::path::PathBuf;

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(unix)]
pub fn home_dir() -> Option<PathBuf> {
    env_path("HOME").or_else(|| {
        use nix::unistd::{Uid, User};
        User::from_uid(Uid::effective())
            .ok()
            .flatten()
            .map(|u| u.dir)
    })
}

#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
    env_path("USERPROFILE")
}

/// Root directory for local caches (the index cache lives under it).
#[cfg(all(unix, not(target_os = "macos")))]
pub fn default_cache_dir() -> Option<PathBuf> {
    env_path("XDG_CACHE_HOME")
        .filter(|p| p.is_absolute())
        .or_else(|| home_dir().map(|h| h.join(".cache")))
}

#[cfg(target_os = "macos")]
pub fn default_cache_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join("Library").join("Caches"))
}

#[cfg(windows)]
pub fn default_cache_dir() -> Option<PathBuf> {
    env_path("LOCALAPPDATA")
}

/// Default pipeline worker count: at least 4, more on larger machines.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(4)
}

/// Raise the open-file-descriptor limit to at least `min` where the host
/// permits it. Parallel restores keep many output files open at once.
pub fn raise_fd_limit(min: u64) {
    #[cfg(unix)]
    {
        use nix::sys::resource::{getrlimit, setrlimit, Resource};

        match getrlimit(Resource::RLIMIT_NOFILE) {
            Ok((soft, hard)) if soft < min => {
                let target = min.min(hard);
                if let Err(e) = setrlimit(Resource::RLIMIT_NOFILE, target, hard) {
                    tracing::warn!("could not raise RLIMIT_NOFILE to {target}: {e}");
                } else if target < min {
                    tracing::warn!(
                        "maximum number of open descriptors is low: {target} (recommended: {min})"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("getrlimit(RLIMIT_NOFILE) failed: {e}"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = min;
    }
}
