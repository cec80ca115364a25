use thiserror::Error;

pub type Result<T> = std::result::Result<T, RekordError>;

#[derive(Debug, Error)]
pub enum RekordError {
    #[error("authentication failed: wrong password or corrupted data")]
    AuthenticationFailed,

    #[error("repository not found at '{0}'")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("unknown object type tag: {0}")]
    UnknownObjectType(u8),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("ambiguous ID prefix '{0}': matches multiple snapshots")]
    AmbiguousId(String),

    #[error("invalid ID '{0}': expected 64 hex characters or a prefix of at least 8")]
    InvalidId(String),

    #[error("cannot decrypt with write-only key")]
    WriteOnly,

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("index cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

impl RekordError {
    /// Returns `true` for per-entry I/O errors the put pipeline may skip
    /// with a warning (permission denied, file vanished mid-walk).
    pub fn is_soft_file_error(&self) -> bool {
        match self {
            RekordError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }
}
