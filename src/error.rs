use std::path::PathBuf;

/// One variant per failure policy. Reconciliation steps return these instead
/// of throwing; only startup-time validation and signal handling terminate
/// the daemon.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("authentication required: {0}")]
    Auth(String),

    /// Network errors and 5xx responses. The next tick retries.
    #[error("remote temporarily unavailable: {0}")]
    RemoteTransient(String),

    /// 404 on a page we expected. Attempts stop until the user intervenes.
    #[error("page {page_id} is not reachable on the remote: {reason}")]
    RemotePermanent { page_id: String, reason: String },

    /// A merge was needed but no base snapshot exists. Surfaced as a
    /// conflict, never guessed around.
    #[error("no base content recorded for page {0}; cannot merge")]
    MergeBaseMissing(String),

    /// Push attempted while the file still carries conflict markers.
    #[error("{path:?} still contains conflict markers")]
    UnresolvedConflict { page_id: String, path: PathBuf },

    #[error("attachment {filename} failed to upload: {reason}")]
    Attachment { filename: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("file watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Fatal errors abort startup; everything else is logged, skipped, and
    /// retried by the next event or poll tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Validation(_) | SyncError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
