use derive_more::Display;

/// Uniform shape for everything the poller and the webhook receiver emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    pub page_id: String,
    pub kind: RemoteEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RemoteEventKind {
    #[display("created")]
    Created,
    #[display("changed")]
    Changed,
    /// Observed and surfaced only; local files are never auto-deleted.
    #[display("deleted")]
    Deleted,
}

/// Every reconciliation step resolves to exactly one of these. Errors are
/// events too; they never take the daemon down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Pull { page_id: String, path: String },
    Push { page_id: String, path: String },
    Conflict { page_id: String, reason: String },
    Error { page_id: Option<String>, message: String },
    Status { message: String },
}
