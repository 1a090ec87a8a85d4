use chrono::NaiveDateTime;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// One ancestor on the chain from the space root down to the parent.
/// Titles ride along because filesystem paths are derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ancestor {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[display("current")]
    Current,
    #[display("draft")]
    Draft,
    #[display("archived")]
    Archived,
}

impl ContentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "draft" => ContentStatus::Draft,
            "archived" => ContentStatus::Archived,
            _ => ContentStatus::Current,
        }
    }
}

/// Where a page stands relative to its last synced baseline. Closed set;
/// every reconciliation dispatch matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    #[display("synced")]
    Synced,
    #[display("local-modified")]
    LocalModified,
    #[display("remote-modified")]
    RemoteModified,
    #[display("conflict")]
    Conflict,
    #[display("unsynced")]
    Unsynced,
    #[display("untracked")]
    Untracked,
}

impl SyncStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "synced" => SyncStatus::Synced,
            "local-modified" => SyncStatus::LocalModified,
            "remote-modified" => SyncStatus::RemoteModified,
            "conflict" => SyncStatus::Conflict,
            "untracked" => SyncStatus::Untracked,
            _ => SyncStatus::Unsynced,
        }
    }

    /// Classifies from the three fingerprints. `None` means the side does
    /// not exist: no local file is unsynced, no remote page is untracked.
    pub fn classify(
        local: Option<&str>,
        base: Option<&str>,
        remote: Option<&str>,
    ) -> SyncStatus {
        let (local, remote) = match (local, remote) {
            (None, _) => return SyncStatus::Unsynced,
            (_, None) => return SyncStatus::Untracked,
            (Some(l), Some(r)) => (l, r),
        };

        // With no baseline recorded, equality is the only signal left.
        let base = match base {
            Some(b) => b,
            None => {
                return if local == remote {
                    SyncStatus::Synced
                } else {
                    SyncStatus::Conflict
                };
            }
        };

        match (local == base, base == remote) {
            (true, true) => SyncStatus::Synced,
            (false, true) => SyncStatus::LocalModified,
            (true, false) => SyncStatus::RemoteModified,
            (false, false) => SyncStatus::Conflict,
        }
    }
}

/// Everything the store tracks about one remote page. The working file on
/// disk and the base snapshot live outside this record; the three hashes
/// tie the trio together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_id: String,
    pub title: String,
    pub space_key: String,
    pub version: i64,
    pub parent_id: Option<String>,
    /// Root first, parent last. Never cyclic.
    pub ancestors: Vec<Ancestor>,
    pub content_status: ContentStatus,
    pub is_restricted: bool,
    pub version_count: i64,
    pub created_by: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub modified_by: Option<String>,
    pub modified_at: Option<NaiveDateTime>,
    /// Relative POSIX path of the working file, when one exists.
    pub local_path: Option<String>,
    pub local_hash: Option<String>,
    pub base_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub sync_status: SyncStatus,
    /// Set when the remote permanently rejected this page (404). Sync stops
    /// until the user intervenes.
    pub inaccessible_reason: Option<String>,
}

impl PageRecord {
    pub fn new(page_id: impl Into<String>, title: impl Into<String>, space_key: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            title: title.into(),
            space_key: space_key.into(),
            version: 0,
            parent_id: None,
            ancestors: Vec::new(),
            content_status: ContentStatus::Current,
            is_restricted: false,
            version_count: 0,
            created_by: None,
            created_at: None,
            modified_by: None,
            modified_at: None,
            local_path: None,
            local_hash: None,
            base_hash: None,
            remote_hash: None,
            sync_status: SyncStatus::Unsynced,
            inaccessible_reason: None,
        }
    }

    pub fn refresh_sync_status(&mut self) {
        self.sync_status = SyncStatus::classify(
            self.local_hash.as_deref(),
            self.base_hash.as_deref(),
            self.remote_hash.as_deref(),
        );
    }
}
