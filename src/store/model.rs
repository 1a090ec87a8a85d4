//! Row types for the SQLite layer. Pure domain records live in
//! `crate::domain`; these mirror the physical columns and convert both ways.

use crate::domain::{
    Ancestor, ContentStatus, Contributor, LinkEdge, LinkKind, PageRecord, SyncStatus, UserRecord,
};
use chrono::NaiveDateTime;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DbPage {
    pub page_id: String,
    pub title: String,
    pub space_key: String,
    pub version: i64,
    pub parent_id: Option<String>,
    pub ancestors: String,
    pub content_status: String,
    pub is_restricted: bool,
    pub version_count: i64,
    pub created_by: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub modified_by: Option<String>,
    pub modified_at: Option<NaiveDateTime>,
    pub local_path: Option<String>,
    pub local_hash: Option<String>,
    pub base_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub sync_status: String,
    pub inaccessible_reason: Option<String>,
}

impl From<DbPage> for PageRecord {
    fn from(row: DbPage) -> Self {
        let ancestors: Vec<Ancestor> = serde_json::from_str(&row.ancestors).unwrap_or_default();
        PageRecord {
            page_id: row.page_id,
            title: row.title,
            space_key: row.space_key,
            version: row.version,
            parent_id: row.parent_id,
            ancestors,
            content_status: ContentStatus::parse(&row.content_status),
            is_restricted: row.is_restricted,
            version_count: row.version_count,
            created_by: row.created_by,
            created_at: row.created_at,
            modified_by: row.modified_by,
            modified_at: row.modified_at,
            local_path: row.local_path,
            local_hash: row.local_hash,
            base_hash: row.base_hash,
            remote_hash: row.remote_hash,
            sync_status: SyncStatus::parse(&row.sync_status),
            inaccessible_reason: row.inaccessible_reason,
        }
    }
}

/// JSON form of the ancestor chain as stored in the `ancestors` column.
pub fn ancestors_json(ancestors: &[Ancestor]) -> String {
    serde_json::to_string(ancestors).unwrap_or_else(|_| "[]".to_string())
}

/// LIKE pattern matching any chain that contains the given ancestor id.
pub fn ancestor_like_pattern(ancestor_id: &str) -> String {
    format!("%\"id\":\"{}\"%", ancestor_id)
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DbLink {
    pub source_id: String,
    pub target_id: Option<String>,
    pub target: String,
    pub kind: String,
    pub text: String,
    pub line: i64,
    pub is_broken: bool,
    pub discovered_at: NaiveDateTime,
}

impl From<DbLink> for LinkEdge {
    fn from(row: DbLink) -> Self {
        LinkEdge {
            source_id: row.source_id,
            target_id: row.target_id,
            target: row.target,
            kind: LinkKind::parse(&row.kind),
            text: row.text,
            line: row.line,
            is_broken: row.is_broken,
            discovered_at: row.discovered_at,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DbUser {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub checked_at: Option<NaiveDateTime>,
}

impl From<DbUser> for UserRecord {
    fn from(row: DbUser) -> Self {
        UserRecord {
            user_id: row.user_id,
            display_name: row.display_name,
            email: row.email,
            is_active: row.is_active,
            checked_at: row.checked_at,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DbContributor {
    pub page_id: String,
    pub user_id: String,
    pub contributions: i64,
    pub last_contributed_at: Option<NaiveDateTime>,
}

impl From<DbContributor> for Contributor {
    fn from(row: DbContributor) -> Self {
        Contributor {
            page_id: row.page_id,
            user_id: row.user_id,
            contributions: row.contributions,
            last_contributed_at: row.last_contributed_at,
        }
    }
}
