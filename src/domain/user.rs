use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Cached remote user. `is_active = None` means we never got an answer from
/// the remote; audits treat it as unknown, not inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub checked_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub page_id: String,
    pub user_id: String,
    pub contributions: i64,
    pub last_contributed_at: Option<NaiveDateTime>,
}
