use chrono::NaiveDateTime;
use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    #[display("internal")]
    Internal,
    #[display("external")]
    External,
    #[display("attachment")]
    Attachment,
}

impl LinkKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "external" => LinkKind::External,
            "attachment" => LinkKind::Attachment,
            _ => LinkKind::Internal,
        }
    }
}

/// One outgoing edge discovered in a page body. Rebuilt wholesale on every
/// successful pull of the source page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub source_id: String,
    /// Resolved page id for internal links; None for external, attachment,
    /// and broken targets.
    pub target_id: Option<String>,
    /// The raw destination: a URL or a relative path.
    pub target: String,
    pub kind: LinkKind,
    pub text: String,
    /// 1-based line in the source Markdown.
    pub line: i64,
    pub is_broken: bool,
    pub discovered_at: NaiveDateTime,
}
