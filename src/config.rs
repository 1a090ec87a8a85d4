use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the state directory under the working directory.
pub const STATE_DIR: &str = ".espejo";
pub const CONFIG_FILE: &str = "config.json";
pub const LOCK_FILE: &str = ".sync.lock";

/// Which slice of the remote the daemon manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncScope {
    Page { page_id: String },
    Subtree { ancestor_id: String },
    Space { space_key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Write conflict markers and wait for the user (default).
    #[default]
    Merge,
    /// Force-push the local side.
    Local,
    /// Force-pull the remote side.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub stale_high_months: u32,
    pub stale_medium_months: u32,
    pub stale_low_months: u32,
    pub required_label: Option<String>,
    pub churn_threshold: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stale_high_months: 12,
            stale_medium_months: 6,
            stale_low_months: 3,
            required_label: None,
            churn_threshold: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCheckConfig {
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for LinkCheckConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout_secs: 10,
            user_agent: format!("espejo-linkcheck/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub base_url: String,
    pub token: String,
    pub space_key: String,
    pub scope: SyncScope,
    pub workdir: PathBuf,
    pub state_dir: PathBuf,
    pub poll_interval_secs: u64,
    /// Webhook receiver port; None disables the embedded server.
    pub webhook_port: Option<u16>,
    /// Public URL of the receiver, registered with the remote when set.
    pub webhook_callback_url: Option<String>,
    pub conflict_policy: ConflictPolicy,
    /// Create remote pages for untracked local files on push.
    pub auto_create: bool,
    pub audit: AuditConfig,
    pub link_check: LinkCheckConfig,
}

/// The on-disk shape of `<state_dir>/config.json`. Everything is optional;
/// the environment fills the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigFile {
    base_url: Option<String>,
    space_key: Option<String>,
    scope: Option<SyncScope>,
    poll_interval_secs: Option<u64>,
    webhook_port: Option<u16>,
    webhook_callback_url: Option<String>,
    conflict_policy: Option<ConflictPolicy>,
    auto_create: Option<bool>,
    audit: Option<AuditConfig>,
    link_check: Option<LinkCheckConfig>,
}

impl SyncConfig {
    /// Loads `<workdir>/.espejo/config.json` (when present) with environment
    /// overrides, and validates the result. Called once at startup; a bad
    /// configuration never reaches steady state.
    pub fn load(workdir: &Path) -> Result<Self> {
        let state_dir = workdir.join(STATE_DIR);
        let file: ConfigFile = match std::fs::read_to_string(state_dir.join(CONFIG_FILE)) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| SyncError::Validation(format!("unreadable config.json: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(e) => return Err(SyncError::Validation(format!("cannot read config.json: {}", e))),
        };

        let base_url = env_or("ESPEJO_BASE_URL", file.base_url).ok_or_else(|| {
            SyncError::Validation("no base URL configured (set ESPEJO_BASE_URL)".to_string())
        })?;
        let token = std::env::var("ESPEJO_TOKEN").ok().filter(|t| !t.is_empty()).ok_or_else(
            || SyncError::Auth("no API token found; run `espejo login` first".to_string()),
        )?;
        let space_key = env_or("ESPEJO_SPACE", file.space_key)
            .ok_or_else(|| SyncError::Validation("no space key configured".to_string()))?;

        let scope = file
            .scope
            .unwrap_or_else(|| SyncScope::Space { space_key: space_key.clone() });

        let poll_interval_secs = env_parsed("ESPEJO_POLL_SECS")
            .or(file.poll_interval_secs)
            .unwrap_or(60);
        let webhook_port = env_parsed("ESPEJO_WEBHOOK_PORT").or(file.webhook_port);
        let webhook_callback_url =
            env_or("ESPEJO_WEBHOOK_CALLBACK", file.webhook_callback_url.clone());
        let auto_create = env_parsed("ESPEJO_AUTO_CREATE").or(file.auto_create).unwrap_or(false);

        let config = Self {
            base_url,
            token,
            space_key,
            scope,
            workdir: workdir.to_path_buf(),
            state_dir,
            poll_interval_secs,
            webhook_port,
            webhook_callback_url,
            conflict_policy: file.conflict_policy.unwrap_or_default(),
            auto_create,
            audit: file.audit.unwrap_or_default(),
            link_check: file.link_check.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SyncError::Validation(format!(
                "base URL must be http(s), got {}",
                self.base_url
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(SyncError::Validation("poll interval must be at least 1s".to_string()));
        }
        let a = &self.audit;
        if a.stale_low_months == 0
            || a.stale_medium_months < a.stale_low_months
            || a.stale_high_months < a.stale_medium_months
        {
            return Err(SyncError::Validation(format!(
                "stale thresholds must satisfy high >= medium >= low >= 1, got {}/{}/{}",
                a.stale_high_months, a.stale_medium_months, a.stale_low_months
            )));
        }
        if self.link_check.concurrency == 0 {
            return Err(SyncError::Validation("link check concurrency must be >= 1".to_string()));
        }
        match &self.scope {
            SyncScope::Page { page_id } if page_id.is_empty() => {
                Err(SyncError::Validation("page scope needs a page id".to_string()))
            }
            SyncScope::Subtree { ancestor_id } if ancestor_id.is_empty() => {
                Err(SyncError::Validation("subtree scope needs an ancestor id".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Writes the current settings back to `config.json` (pretty-printed so
    /// users can edit it by hand).
    pub fn persist(&self) -> Result<()> {
        let file = ConfigFile {
            base_url: Some(self.base_url.clone()),
            space_key: Some(self.space_key.clone()),
            scope: Some(self.scope.clone()),
            poll_interval_secs: Some(self.poll_interval_secs),
            webhook_port: self.webhook_port,
            webhook_callback_url: self.webhook_callback_url.clone(),
            conflict_policy: Some(self.conflict_policy),
            auto_create: Some(self.auto_create),
            audit: Some(self.audit.clone()),
            link_check: Some(self.link_check.clone()),
        };
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::write(
            self.state_dir.join(CONFIG_FILE),
            serde_json::to_string_pretty(&file)?,
        )?;
        Ok(())
    }
}

fn env_or(key: &str, fallback: Option<String>) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).or(fallback)
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
