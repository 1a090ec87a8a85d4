//! Concurrent validation of external links. HEAD first, GET when the server
//! refuses HEAD, auth walls are not dead links, and network failures are
//! classified rather than aborting the audit.

use crate::config::LinkCheckConfig;
use crate::error::{Result, SyncError};
use futures_util::future::join_all;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkCheckResult {
    /// HTTP status when a response arrived; None for network failures.
    pub status: Option<u16>,
    /// Classified failure when no response arrived.
    pub error: Option<String>,
    pub is_broken: bool,
}

pub struct LinkChecker {
    client: Client,
    concurrency: usize,
}

impl LinkChecker {
    pub fn new(config: &LinkCheckConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Validation(format!("link check client setup failed: {}", e)))?;
        Ok(Self { client, concurrency: config.concurrency.max(1) })
    }

    /// Deduplicates and checks every URL, `concurrency` at a time.
    pub async fn check_all<I>(&self, urls: I) -> HashMap<String, LinkCheckResult>
    where
        I: IntoIterator<Item = String>,
    {
        let unique: Vec<String> = {
            let mut seen = HashSet::new();
            urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
        };

        let mut results = HashMap::with_capacity(unique.len());
        for batch in unique.chunks(self.concurrency) {
            let checks = join_all(batch.iter().map(|url| self.check_one(url))).await;
            for (url, result) in batch.iter().zip(checks) {
                results.insert(url.clone(), result);
            }
        }
        results
    }

    async fn check_one(&self, url: &str) -> LinkCheckResult {
        debug!(url, "checking external link");
        let head = self.client.head(url).send().await;
        match head {
            Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                // the server refuses HEAD; ask properly
                match self.client.get(url).send().await {
                    Ok(response) => classify_status(response.status()),
                    Err(e) => classify_error(&e),
                }
            }
            Ok(response) => classify_status(response.status()),
            Err(e) => classify_error(&e),
        }
    }
}

fn classify_status(status: StatusCode) -> LinkCheckResult {
    let code = status.as_u16();
    // 401/403 mean an auth wall, not a dead link
    let is_broken = (400..=599).contains(&code) && code != 401 && code != 403;
    LinkCheckResult { status: Some(code), error: None, is_broken }
}

fn classify_error(error: &reqwest::Error) -> LinkCheckResult {
    let message = if error.is_timeout() {
        "Timeout".to_string()
    } else {
        classify_error_message(&format!("{:?}", error))
    };
    LinkCheckResult { status: None, error: Some(message), is_broken: true }
}

/// Maps a transport error message onto the small set of causes operators
/// actually act on.
pub fn classify_error_message(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        "Timeout"
    } else if lower.contains("dns")
        || lower.contains("name or service not known")
        || lower.contains("failed to lookup")
    {
        "DNS lookup failed"
    } else if lower.contains("connection refused") {
        "Connection refused"
    } else if lower.contains("connection reset") {
        "Connection reset"
    } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
        "SSL error"
    } else {
        "Connection failed"
    }
    .to_string()
}
