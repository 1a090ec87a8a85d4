//! The audit engine: a read-only consumer of the state store (plus, when
//! connected, the remote) that turns the index into structured findings.
//! Output is plain data; rendering belongs to the formatters.

pub mod linkcheck;

pub use self::linkcheck::{LinkCheckResult, LinkChecker};

use crate::config::AuditConfig;
use crate::domain::{ContentStatus, LinkEdge, PageRecord};
use crate::error::Result;
use crate::remote::RemoteClient;
use crate::store::{PageFilter, StateStore};
use chrono::{Months, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StaleSeverity {
    Low,
    Medium,
    High,
}

/// Narrowing applied before any check runs; independent of the checks
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct AuditScope {
    pub with_label: Option<String>,
    pub under_ancestor: Option<String>,
    pub exclude_label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    pub scope: AuditScope,
    /// HTTP-validate external links on top of the standard checks.
    pub validate_external_links: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub page_id: String,
    pub title: String,
    pub path: Option<String>,
}

impl From<&PageRecord> for PageRef {
    fn from(page: &PageRecord) -> Self {
        Self {
            page_id: page.page_id.clone(),
            title: page.title.clone(),
            path: page.local_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleFinding {
    #[serde(flatten)]
    pub page: PageRef,
    pub last_modified: NaiveDateTime,
    pub months_since: i64,
    pub severity: StaleSeverity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "risk", rename_all = "kebab-case")]
pub enum ContributorRisk {
    /// Exactly one person has ever touched the page.
    BusFactor { user_id: String },
    /// Every known contributor is inactive (unknown activity does not flag).
    NoMaintainer { contributor_count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContributorFinding {
    #[serde(flatten)]
    pub page: PageRef,
    #[serde(flatten)]
    pub risk: ContributorRisk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsyncedFinding {
    pub page_id: String,
    pub title: String,
    pub remote_version: i64,
    pub severity: Option<StaleSeverity>,
}

/// Everything one audit run produced. Serializable as-is for the JSON
/// formatter; the table and markdown formatters walk the fields.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AuditReport {
    pub stale: Vec<StaleFinding>,
    pub orphans: Vec<PageRef>,
    pub broken_links: Vec<LinkEdge>,
    pub contributor_risks: Vec<ContributorFinding>,
    /// External links grouped by host, in host order.
    pub external_links: BTreeMap<String, Vec<LinkEdge>>,
    pub missing_label: Vec<PageRef>,
    pub restricted: Vec<PageRef>,
    pub drafts: Vec<PageRef>,
    pub archived: Vec<PageRef>,
    pub high_churn: Vec<PageRef>,
    pub unsynced: Vec<UnsyncedFinding>,
    /// Filled only when external validation ran.
    pub link_check: Option<HashMap<String, LinkCheckResult>>,
    pub user_cache_oldest_check: Option<NaiveDateTime>,
}

pub struct AuditEngine {
    store: Arc<dyn StateStore>,
    /// Present when the daemon is connected; enables the unsynced check.
    remote: Option<Arc<dyn RemoteClient>>,
    config: AuditConfig,
    link_check: crate::config::LinkCheckConfig,
    scope: crate::config::SyncScope,
}

impl AuditEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        remote: Option<Arc<dyn RemoteClient>>,
        config: &crate::config::SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            config: config.audit.clone(),
            link_check: config.link_check.clone(),
            scope: config.scope.clone(),
        }
    }

    pub async fn run(&self, options: &AuditOptions) -> Result<AuditReport> {
        let now = Utc::now().naive_utc();
        let in_scope = self.scoped_page_ids(&options.scope).await?;

        let mut broken_links = self.store.broken_links().await?;
        let mut external = self.store.external_links(None).await?;
        if let Some(set) = in_scope.as_ref() {
            broken_links.retain(|l| set.contains(&l.source_id));
            external.retain(|l| set.contains(&l.source_id));
        }

        let mut report = AuditReport {
            stale: self.check_stale(now, in_scope.as_ref()).await?,
            orphans: self
                .filter_pages(self.store.orphaned_pages().await?, in_scope.as_ref())
                .iter()
                .map(PageRef::from)
                .collect(),
            broken_links,
            contributor_risks: self.check_contributors(in_scope.as_ref()).await?,
            external_links: group_by_host(external),
            missing_label: self.check_missing_label(in_scope.as_ref()).await?,
            restricted: self
                .refs_for_filter(PageFilter { restricted: Some(true), ..Default::default() }, in_scope.as_ref())
                .await?,
            drafts: self
                .refs_for_filter(
                    PageFilter { content_status: Some(ContentStatus::Draft), ..Default::default() },
                    in_scope.as_ref(),
                )
                .await?,
            archived: self
                .refs_for_filter(
                    PageFilter {
                        content_status: Some(ContentStatus::Archived),
                        ..Default::default()
                    },
                    in_scope.as_ref(),
                )
                .await?,
            high_churn: self
                .refs_for_filter(
                    PageFilter {
                        min_version_count: Some(self.config.churn_threshold),
                        ..Default::default()
                    },
                    in_scope.as_ref(),
                )
                .await?,
            unsynced: self.check_unsynced(now, &options.scope).await?,
            link_check: None,
            user_cache_oldest_check: self.store.oldest_user_check().await?,
        };

        if options.validate_external_links {
            let checker = LinkChecker::new(&self.link_check)?;
            let urls = report
                .external_links
                .values()
                .flatten()
                .map(|l| l.target.clone())
                .collect::<Vec<_>>();
            report.link_check = Some(checker.check_all(urls).await);
        }

        Ok(report)
    }

    /// Resolves the scope filters into the set of admissible page ids, or
    /// None when the audit is unscoped.
    async fn scoped_page_ids(&self, scope: &AuditScope) -> Result<Option<HashSet<String>>> {
        if scope.with_label.is_none()
            && scope.under_ancestor.is_none()
            && scope.exclude_label.is_none()
        {
            return Ok(None);
        }

        let mut admissible: HashSet<String> = match (&scope.with_label, &scope.under_ancestor) {
            (Some(label), _) => self
                .store
                .pages_with_label(label)
                .await?
                .into_iter()
                .map(|p| p.page_id)
                .collect(),
            (None, _) => self.store.all_page_ids().await?.into_iter().collect(),
        };

        if let Some(ancestor) = &scope.under_ancestor {
            let under: HashSet<String> = self
                .store
                .list_pages(&PageFilter {
                    ancestor_id: Some(ancestor.clone()),
                    ..Default::default()
                })
                .await?
                .into_iter()
                .map(|p| p.page_id)
                .collect();
            admissible.retain(|id| under.contains(id));
        }

        if let Some(label) = &scope.exclude_label {
            for page in self.store.pages_with_label(label).await? {
                admissible.remove(&page.page_id);
            }
        }

        Ok(Some(admissible))
    }

    fn filter_pages(
        &self,
        pages: Vec<PageRecord>,
        in_scope: Option<&HashSet<String>>,
    ) -> Vec<PageRecord> {
        match in_scope {
            None => pages,
            Some(set) => pages.into_iter().filter(|p| set.contains(&p.page_id)).collect(),
        }
    }

    async fn refs_for_filter(
        &self,
        filter: PageFilter,
        in_scope: Option<&HashSet<String>>,
    ) -> Result<Vec<PageRef>> {
        let pages = self.filter_pages(self.store.list_pages(&filter).await?, in_scope);
        Ok(pages.iter().map(PageRef::from).collect())
    }

    /// Stale detection with the mandatory store-side prefilter: only pages
    /// older than the lowest threshold are even fetched.
    async fn check_stale(
        &self,
        now: NaiveDateTime,
        in_scope: Option<&HashSet<String>>,
    ) -> Result<Vec<StaleFinding>> {
        let cutoff = now
            .checked_sub_months(Months::new(self.config.stale_low_months))
            .unwrap_or(now);
        let candidates = self
            .store
            .list_pages(&PageFilter { modified_before: Some(cutoff), ..Default::default() })
            .await?;

        let mut findings = Vec::new();
        for page in self.filter_pages(candidates, in_scope) {
            let modified = match page.modified_at {
                Some(modified) => modified,
                None => continue,
            };
            let months = months_between(modified, now);
            let severity = self.classify_stale(months);
            if let Some(severity) = severity {
                findings.push(StaleFinding {
                    page: PageRef::from(&page),
                    last_modified: modified,
                    months_since: months,
                    severity,
                });
            }
        }
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.months_since.cmp(&a.months_since)));
        Ok(findings)
    }

    /// Highest matching threshold wins.
    fn classify_stale(&self, months: i64) -> Option<StaleSeverity> {
        if months >= self.config.stale_high_months as i64 {
            Some(StaleSeverity::High)
        } else if months >= self.config.stale_medium_months as i64 {
            Some(StaleSeverity::Medium)
        } else if months >= self.config.stale_low_months as i64 {
            Some(StaleSeverity::Low)
        } else {
            None
        }
    }

    /// Bus factor and no-maintainer, mutually exclusive by construction.
    async fn check_contributors(
        &self,
        in_scope: Option<&HashSet<String>>,
    ) -> Result<Vec<ContributorFinding>> {
        let pages = self.filter_pages(self.store.list_pages(&PageFilter::default()).await?, in_scope);

        let mut findings = Vec::new();
        for page in &pages {
            let contributors = self.store.page_contributors(&page.page_id).await?;
            if contributors.is_empty() {
                continue;
            }
            if contributors.len() == 1 {
                findings.push(ContributorFinding {
                    page: PageRef::from(page),
                    risk: ContributorRisk::BusFactor {
                        user_id: contributors[0].user_id.clone(),
                    },
                });
                continue;
            }

            // flags only when every contributor is *known* inactive
            let mut all_inactive = true;
            for contributor in &contributors {
                match self.store.get_user(&contributor.user_id).await? {
                    Some(user) if user.is_active == Some(false) => {}
                    _ => {
                        all_inactive = false;
                        break;
                    }
                }
            }
            if all_inactive {
                findings.push(ContributorFinding {
                    page: PageRef::from(page),
                    risk: ContributorRisk::NoMaintainer {
                        contributor_count: contributors.len(),
                    },
                });
            }
        }
        Ok(findings)
    }

    async fn check_missing_label(
        &self,
        in_scope: Option<&HashSet<String>>,
    ) -> Result<Vec<PageRef>> {
        let required = match &self.config.required_label {
            Some(label) => label,
            None => return Ok(Vec::new()),
        };
        let labeled: HashSet<String> = self
            .store
            .pages_with_label(required)
            .await?
            .into_iter()
            .map(|p| p.page_id)
            .collect();

        let pages = self.filter_pages(self.store.list_pages(&PageFilter::default()).await?, in_scope);
        Ok(pages
            .iter()
            .filter(|p| !labeled.contains(&p.page_id))
            .map(PageRef::from)
            .collect())
    }

    /// Remote pages in scope that the store has never seen, stale-classified
    /// the same way local pages are. Needs a connected remote. The audit
    /// scope narrows these too: ancestor containment is reconstructed from
    /// the remote listing itself (there are no store records to consult),
    /// and label narrowing uses the fetched page's own labels.
    async fn check_unsynced(
        &self,
        now: NaiveDateTime,
        scope: &AuditScope,
    ) -> Result<Vec<UnsyncedFinding>> {
        let remote = match &self.remote {
            Some(remote) => remote,
            None => return Ok(Vec::new()),
        };

        let summaries = match remote.list_pages(&self.scope).await {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!(error = %e, "unsynced check skipped, remote listing failed");
                return Ok(Vec::new());
            }
        };
        let known: HashSet<String> = self.store.all_page_ids().await?.into_iter().collect();
        let parents: HashMap<String, Option<String>> = summaries
            .iter()
            .map(|s| (s.id.clone(), s.parent_id.clone()))
            .collect();

        let mut findings = Vec::new();
        for summary in summaries {
            if known.contains(&summary.id) {
                continue;
            }
            if let Some(ancestor) = &scope.under_ancestor {
                if !has_remote_ancestor(&parents, &summary.id, ancestor) {
                    continue;
                }
            }

            debug!(page_id = %summary.id, "remote-only page");
            let page = remote.get_page(&summary.id).await.ok();

            // a page whose labels cannot be fetched cannot be confirmed as
            // carrying the required label, so it drops out; the exclusion
            // filter errs the other way and keeps it
            match (&scope.with_label, &page) {
                (Some(label), Some(page)) if !page.labels.contains(label) => continue,
                (Some(_), None) => continue,
                _ => {}
            }
            if let (Some(label), Some(page)) = (&scope.exclude_label, &page) {
                if page.labels.contains(label) {
                    continue;
                }
            }

            let severity = page
                .as_ref()
                .and_then(|p| p.modified_at)
                .and_then(|m| self.classify_stale(months_between(m, now)));
            findings.push(UnsyncedFinding {
                page_id: summary.id,
                title: summary.title,
                remote_version: summary.version,
                severity,
            });
        }
        Ok(findings)
    }
}

/// Walks the parent chain reconstructed from a remote listing. Bounded by
/// the listing size so a corrupt chain cannot loop forever.
fn has_remote_ancestor(
    parents: &HashMap<String, Option<String>>,
    id: &str,
    ancestor: &str,
) -> bool {
    let mut current = parents.get(id).cloned().flatten();
    let mut hops = 0;
    while let Some(parent) = current {
        if parent == ancestor {
            return true;
        }
        hops += 1;
        if hops > parents.len() {
            break;
        }
        current = parents.get(&parent).cloned().flatten();
    }
    false
}

/// Whole months elapsed between two instants.
pub fn months_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    use chrono::Datelike;
    let mut months = (to.year() as i64 - from.year() as i64) * 12
        + (to.month() as i64 - from.month() as i64);
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0)
}

fn group_by_host(links: Vec<LinkEdge>) -> BTreeMap<String, Vec<LinkEdge>> {
    let mut groups: BTreeMap<String, Vec<LinkEdge>> = BTreeMap::new();
    for link in links {
        groups.entry(host_of(&link.target)).or_default().push(link);
    }
    groups
}

fn host_of(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}
