//! The audit engine against a hand-populated store: stale severities,
//! orphan and contributor rules, scope filters, and the unsynced check.

use crate::audit::{AuditEngine, AuditOptions, AuditScope, ContributorRisk, StaleSeverity};
use crate::domain::{Contributor, LinkEdge, LinkKind, PageRecord, UserRecord};
use crate::store::{SqliteStore, StateStore};
use crate::tests::support::{remote_page, test_config, MockRemote};
use chrono::{Months, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;

async fn setup_audit() -> (Arc<SqliteStore>, AuditEngine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = Arc::new(SqliteStore::new(pool, dir.path().to_path_buf()));
    store.init().await.unwrap();

    let config = test_config(dir.path());
    let engine = AuditEngine::new(store.clone(), None, &config);
    (store, engine, dir)
}

fn page_modified_months_ago(id: &str, title: &str, months: u32) -> PageRecord {
    let mut record = PageRecord::new(id, title, "DOC");
    record.modified_at = Utc::now()
        .naive_utc()
        .checked_sub_months(Months::new(months))
        .map(|dt| dt - chrono::Duration::days(2));
    record
}

// 6. Three pages last modified 14, 7 and 4 months ago with thresholds
// 12/6/3: exactly one finding per severity, highest threshold winning.
#[tokio::test]
async fn test_stale_severity_classification() {
    let (store, engine, _dir) = setup_audit().await;

    store.upsert_page(&page_modified_months_ago("ancient", "Ancient", 14)).await.unwrap();
    store.upsert_page(&page_modified_months_ago("aging", "Aging", 7)).await.unwrap();
    store.upsert_page(&page_modified_months_ago("drifting", "Drifting", 4)).await.unwrap();
    store.upsert_page(&page_modified_months_ago("current", "Current", 1)).await.unwrap();

    let report = engine.run(&AuditOptions::default()).await.unwrap();

    assert_eq!(report.stale.len(), 3);
    let severity_of = |id: &str| {
        report.stale.iter().find(|f| f.page.page_id == id).map(|f| f.severity)
    };
    assert_eq!(severity_of("ancient"), Some(StaleSeverity::High));
    assert_eq!(severity_of("aging"), Some(StaleSeverity::Medium));
    assert_eq!(severity_of("drifting"), Some(StaleSeverity::Low));
    assert_eq!(severity_of("current"), None);
}

#[tokio::test]
async fn test_orphans_and_broken_links_in_report() {
    let (store, engine, _dir) = setup_audit().await;

    store.upsert_page(&PageRecord::new("alone", "Alone", "DOC")).await.unwrap();
    let mut child = PageRecord::new("child", "Child", "DOC");
    child.parent_id = Some("alone".into());
    store.upsert_page(&child).await.unwrap();

    store
        .set_page_links(
            "child",
            &[LinkEdge {
                source_id: "child".into(),
                target_id: None,
                target: "nowhere.md".into(),
                kind: LinkKind::Internal,
                text: "dead".into(),
                line: 3,
                is_broken: true,
                discovered_at: Utc::now().naive_utc(),
            }],
        )
        .await
        .unwrap();

    let report = engine.run(&AuditOptions::default()).await.unwrap();

    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].page_id, "alone");
    assert_eq!(report.broken_links.len(), 1);
    assert_eq!(report.broken_links[0].target, "nowhere.md");
}

// bus factor and no-maintainer never overlap on one page
#[tokio::test]
async fn test_contributor_risks_are_exclusive() {
    let (store, engine, _dir) = setup_audit().await;

    let inactive = |id: &str| UserRecord {
        user_id: id.to_string(),
        display_name: id.to_string(),
        email: None,
        is_active: Some(false),
        checked_at: Some(Utc::now().naive_utc()),
    };
    store.upsert_user(&inactive("gone1")).await.unwrap();
    store.upsert_user(&inactive("gone2")).await.unwrap();
    store
        .upsert_user(&UserRecord {
            user_id: "unknown".into(),
            display_name: "Unknown".into(),
            email: None,
            is_active: None,
            checked_at: None,
        })
        .await
        .unwrap();

    let contributor = |page: &str, user: &str| Contributor {
        page_id: page.to_string(),
        user_id: user.to_string(),
        contributions: 1,
        last_contributed_at: None,
    };

    // single contributor, even an inactive one: bus factor only
    store.upsert_page(&PageRecord::new("solo", "Solo", "DOC")).await.unwrap();
    store.set_page_contributors("solo", &[contributor("solo", "gone1")]).await.unwrap();

    // several contributors, all known inactive: no maintainer
    store.upsert_page(&PageRecord::new("dead", "Dead", "DOC")).await.unwrap();
    store
        .set_page_contributors("dead", &[contributor("dead", "gone1"), contributor("dead", "gone2")])
        .await
        .unwrap();

    // unknown activity does not flag
    store.upsert_page(&PageRecord::new("maybe", "Maybe", "DOC")).await.unwrap();
    store
        .set_page_contributors(
            "maybe",
            &[contributor("maybe", "gone1"), contributor("maybe", "unknown")],
        )
        .await
        .unwrap();

    let report = engine.run(&AuditOptions::default()).await.unwrap();

    let risks_for = |id: &str| {
        report
            .contributor_risks
            .iter()
            .filter(|f| f.page.page_id == id)
            .collect::<Vec<_>>()
    };

    let solo = risks_for("solo");
    assert_eq!(solo.len(), 1);
    assert!(matches!(solo[0].risk, ContributorRisk::BusFactor { .. }));

    let dead = risks_for("dead");
    assert_eq!(dead.len(), 1);
    assert!(matches!(dead[0].risk, ContributorRisk::NoMaintainer { contributor_count: 2 }));

    assert!(risks_for("maybe").is_empty());

    // exclusivity over the whole report
    for finding in &report.contributor_risks {
        let count = report
            .contributor_risks
            .iter()
            .filter(|f| f.page.page_id == finding.page.page_id)
            .count();
        assert_eq!(count, 1, "one risk per page at most");
    }
}

#[tokio::test]
async fn test_missing_label_and_churn() {
    let (store, _, dir) = setup_audit().await;

    let mut config = test_config(dir.path());
    config.audit.required_label = Some("reviewed".to_string());
    config.audit.churn_threshold = 10;
    let engine = AuditEngine::new(store.clone(), None, &config);

    store.upsert_page(&PageRecord::new("tagged", "Tagged", "DOC")).await.unwrap();
    store.set_page_labels("tagged", &["reviewed".to_string()]).await.unwrap();

    let mut churny = PageRecord::new("busy", "Busy", "DOC");
    churny.version_count = 25;
    store.upsert_page(&churny).await.unwrap();

    let report = engine.run(&AuditOptions::default()).await.unwrap();

    let missing: Vec<&str> =
        report.missing_label.iter().map(|p| p.page_id.as_str()).collect();
    assert!(!missing.contains(&"tagged"));
    assert!(missing.contains(&"busy"));

    assert_eq!(report.high_churn.len(), 1);
    assert_eq!(report.high_churn[0].page_id, "busy");
}

#[tokio::test]
async fn test_scope_filters_narrow_every_check() {
    let (store, _, dir) = setup_audit().await;
    let config = test_config(dir.path());
    let engine = AuditEngine::new(store.clone(), None, &config);

    // two stale orphans, one of them excluded by label
    store.upsert_page(&page_modified_months_ago("keep", "Keep", 14)).await.unwrap();
    store.upsert_page(&page_modified_months_ago("skip", "Skip", 14)).await.unwrap();
    store.set_page_labels("skip", &["archive-me".to_string()]).await.unwrap();

    let options = AuditOptions {
        scope: AuditScope {
            exclude_label: Some("archive-me".to_string()),
            ..Default::default()
        },
        validate_external_links: false,
    };
    let report = engine.run(&options).await.unwrap();

    assert!(report.stale.iter().any(|f| f.page.page_id == "keep"));
    assert!(!report.stale.iter().any(|f| f.page.page_id == "skip"));
    assert!(report.orphans.iter().any(|p| p.page_id == "keep"));
    assert!(!report.orphans.iter().any(|p| p.page_id == "skip"));
    assert!(report.unsynced.is_empty(), "no remote attached, nothing can be unsynced");
}

// the scope filters narrow the remote-only half too: ancestry comes from
// the remote listing, labels from the fetched pages
#[tokio::test]
async fn test_unsynced_respects_scope_filters() {
    let (store, _, dir) = setup_audit().await;
    let config = test_config(dir.path());

    let remote = MockRemote::new();
    remote.put_page(remote_page("root", "Root", "<p>r</p>", 1));
    let mut child = remote_page("child", "Child", "<p>c</p>", 1);
    child.parent_id = Some("root".to_string());
    remote.put_page(child);
    let mut labeled = remote_page("labeled", "Labeled", "<p>l</p>", 1);
    labeled.labels = vec!["skip-me".to_string()];
    remote.put_page(labeled);

    let engine = AuditEngine::new(store.clone(), Some(remote), &config);

    // only descendants of "root"
    let under_root = AuditOptions {
        scope: AuditScope { under_ancestor: Some("root".to_string()), ..Default::default() },
        validate_external_links: false,
    };
    let report = engine.run(&under_root).await.unwrap();
    let ids: Vec<&str> = report.unsynced.iter().map(|f| f.page_id.as_str()).collect();
    assert_eq!(ids, vec!["child"]);

    // everything except the excluded label
    let without_label = AuditOptions {
        scope: AuditScope { exclude_label: Some("skip-me".to_string()), ..Default::default() },
        validate_external_links: false,
    };
    let report = engine.run(&without_label).await.unwrap();
    let ids: Vec<&str> = report.unsynced.iter().map(|f| f.page_id.as_str()).collect();
    assert!(ids.contains(&"root"));
    assert!(ids.contains(&"child"));
    assert!(!ids.contains(&"labeled"));

    // only the required label
    let with_label = AuditOptions {
        scope: AuditScope { with_label: Some("skip-me".to_string()), ..Default::default() },
        validate_external_links: false,
    };
    let report = engine.run(&with_label).await.unwrap();
    let ids: Vec<&str> = report.unsynced.iter().map(|f| f.page_id.as_str()).collect();
    assert_eq!(ids, vec!["labeled"]);
}

// remote pages the store has never seen show up as unsynced, with stale
// classification when the remote reports a modification date
#[tokio::test]
async fn test_unsynced_remote_pages() {
    let (store, _, dir) = setup_audit().await;
    let config = test_config(dir.path());

    let remote = MockRemote::new();
    let mut known = remote_page("known", "Known", "<p>k</p>", 1);
    known.modified_at = Some(Utc::now().naive_utc());
    remote.put_page(known);

    let mut missing = remote_page("never-synced", "Never Synced", "<p>m</p>", 3);
    missing.modified_at = Utc::now()
        .naive_utc()
        .checked_sub_months(Months::new(13))
        .map(|dt| dt - chrono::Duration::days(2));
    remote.put_page(missing);

    store.upsert_page(&PageRecord::new("known", "Known", "DOC")).await.unwrap();

    let engine = AuditEngine::new(store.clone(), Some(remote), &config);
    let report = engine.run(&AuditOptions::default()).await.unwrap();

    assert_eq!(report.unsynced.len(), 1);
    assert_eq!(report.unsynced[0].page_id, "never-synced");
    assert_eq!(report.unsynced[0].remote_version, 3);
    assert_eq!(report.unsynced[0].severity, Some(StaleSeverity::High));
}

#[tokio::test]
async fn test_status_and_restriction_filters() {
    let (store, engine, _dir) = setup_audit().await;

    let mut restricted = PageRecord::new("secret", "Secret", "DOC");
    restricted.is_restricted = true;
    store.upsert_page(&restricted).await.unwrap();

    let mut draft = PageRecord::new("wip", "WIP", "DOC");
    draft.content_status = crate::domain::ContentStatus::Draft;
    store.upsert_page(&draft).await.unwrap();

    let mut archived = PageRecord::new("retired", "Retired", "DOC");
    archived.content_status = crate::domain::ContentStatus::Archived;
    store.upsert_page(&archived).await.unwrap();

    store.upsert_page(&PageRecord::new("plain", "Plain", "DOC")).await.unwrap();

    let report = engine.run(&AuditOptions::default()).await.unwrap();

    assert_eq!(report.restricted.len(), 1);
    assert_eq!(report.restricted[0].page_id, "secret");
    assert_eq!(report.drafts.len(), 1);
    assert_eq!(report.drafts[0].page_id, "wip");
    assert_eq!(report.archived.len(), 1);
    assert_eq!(report.archived[0].page_id, "retired");
}

#[tokio::test]
async fn test_external_links_grouped_by_host() {
    let (store, engine, _dir) = setup_audit().await;
    store.upsert_page(&PageRecord::new("p1", "P1", "DOC")).await.unwrap();

    let external = |target: &str, line: i64| LinkEdge {
        source_id: "p1".into(),
        target_id: None,
        target: target.to_string(),
        kind: LinkKind::External,
        text: "x".into(),
        line,
        is_broken: false,
        discovered_at: Utc::now().naive_utc(),
    };
    store
        .set_page_links(
            "p1",
            &[
                external("https://example.com/a", 1),
                external("https://example.com/b", 2),
                external("https://other.io/c", 3),
            ],
        )
        .await
        .unwrap();

    let report = engine.run(&AuditOptions::default()).await.unwrap();
    assert_eq!(report.external_links.len(), 2);
    assert_eq!(report.external_links["example.com"].len(), 2);
    assert_eq!(report.external_links["other.io"].len(), 1);
}
