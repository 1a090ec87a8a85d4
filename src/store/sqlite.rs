use crate::domain::{Contributor, LinkEdge, PageRecord, UserRecord};
use crate::error::{Result, SyncError};
use crate::store::model::{
    ancestor_like_pattern, ancestors_json, DbContributor, DbLink, DbPage, DbUser,
};
use crate::store::{PageFilter, StateStore};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::path::{Path, PathBuf};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const SCHEMA_VERSION: &str = "3";
pub const HASH_ALGO: &str = "blake3";

/// SQLite-backed [`StateStore`]. Page/link/user records live in the
/// database; base content lives as flat files under `<state_dir>/cache/`
/// so merges never drag large bodies through SQL.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    state_dir: PathBuf,
}

impl SqliteStore {
    pub fn new(pool: Pool<Sqlite>, state_dir: PathBuf) -> Self {
        Self { pool, state_dir }
    }

    /// Opens (creating if missing) the database under the state directory
    /// and brings the schema up to date.
    pub async fn open(state_dir: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(state_dir.join("state.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(pool, state_dir.to_path_buf());
        store.init().await?;
        Ok(store)
    }

    /// Creates schema and indexes if missing, migrates older layouts, and
    /// stamps the meta table. Safe to call repeatedly.
    pub async fn init(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| SyncError::Validation(format!("schema migration failed: {}", e)))?;

        tokio::fs::create_dir_all(self.cache_dir()).await?;

        if self.get_meta("schema_version").await?.is_none() {
            self.set_meta("schema_version", SCHEMA_VERSION).await?;
        }
        if self.get_meta("hash_algo").await?.is_none() {
            self.set_meta("hash_algo", HASH_ALGO).await?;
        }
        Ok(())
    }

    fn cache_dir(&self) -> PathBuf {
        self.state_dir.join("cache")
    }

    fn base_path(&self, page_id: &str) -> PathBuf {
        // page ids are opaque remote strings; keep them filesystem-safe
        let safe: String = page_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.cache_dir().join(format!("{}.base", safe))
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn upsert_page(&self, page: &PageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pages (
                page_id, title, space_key, version, parent_id, ancestors,
                content_status, is_restricted, version_count,
                created_by, created_at, modified_by, modified_at,
                local_path, local_hash, base_hash, remote_hash,
                sync_status, inaccessible_reason
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(page_id) DO UPDATE SET
                title = excluded.title,
                space_key = excluded.space_key,
                version = excluded.version,
                parent_id = excluded.parent_id,
                ancestors = excluded.ancestors,
                content_status = excluded.content_status,
                is_restricted = excluded.is_restricted,
                version_count = excluded.version_count,
                created_by = excluded.created_by,
                created_at = excluded.created_at,
                modified_by = excluded.modified_by,
                modified_at = excluded.modified_at,
                local_path = excluded.local_path,
                local_hash = excluded.local_hash,
                base_hash = excluded.base_hash,
                remote_hash = excluded.remote_hash,
                sync_status = excluded.sync_status,
                inaccessible_reason = excluded.inaccessible_reason
            "#,
        )
        .bind(&page.page_id)
        .bind(&page.title)
        .bind(&page.space_key)
        .bind(page.version)
        .bind(&page.parent_id)
        .bind(ancestors_json(&page.ancestors))
        .bind(page.content_status.to_string())
        .bind(page.is_restricted)
        .bind(page.version_count)
        .bind(&page.created_by)
        .bind(page.created_at)
        .bind(&page.modified_by)
        .bind(page.modified_at)
        .bind(&page.local_path)
        .bind(&page.local_hash)
        .bind(&page.base_hash)
        .bind(&page.remote_hash)
        .bind(page.sync_status.to_string())
        .bind(&page.inaccessible_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_page(&self, page_id: &str) -> Result<Option<PageRecord>> {
        let row = sqlx::query_as::<_, DbPage>("SELECT * FROM pages WHERE page_id = ?")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PageRecord::from))
    }

    async fn list_pages(&self, filter: &PageFilter) -> Result<Vec<PageRecord>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM pages WHERE 1=1");
        if let Some(space) = &filter.space_key {
            qb.push(" AND space_key = ").push_bind(space);
        }
        if let Some(label) = &filter.label {
            qb.push(" AND page_id IN (SELECT page_id FROM page_labels WHERE label = ")
                .push_bind(label)
                .push(")");
        }
        if let Some(ancestor) = &filter.ancestor_id {
            qb.push(" AND ancestors LIKE ").push_bind(ancestor_like_pattern(ancestor));
        }
        if let Some(before) = filter.modified_before {
            qb.push(" AND modified_at IS NOT NULL AND modified_at < ").push_bind(before);
        }
        if let Some(status) = filter.content_status {
            qb.push(" AND content_status = ").push_bind(status.to_string());
        }
        if let Some(restricted) = filter.restricted {
            qb.push(" AND is_restricted = ").push_bind(restricted);
        }
        if let Some(min) = filter.min_version_count {
            qb.push(" AND version_count >= ").push_bind(min);
        }
        qb.push(" ORDER BY page_id");

        let rows = qb.build_query_as::<DbPage>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(PageRecord::from).collect())
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM links WHERE source_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM page_labels WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM contributors WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM attachments WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM path_index WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pages WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        match tokio::fs::remove_file(self.base_path(page_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn all_page_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT page_id FROM pages ORDER BY page_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn orphaned_pages(&self) -> Result<Vec<PageRecord>> {
        let rows = sqlx::query_as::<_, DbPage>(
            r#"
            SELECT * FROM pages
            WHERE parent_id IS NULL
              AND page_id NOT IN (
                  SELECT target_id FROM links WHERE target_id IS NOT NULL
              )
            ORDER BY page_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PageRecord::from).collect())
    }

    async fn set_page_links(&self, page_id: &str, links: &[LinkEdge]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM links WHERE source_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        for link in links {
            sqlx::query(
                r#"
                INSERT INTO links
                    (source_id, target_id, target, kind, text, line, is_broken, discovered_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(page_id)
            .bind(&link.target_id)
            .bind(&link.target)
            .bind(link.kind.to_string())
            .bind(&link.text)
            .bind(link.line)
            .bind(link.is_broken)
            .bind(link.discovered_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn outgoing_links(&self, page_id: &str) -> Result<Vec<LinkEdge>> {
        let rows = sqlx::query_as::<_, DbLink>(
            "SELECT * FROM links WHERE source_id = ? ORDER BY line",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LinkEdge::from).collect())
    }

    async fn incoming_links(&self, page_id: &str) -> Result<Vec<LinkEdge>> {
        let rows = sqlx::query_as::<_, DbLink>(
            "SELECT * FROM links WHERE target_id = ? ORDER BY source_id, line",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LinkEdge::from).collect())
    }

    async fn broken_links(&self) -> Result<Vec<LinkEdge>> {
        let rows = sqlx::query_as::<_, DbLink>(
            "SELECT * FROM links WHERE is_broken = 1 ORDER BY source_id, line",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LinkEdge::from).collect())
    }

    async fn external_links(&self, page_id: Option<&str>) -> Result<Vec<LinkEdge>> {
        let rows = match page_id {
            Some(id) => {
                sqlx::query_as::<_, DbLink>(
                    "SELECT * FROM links WHERE kind = 'external' AND source_id = ? ORDER BY line",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, DbLink>(
                    "SELECT * FROM links WHERE kind = 'external' ORDER BY source_id, line",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(LinkEdge::from).collect())
    }

    async fn set_page_labels(&self, page_id: &str, labels: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM page_labels WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        for label in labels {
            sqlx::query("INSERT OR IGNORE INTO page_labels (page_id, label) VALUES (?, ?)")
                .bind(page_id)
                .bind(label)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn page_labels(&self, page_id: &str) -> Result<Vec<String>> {
        let labels = sqlx::query_scalar::<_, String>(
            "SELECT label FROM page_labels WHERE page_id = ? ORDER BY label",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(labels)
    }

    async fn pages_with_label(&self, label: &str) -> Result<Vec<PageRecord>> {
        let rows = sqlx::query_as::<_, DbPage>(
            r#"
            SELECT p.* FROM pages p
            JOIN page_labels pl ON pl.page_id = p.page_id
            WHERE pl.label = ?
            ORDER BY p.page_id
            "#,
        )
        .bind(label)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PageRecord::from).collect())
    }

    async fn set_page_contributors(
        &self,
        page_id: &str,
        contributors: &[Contributor],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM contributors WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        for c in contributors {
            sqlx::query(
                r#"
                INSERT INTO contributors (page_id, user_id, contributions, last_contributed_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(page_id)
            .bind(&c.user_id)
            .bind(c.contributions)
            .bind(c.last_contributed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn page_contributors(&self, page_id: &str) -> Result<Vec<Contributor>> {
        let rows = sqlx::query_as::<_, DbContributor>(
            "SELECT * FROM contributors WHERE page_id = ? ORDER BY contributions DESC",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Contributor::from).collect())
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, display_name, email, is_active, checked_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                is_active = excluded.is_active,
                checked_at = excluded.checked_at
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(user.is_active)
        .bind(user.checked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(UserRecord::from))
    }

    async fn oldest_user_check(&self) -> Result<Option<NaiveDateTime>> {
        let oldest = sqlx::query_scalar::<_, Option<NaiveDateTime>>(
            "SELECT MIN(checked_at) FROM users WHERE checked_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(oldest)
    }

    async fn set_page_attachments(&self, page_id: &str, filenames: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM attachments WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        for filename in filenames {
            sqlx::query("INSERT OR IGNORE INTO attachments (page_id, filename) VALUES (?, ?)")
                .bind(page_id)
                .bind(filename)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn page_attachments(&self, page_id: &str) -> Result<Vec<String>> {
        let filenames = sqlx::query_scalar::<_, String>(
            "SELECT filename FROM attachments WHERE page_id = ? ORDER BY filename",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(filenames)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_base(&self, page_id: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.base_path(page_id)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_base(&self, page_id: &str, markdown: &str) -> Result<()> {
        let target = self.base_path(page_id);
        let tmp = target.with_extension("base.tmp");
        tokio::fs::write(&tmp, markdown).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn page_for_path(&self, path: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>("SELECT page_id FROM path_index WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn path_for_page(&self, page_id: &str) -> Result<Option<String>> {
        let path = sqlx::query_scalar::<_, String>("SELECT path FROM path_index WHERE page_id = ?")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(path)
    }

    async fn bind_path(&self, page_id: &str, path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // a page keeps at most one binding; rebinding is a move
        sqlx::query("DELETE FROM path_index WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO path_index (path, page_id) VALUES (?, ?)")
            .bind(path)
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn release_path(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM path_index WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
