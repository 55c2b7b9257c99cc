//! SQLite-backed [`Store`].
//!
//! Foreign keys are enabled on every connection so deleting a project
//! cascades to its site, channels and articles. `processed_videos` is keyed
//! by text and is pruned explicitly.

use super::Store;
use crate::model::{
    search_dedup_key, Article, Channel, ChannelId, MonitoringState, NewArticle, NewChannel,
    NewProject, Outcome, ProcessedVideoRecord, Project, ProjectId, ProjectUpdate, WordPressSite,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

/// Idempotent DDL.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wordpress_sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL UNIQUE REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    base_url TEXT NOT NULL,
    username TEXT NOT NULL,
    app_password TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    auto_publish INTEGER NOT NULL DEFAULT 1,
    monitoring TEXT NOT NULL DEFAULT 'stopped',
    UNIQUE (project_id, source)
);

CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    video_id TEXT NOT NULL,
    title TEXT NOT NULL,
    meta_description TEXT NOT NULL,
    html TEXT NOT NULL,
    markdown TEXT NOT NULL,
    source_url TEXT NOT NULL,
    generated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processed_videos (
    channel_key TEXT NOT NULL,
    video_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    article_id INTEGER,
    detail TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (channel_key, video_id)
);

CREATE INDEX IF NOT EXISTS idx_articles_project ON articles (project_id, id);
";

const PROJECT_SELECT: &str = "SELECT p.id, p.name, p.active, p.created_at, \
     s.id AS site_id, s.name AS site_name, s.base_url, s.username, s.app_password \
     FROM projects p JOIN wordpress_sites s ON s.project_id = p.id";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::init(pool).await
    }

    /// Single-connection in-memory database, for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory database")?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("failed to apply schema")?;
        Ok(Self { pool })
    }

    fn project_from_row(row: &SqliteRow) -> Result<Project> {
        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            site: WordPressSite {
                id: row.try_get("site_id")?,
                name: row.try_get("site_name")?,
                base_url: row.try_get("base_url")?,
                username: row.try_get("username")?,
                app_password: row.try_get("app_password")?,
            },
        })
    }

    fn channel_from_row(row: &SqliteRow) -> Result<Channel> {
        let monitoring: String = row.try_get("monitoring")?;
        Ok(Channel {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            source: row.try_get("source")?,
            auto_publish: row.try_get("auto_publish")?,
            monitoring: MonitoringState::parse(&monitoring),
        })
    }

    fn article_from_row(row: &SqliteRow) -> Result<Article> {
        Ok(Article {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            video_id: row.try_get("video_id")?,
            title: row.try_get("title")?,
            meta_description: row.try_get("meta_description")?,
            html: row.try_get("html")?,
            markdown: row.try_get("markdown")?,
            source_url: row.try_get("source_url")?,
            generated_at: row.try_get("generated_at")?,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, project: NewProject) -> Result<Project> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        let project_id = sqlx::query("INSERT INTO projects (name, active, created_at) VALUES (?1, ?2, ?3)")
            .bind(&project.name)
            .bind(project.active)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .context("insert project")?
            .last_insert_rowid();
        let site_id = sqlx::query(
            "INSERT INTO wordpress_sites (project_id, name, base_url, username, app_password) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(project_id)
        .bind(&project.site.name)
        .bind(&project.site.base_url)
        .bind(&project.site.username)
        .bind(&project.site.app_password)
        .execute(&mut *tx)
        .await
        .context("insert wordpress site")?
        .last_insert_rowid();
        tx.commit().await?;

        Ok(Project {
            id: project_id,
            name: project.name,
            active: project.active,
            created_at,
            site: WordPressSite {
                id: site_id,
                name: project.site.name,
                base_url: project.site.base_url,
                username: project.site.username,
                app_password: project.site.app_password,
            },
        })
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!("{} ORDER BY p.id", PROJECT_SELECT))
            .fetch_all(&self.pool)
            .await
            .context("list projects")?;
        rows.iter().map(Self::project_from_row).collect()
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let row = sqlx::query(&format!("{} WHERE p.id = ?1", PROJECT_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get project")?;
        row.as_ref().map(Self::project_from_row).transpose()
    }

    async fn update_project(&self, id: ProjectId, update: ProjectUpdate) -> Result<Option<Project>> {
        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query(
            "UPDATE projects SET name = COALESCE(?1, name), active = COALESCE(?2, active) WHERE id = ?3",
        )
        .bind(update.name)
        .bind(update.active)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("update project")?
        .rows_affected();
        if touched == 0 {
            return Ok(None);
        }
        if let Some(site) = update.site {
            let password = site.app_password.filter(|p| !p.is_empty());
            sqlx::query(
                "UPDATE wordpress_sites SET name = COALESCE(?1, name), base_url = COALESCE(?2, base_url), \
                 username = COALESCE(?3, username), app_password = COALESCE(?4, app_password) \
                 WHERE project_id = ?5",
            )
            .bind(site.name)
            .bind(site.base_url)
            .bind(site.username)
            .bind(password)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("update wordpress site")?;
        }
        tx.commit().await?;
        self.get_project(id).await
    }

    async fn delete_project(&self, id: ProjectId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        // Channel keys are the channel id rendered as text.
        sqlx::query(
            "DELETE FROM processed_videos WHERE channel_key = ?2 \
             OR channel_key IN (SELECT CAST(id AS TEXT) FROM channels WHERE project_id = ?1)",
        )
        .bind(id)
        .bind(search_dedup_key(id))
        .execute(&mut *tx)
        .await
        .context("prune processed videos for project")?;
        let deleted = sqlx::query("DELETE FROM projects WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete project")?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn add_channel(&self, project_id: ProjectId, channel: NewChannel) -> Result<Channel> {
        let id = sqlx::query(
            "INSERT INTO channels (project_id, source, auto_publish, monitoring) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(project_id)
        .bind(&channel.source)
        .bind(channel.auto_publish)
        .bind(MonitoringState::Stopped.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert channel {} into project {}", channel.source, project_id))?
        .last_insert_rowid();
        Ok(Channel {
            id,
            project_id,
            source: channel.source,
            auto_publish: channel.auto_publish,
            monitoring: MonitoringState::Stopped,
        })
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get channel")?;
        row.as_ref().map(Self::channel_from_row).transpose()
    }

    async fn list_channels(&self, project_id: ProjectId) -> Result<Vec<Channel>> {
        let rows = sqlx::query("SELECT * FROM channels WHERE project_id = ?1 ORDER BY id")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .context("list channels")?;
        rows.iter().map(Self::channel_from_row).collect()
    }

    async fn set_channel_monitoring_state(&self, id: ChannelId, state: MonitoringState) -> Result<bool> {
        let n = sqlx::query("UPDATE channels SET monitoring = ?1 WHERE id = ?2")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("set channel monitoring state")?
            .rows_affected();
        Ok(n > 0)
    }

    async fn set_channel_auto_publish(&self, id: ChannelId, auto_publish: bool) -> Result<bool> {
        let n = sqlx::query("UPDATE channels SET auto_publish = ?1 WHERE id = ?2")
            .bind(auto_publish)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("set channel auto-publish")?
            .rows_affected();
        Ok(n > 0)
    }

    async fn delete_channel(&self, id: ChannelId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM channels WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete channel")?
            .rows_affected();
        if deleted > 0 {
            sqlx::query("DELETE FROM processed_videos WHERE channel_key = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .context("prune processed videos for channel")?;
        }
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn get_record(&self, channel_key: &str, video_id: &str) -> Result<Option<ProcessedVideoRecord>> {
        let row = sqlx::query(
            "SELECT detail, recorded_at FROM processed_videos WHERE channel_key = ?1 AND video_id = ?2",
        )
        .bind(channel_key)
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .context("get processed video")?;
        let Some(row) = row else { return Ok(None) };
        let detail: String = row.try_get("detail")?;
        let outcome: Outcome =
            serde_json::from_str(&detail).context("corrupt processed video outcome")?;
        Ok(Some(ProcessedVideoRecord {
            channel_key: channel_key.to_string(),
            video_id: video_id.to_string(),
            outcome,
            recorded_at: row.try_get("recorded_at")?,
        }))
    }

    async fn record(&self, record: &ProcessedVideoRecord, replace_error: bool) -> Result<bool> {
        let detail = serde_json::to_string(&record.outcome)?;
        // Single statement: two racing writers cannot both land.
        let n = sqlx::query(
            "INSERT INTO processed_videos (channel_key, video_id, outcome, article_id, detail, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (channel_key, video_id) DO UPDATE SET \
               outcome = excluded.outcome, article_id = excluded.article_id, \
               detail = excluded.detail, recorded_at = excluded.recorded_at \
             WHERE processed_videos.outcome = 'error' AND ?7",
        )
        .bind(&record.channel_key)
        .bind(&record.video_id)
        .bind(record.outcome.kind())
        .bind(record.outcome.article_id())
        .bind(detail)
        .bind(record.recorded_at)
        .bind(replace_error)
        .execute(&self.pool)
        .await
        .context("insert processed video")?
        .rows_affected();
        Ok(n > 0)
    }

    async fn save_article(&self, article: NewArticle) -> Result<Article> {
        let id = sqlx::query(
            "INSERT INTO articles (project_id, video_id, title, meta_description, html, markdown, source_url, generated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(article.project_id)
        .bind(&article.video_id)
        .bind(&article.title)
        .bind(&article.meta_description)
        .bind(&article.html)
        .bind(&article.markdown)
        .bind(&article.source_url)
        .bind(article.generated_at)
        .execute(&self.pool)
        .await
        .context("insert article")?
        .last_insert_rowid();
        Ok(Article {
            id,
            project_id: article.project_id,
            video_id: article.video_id,
            title: article.title,
            meta_description: article.meta_description,
            html: article.html,
            markdown: article.markdown,
            source_url: article.source_url,
            generated_at: article.generated_at,
        })
    }

    async fn list_articles(&self, project_id: ProjectId) -> Result<Vec<Article>> {
        let rows = sqlx::query("SELECT * FROM articles WHERE project_id = ?1 ORDER BY id")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .context("list articles")?;
        rows.iter().map(Self::article_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn test_project_lifecycle() {
        conformance::project_lifecycle(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_channel_rules() {
        conformance::channel_rules(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        conformance::delete_cascades(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_delete_channel() {
        conformance::delete_channel(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_record_first_write_wins() {
        conformance::record_first_write_wins(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_record_error_replacement() {
        conformance::record_error_replacement(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_articles_by_project() {
        conformance::articles_by_project(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_open_creates_parent_dir_and_persists() {
        let dir = std::env::temp_dir().join(format!("yt-autopilot-{}", std::process::id()));
        let path = dir.join("nested").join("autopilot.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.create_project(conformance::new_project("kept")).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).await.unwrap();
        let projects = reopened.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "kept");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
