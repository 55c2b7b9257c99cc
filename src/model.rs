use crate::error::FailureReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ProjectId = i64;
pub type ChannelId = i64;
pub type ArticleId = i64;

/// WordPress target owned by exactly one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordPressSite {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub username: String,
    pub app_password: String,
}

impl WordPressSite {
    /// Copy safe to hand to display layers.
    pub fn redacted(&self) -> Self {
        Self {
            app_password: if self.app_password.is_empty() {
                String::new()
            } else {
                "********".to_string()
            },
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub active: bool,
    pub site: WordPressSite,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSite {
    pub name: String,
    pub base_url: String,
    pub username: String,
    pub app_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub site: NewSite,
}

/// Partial site change. An empty `app_password` keeps the stored credential.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub app_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub site: Option<SiteUpdate>,
}

fn default_true() -> bool {
    true
}

/// Persisted monitoring flag. The live lifecycle lives on the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringState {
    Stopped,
    Running,
}

impl MonitoringState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringState::Stopped => "stopped",
            MonitoringState::Running => "running",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "running" {
            MonitoringState::Running
        } else {
            MonitoringState::Stopped
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub project_id: ProjectId,
    /// Channel id (`UC...`), username, channel URL or RSS feed URL.
    pub source: String,
    pub auto_publish: bool,
    pub monitoring: MonitoringState,
}

impl Channel {
    /// Namespace under which this channel's videos are deduplicated.
    pub fn dedup_key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChannel {
    pub source: String,
    #[serde(default = "default_true")]
    pub auto_publish: bool,
}

/// Dedup namespace for one-shot search batches run inside a project.
pub fn search_dedup_key(project_id: ProjectId) -> String {
    format!("search:{}", project_id)
}

/// A video discovered by a feed poll or a search. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: String,
    pub channel_id: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
}

/// Per-run settings the pipeline needs from the channel/project it runs for.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub project_id: ProjectId,
    pub auto_publish: bool,
    pub categories: Vec<String>,
    pub site: WordPressSite,
}

/// What the generation service hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArticle {
    pub title: String,
    pub meta_description: String,
    pub html: String,
    pub markdown: String,
    pub faq: Vec<FaqEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub project_id: ProjectId,
    pub video_id: String,
    pub title: String,
    pub meta_description: String,
    pub html: String,
    pub markdown: String,
    pub source_url: String,
    pub generated_at: DateTime<Utc>,
}

/// Immutable once stored. Regenerating a video creates a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub project_id: ProjectId,
    pub video_id: String,
    pub title: String,
    pub meta_description: String,
    pub html: String,
    pub markdown: String,
    pub source_url: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublishStatus {
    NotRequested,
    Published { post_id: u64 },
    Failed { message: String },
}

/// Result of one pipeline run. A success always carries the stored article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        article_id: ArticleId,
        publish: PublishStatus,
    },
    Error {
        reason: FailureReason,
        message: String,
    },
    Skipped,
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Error { .. } => "error",
            Outcome::Skipped => "skipped",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    pub fn article_id(&self) -> Option<ArticleId> {
        match self {
            Outcome::Success { article_id, .. } => Some(*article_id),
            _ => None,
        }
    }

    pub fn post_id(&self) -> Option<u64> {
        match self {
            Outcome::Success {
                publish: PublishStatus::Published { post_id },
                ..
            } => Some(*post_id),
            _ => None,
        }
    }
}

/// Dedup store unit, keyed by (`channel_key`, `video_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedVideoRecord {
    pub channel_key: String,
    pub video_id: String,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}
