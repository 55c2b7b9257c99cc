pub mod memory;
pub mod sqlite;

use crate::model::{
    Article, Channel, ChannelId, MonitoringState, NewArticle, NewChannel, NewProject,
    ProcessedVideoRecord, Project, ProjectId, ProjectUpdate,
};
use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence contract for projects, channels, articles and processed videos.
///
/// Every write is atomic per key; callers may share one store across any
/// number of concurrently running monitor loops.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, project: NewProject) -> Result<Project>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>>;
    /// Returns `None` when the project does not exist.
    async fn update_project(&self, id: ProjectId, update: ProjectUpdate) -> Result<Option<Project>>;
    /// Deletes the project, its site, channels, articles and every processed-video
    /// record keyed by one of its channels or its search batches. Returns false if absent.
    async fn delete_project(&self, id: ProjectId) -> Result<bool>;

    /// Fails if the project is missing or already has a channel with this source.
    async fn add_channel(&self, project_id: ProjectId, channel: NewChannel) -> Result<Channel>;
    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>>;
    async fn list_channels(&self, project_id: ProjectId) -> Result<Vec<Channel>>;
    async fn set_channel_monitoring_state(&self, id: ChannelId, state: MonitoringState) -> Result<bool>;
    async fn set_channel_auto_publish(&self, id: ChannelId, auto_publish: bool) -> Result<bool>;
    /// Deletes the channel and its processed-video records. Returns false if absent.
    async fn delete_channel(&self, id: ChannelId) -> Result<bool>;

    async fn get_record(&self, channel_key: &str, video_id: &str) -> Result<Option<ProcessedVideoRecord>>;
    /// Insert the record if the key is new. An existing record is only
    /// replaced when it is an `error` and `replace_error` is set.
    /// Returns whether anything was written.
    async fn record(&self, record: &ProcessedVideoRecord, replace_error: bool) -> Result<bool>;

    async fn save_article(&self, article: NewArticle) -> Result<Article>;
    /// Oldest first.
    async fn list_articles(&self, project_id: ProjectId) -> Result<Vec<Article>>;
}
