//! Request/response facade over the autopilot core.
//!
//! This is the surface a UI or HTTP layer calls. Every response type
//! serializes to JSON; every failure is an `AutopilotError`.

use crate::dedup::{DedupStore, ErrorPolicy};
use crate::error::{AutopilotError, FailureReason, Result};
use crate::feed::{urls, FeedPoller, VideoSource};
use crate::model::{
    Article, Channel, ChannelId, ChannelSettings, MonitoringState, NewChannel, NewProject,
    Outcome, Project, ProjectId, ProjectUpdate, PublishStatus, VideoEntry,
};
use crate::monitor::{LifecycleState, MonitorSettings, Supervisor, TaskSnapshot};
use crate::pipeline::PipelineExecutor;
use crate::schedule::{SchedulePassReport, ScheduleSnapshot, SearchSchedule, SearchScheduler};
use crate::search::{Pacing, SearchBatchRunner, SearchParams, SearchReport};
use crate::services::{ArticleGenerator, PublisherFactory, TranscriptSource};
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the facade and the components it wires.
#[derive(Debug, Clone)]
pub struct AutopilotOptions {
    pub poll_interval: Duration,
    pub lookback: Option<chrono::Duration>,
    pub error_policy: ErrorPolicy,
    pub default_categories: Vec<String>,
    pub default_max_results: usize,
    pub default_days_threshold: u32,
    pub pacing: Pacing,
    /// Recurring search passes, when configured.
    pub schedule: Option<SearchSchedule>,
}

impl AutopilotOptions {
    pub fn from_config(config: &crate::config::Config) -> anyhow::Result<Self> {
        Ok(Self {
            poll_interval: config.monitor.poll_interval(),
            lookback: config.monitor.lookback(),
            error_policy: config.monitor.error_policy,
            default_categories: config.publish.default_categories.clone(),
            default_max_results: config.search.default_max_results,
            default_days_threshold: config.search.default_days_threshold,
            pacing: Pacing {
                min_ms: config.search.pace_min_ms,
                max_ms: config.search.pace_max_ms,
            },
            schedule: config.search.schedule.to_schedule()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorResponse {
    pub channel_id: ChannelId,
    pub state: LifecycleState,
    pub last_poll: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub last_error: Option<String>,
}

impl MonitorResponse {
    fn from_snapshot(channel_id: ChannelId, snapshot: Option<TaskSnapshot>) -> Self {
        match snapshot {
            Some(s) => Self {
                channel_id,
                state: s.state,
                last_poll: s.last_poll,
                ticks: s.ticks,
                last_error: s.last_error,
            },
            None => Self {
                channel_id,
                state: LifecycleState::Stopped,
                last_poll: None,
                ticks: 0,
                last_error: None,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub project_id: ProjectId,
    pub video_url: String,
    #[serde(default)]
    pub publish: bool,
    /// Falls back to the configured default categories.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub article: Article,
    pub publish: PublishStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub project_id: ProjectId,
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub days_threshold: Option<u32>,
    #[serde(default)]
    pub auto_publish: bool,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    #[serde(flatten)]
    pub channel: Channel,
    pub monitor: MonitorResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectOverview {
    pub project: Project,
    pub channels: Vec<ChannelStatus>,
    pub article_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionResponse {
    pub ok: bool,
    pub message: String,
}

/// Entry point for everything outside the core.
pub struct Autopilot {
    store: Arc<dyn Store>,
    supervisor: Supervisor,
    pipeline: Arc<PipelineExecutor>,
    search: Arc<SearchBatchRunner>,
    scheduler: Option<SearchScheduler>,
    publishers: Arc<dyn PublisherFactory>,
    options: AutopilotOptions,
}

impl Autopilot {
    pub fn new(
        store: Arc<dyn Store>,
        videos: Arc<dyn VideoSource>,
        transcripts: Arc<dyn TranscriptSource>,
        generator: Arc<dyn ArticleGenerator>,
        publishers: Arc<dyn PublisherFactory>,
        options: AutopilotOptions,
    ) -> Self {
        let dedup = DedupStore::new(store.clone(), options.error_policy);
        let pipeline = Arc::new(PipelineExecutor::new(
            transcripts,
            generator,
            store.clone(),
            publishers.clone(),
        ));
        let poller = FeedPoller::new(videos.clone(), dedup.clone(), options.lookback);
        let supervisor = Supervisor::new(
            store.clone(),
            poller,
            pipeline.clone(),
            dedup.clone(),
            MonitorSettings {
                poll_interval: options.poll_interval,
                categories: options.default_categories.clone(),
            },
        );
        let search = Arc::new(SearchBatchRunner::new(videos, dedup, pipeline.clone(), options.pacing));
        let scheduler = options.schedule.clone().map(|schedule| {
            SearchScheduler::new(
                search.clone(),
                store.clone(),
                options.default_categories.clone(),
                schedule,
            )
        });
        Self {
            store,
            supervisor,
            pipeline,
            search,
            scheduler,
            publishers,
            options,
        }
    }

    async fn require_project(&self, project_id: ProjectId) -> Result<Project> {
        self.store
            .get_project(project_id)
            .await
            .map_err(AutopilotError::persistence)?
            .ok_or(AutopilotError::ProjectNotFound(project_id))
    }

    /// The channel, provided it belongs to `project_id`.
    async fn require_channel(&self, project_id: ProjectId, channel_id: ChannelId) -> Result<Channel> {
        self.require_project(project_id).await?;
        match self
            .store
            .get_channel(channel_id)
            .await
            .map_err(AutopilotError::persistence)?
        {
            Some(channel) if channel.project_id == project_id => Ok(channel),
            _ => Err(AutopilotError::ChannelNotFound(channel_id)),
        }
    }

    async fn list_channels(&self, project_id: ProjectId) -> Result<Vec<Channel>> {
        self.store
            .list_channels(project_id)
            .await
            .map_err(AutopilotError::persistence)
    }

    async fn persist_monitoring(&self, channel_id: ChannelId, state: MonitoringState) -> Result<()> {
        self.store
            .set_channel_monitoring_state(channel_id, state)
            .await
            .map_err(AutopilotError::persistence)?;
        Ok(())
    }

    fn categories_or_default(&self, categories: Option<Vec<String>>) -> Vec<String> {
        categories.unwrap_or_else(|| self.options.default_categories.clone())
    }

    // --- monitoring ---

    pub async fn start_monitoring(&self, project_id: ProjectId, channel_id: ChannelId) -> Result<MonitorResponse> {
        let channel = self.require_channel(project_id, channel_id).await?;
        self.persist_monitoring(channel.id, MonitoringState::Running).await?;
        self.supervisor.start(channel.id).await?;
        Ok(self.monitor_status_unchecked(channel.id).await)
    }

    pub async fn stop_monitoring(&self, project_id: ProjectId, channel_id: ChannelId) -> Result<MonitorResponse> {
        let channel = self.require_channel(project_id, channel_id).await?;
        self.persist_monitoring(channel.id, MonitoringState::Stopped).await?;
        let snapshot = self.supervisor.stop(channel.id).await;
        Ok(MonitorResponse::from_snapshot(channel.id, snapshot))
    }

    pub async fn monitor_status(&self, project_id: ProjectId, channel_id: ChannelId) -> Result<MonitorResponse> {
        let channel = self.require_channel(project_id, channel_id).await?;
        Ok(self.monitor_status_unchecked(channel.id).await)
    }

    async fn monitor_status_unchecked(&self, channel_id: ChannelId) -> MonitorResponse {
        MonitorResponse::from_snapshot(channel_id, self.supervisor.status(channel_id).await)
    }

    pub async fn start_project(&self, project_id: ProjectId) -> Result<Vec<MonitorResponse>> {
        self.require_project(project_id).await?;
        let mut responses = Vec::new();
        for channel in self.list_channels(project_id).await? {
            responses.push(self.start_monitoring(project_id, channel.id).await?);
        }
        Ok(responses)
    }

    pub async fn stop_project(&self, project_id: ProjectId) -> Result<Vec<MonitorResponse>> {
        self.require_project(project_id).await?;
        let mut responses = Vec::new();
        for channel in self.list_channels(project_id).await? {
            responses.push(self.stop_monitoring(project_id, channel.id).await?);
        }
        Ok(responses)
    }

    /// Restart every channel whose persisted state is `running` in an active project.
    pub async fn resume_monitoring(&self) -> Result<usize> {
        let projects = self
            .store
            .list_projects()
            .await
            .map_err(AutopilotError::persistence)?;
        let mut resumed = 0;
        for project in projects.iter().filter(|p| p.active) {
            for channel in self.list_channels(project.id).await? {
                if channel.monitoring != MonitoringState::Running {
                    continue;
                }
                match self.supervisor.start(channel.id).await {
                    Ok(_) => resumed += 1,
                    Err(e) => tracing::error!(channel_id = channel.id, error = %e, "failed to resume monitor"),
                }
            }
        }
        tracing::info!(resumed, "monitors resumed");
        Ok(resumed)
    }

    /// Stop all loops, waiting for in-flight ticks. Persisted states are kept for the next resume.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
        }
        self.supervisor.shutdown().await;
    }

    // --- scheduled searches ---

    fn scheduler(&self) -> Result<&SearchScheduler> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| AutopilotError::InvalidRequest("no search schedule is configured".to_string()))
    }

    pub async fn start_schedule(&self) -> Result<ScheduleSnapshot> {
        self.scheduler()?.start().await
    }

    pub async fn stop_schedule(&self) -> Result<ScheduleSnapshot> {
        Ok(self.scheduler()?.stop().await)
    }

    pub async fn schedule_status(&self) -> Result<ScheduleSnapshot> {
        Ok(self.scheduler()?.status().await)
    }

    /// Run one scheduled pass immediately, whether or not the loop is running.
    pub async fn run_schedule_now(&self) -> Result<SchedulePassReport> {
        self.scheduler()?.run_now().await
    }

    // --- generation ---

    pub async fn generate_article(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let url = req.video_url.trim();
        if !urls::is_watch_url(url) {
            return Err(AutopilotError::InvalidRequest(format!("not a YouTube video URL: {}", url)));
        }
        let video_id = urls::video_id(url)
            .ok_or_else(|| AutopilotError::InvalidRequest(format!("no video id in {}", url)))?;
        let project = self.require_project(req.project_id).await?;

        let entry = VideoEntry {
            url: urls::watch_url(&video_id),
            id: video_id,
            channel_id: String::new(),
            published_at: Utc::now(),
            title: String::new(),
        };
        let settings = ChannelSettings {
            project_id: project.id,
            auto_publish: req.publish,
            categories: self.categories_or_default(req.categories),
            site: project.site,
        };

        let result = self.pipeline.process(&entry, &settings).await;
        match (result.outcome, result.article) {
            (Outcome::Success { publish, .. }, Some(article)) => Ok(GenerateResponse { article, publish }),
            (Outcome::Error { reason, message }, _) => Err(match reason {
                FailureReason::TranscriptUnavailable => AutopilotError::TranscriptUnavailable(message),
                FailureReason::GenerationFailed => AutopilotError::GenerationFailed(message),
                FailureReason::PersistenceFailed => AutopilotError::PersistenceFailed(message),
            }),
            _ => Err(AutopilotError::GenerationFailed("pipeline produced no article".to_string())),
        }
    }

    pub async fn run_search(&self, req: SearchRequest) -> Result<SearchReport> {
        let project = self.require_project(req.project_id).await?;
        let params = SearchParams {
            query: req.query,
            max_results: req.max_results.unwrap_or(self.options.default_max_results),
            days_threshold: req.days_threshold.unwrap_or(self.options.default_days_threshold),
            settings: ChannelSettings {
                project_id: project.id,
                auto_publish: req.auto_publish,
                categories: self.categories_or_default(req.categories),
                site: project.site,
            },
            success_target: None,
        };
        self.search.run(params).await
    }

    // --- registry ---

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let projects = self
            .store
            .list_projects()
            .await
            .map_err(AutopilotError::persistence)?;
        Ok(projects.into_iter().map(redact).collect())
    }

    pub async fn project_overview(&self, project_id: ProjectId) -> Result<ProjectOverview> {
        let project = self.require_project(project_id).await?;
        let mut channels = Vec::new();
        for channel in self.list_channels(project_id).await? {
            let monitor = self.monitor_status_unchecked(channel.id).await;
            channels.push(ChannelStatus { channel, monitor });
        }
        let article_count = self
            .store
            .list_articles(project_id)
            .await
            .map_err(AutopilotError::persistence)?
            .len();
        Ok(ProjectOverview {
            project: redact(project),
            channels,
            article_count,
        })
    }

    pub async fn list_articles(&self, project_id: ProjectId) -> Result<Vec<Article>> {
        self.require_project(project_id).await?;
        self.store
            .list_articles(project_id)
            .await
            .map_err(AutopilotError::persistence)
    }

    pub async fn create_project(&self, project: NewProject) -> Result<Project> {
        if project.name.trim().is_empty() {
            return Err(AutopilotError::InvalidRequest("project name is empty".to_string()));
        }
        if project.site.base_url.trim().is_empty() {
            return Err(AutopilotError::InvalidRequest("site URL is empty".to_string()));
        }
        let created = self
            .store
            .create_project(project)
            .await
            .map_err(AutopilotError::persistence)?;
        tracing::info!(project_id = created.id, name = %created.name, "project created");
        Ok(redact(created))
    }

    pub async fn update_project(&self, project_id: ProjectId, update: ProjectUpdate) -> Result<Project> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AutopilotError::InvalidRequest("project name is empty".to_string()));
        }
        self.store
            .update_project(project_id, update)
            .await
            .map_err(AutopilotError::persistence)?
            .map(redact)
            .ok_or(AutopilotError::ProjectNotFound(project_id))
    }

    /// Stops the project's monitors and scheduled searches and waits for them,
    /// then removes it with its channels, site and dedup records.
    pub async fn delete_project(&self, project_id: ProjectId) -> Result<()> {
        self.require_project(project_id).await?;
        for channel in self.list_channels(project_id).await? {
            self.supervisor.stop_and_join(channel.id).await;
        }
        if let Some(scheduler) = &self.scheduler {
            if scheduler.schedule().project_id == project_id {
                scheduler.shutdown().await;
            }
        }
        let deleted = self
            .store
            .delete_project(project_id)
            .await
            .map_err(AutopilotError::persistence)?;
        if !deleted {
            return Err(AutopilotError::ProjectNotFound(project_id));
        }
        tracing::info!(project_id, "project deleted");
        Ok(())
    }

    pub async fn add_channel(&self, project_id: ProjectId, channel: NewChannel, start: bool) -> Result<ChannelStatus> {
        let source = channel.source.trim().to_string();
        if source.is_empty() {
            return Err(AutopilotError::InvalidRequest("channel identifier is empty".to_string()));
        }
        self.require_project(project_id).await?;
        if self.list_channels(project_id).await?.iter().any(|c| c.source == source) {
            return Err(AutopilotError::InvalidRequest(format!(
                "channel {} already exists in project {}",
                source, project_id
            )));
        }
        let created = self
            .store
            .add_channel(
                project_id,
                NewChannel {
                    source,
                    auto_publish: channel.auto_publish,
                },
            )
            .await
            .map_err(AutopilotError::persistence)?;
        tracing::info!(project_id, channel_id = created.id, source = %created.source, "channel added");

        let monitor = if start {
            self.start_monitoring(project_id, created.id).await?
        } else {
            MonitorResponse::from_snapshot(created.id, None)
        };
        let channel = self.require_channel(project_id, created.id).await?;
        Ok(ChannelStatus { channel, monitor })
    }

    /// Stops the channel's monitor and waits for any tick in flight, then
    /// deletes the channel and its dedup records. Articles are kept.
    pub async fn remove_channel(&self, project_id: ProjectId, channel_id: ChannelId) -> Result<()> {
        let channel = self.require_channel(project_id, channel_id).await?;
        self.supervisor.stop_and_join(channel.id).await;
        let deleted = self
            .store
            .delete_channel(channel.id)
            .await
            .map_err(AutopilotError::persistence)?;
        if !deleted {
            return Err(AutopilotError::ChannelNotFound(channel_id));
        }
        tracing::info!(project_id, channel_id, source = %channel.source, "channel removed");
        Ok(())
    }

    pub async fn set_auto_publish(&self, project_id: ProjectId, channel_id: ChannelId, auto_publish: bool) -> Result<Channel> {
        self.require_channel(project_id, channel_id).await?;
        self.store
            .set_channel_auto_publish(channel_id, auto_publish)
            .await
            .map_err(AutopilotError::persistence)?;
        self.require_channel(project_id, channel_id).await
    }

    pub async fn test_connection(&self, project_id: ProjectId) -> Result<ConnectionResponse> {
        let project = self.require_project(project_id).await?;
        let publisher = self.publishers.for_site(&project.site);
        Ok(match publisher.test_connection().await {
            Ok(()) => ConnectionResponse {
                ok: true,
                message: format!("connected to {}", project.site.base_url),
            },
            Err(e) => {
                tracing::warn!(project_id, error = %e, "WordPress connection test failed");
                ConnectionResponse {
                    ok: false,
                    message: format!("{:#}", e),
                }
            }
        })
    }
}

fn redact(project: Project) -> Project {
    Project {
        site: project.site.redacted(),
        ..project
    }
}
