// Shared in-process fakes for the integration tests. No network.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use yt_autopilot::api::{Autopilot, AutopilotOptions};
use yt_autopilot::dedup::ErrorPolicy;
use yt_autopilot::feed::VideoSource;
use yt_autopilot::model::{
    Article, Channel, ChannelId, GeneratedArticle, MonitoringState, NewArticle, NewChannel,
    NewProject, NewSite, ProcessedVideoRecord, Project, ProjectId, ProjectUpdate, VideoEntry,
    WordPressSite,
};
use yt_autopilot::search::Pacing;
use yt_autopilot::services::{ArticleGenerator, Publisher, PublisherFactory, TranscriptSource};
use yt_autopilot::store::{MemoryStore, Store};

pub fn video(id: &str, minutes_ago: i64) -> VideoEntry {
    VideoEntry {
        id: id.to_string(),
        channel_id: "UCfake".to_string(),
        published_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        title: format!("video {}", id),
        url: format!("https://www.youtube.com/watch?v={}", id),
    }
}

pub fn new_project(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        active: true,
        site: NewSite {
            name: format!("{} blog", name),
            base_url: format!("https://{}.example.com", name),
            username: "editor".to_string(),
            app_password: "app pass word".to_string(),
        },
    }
}

pub fn options() -> AutopilotOptions {
    AutopilotOptions {
        poll_interval: Duration::from_millis(25),
        lookback: None,
        error_policy: ErrorPolicy::Retry,
        default_categories: vec!["Videos".to_string()],
        default_max_results: 5,
        default_days_threshold: 7,
        pacing: Pacing::default(),
        schedule: None,
    }
}

/// Poll `check` until it returns true, failing the test after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Feeds keyed by channel source, plus a fixed search result list.
#[derive(Default)]
pub struct FakeVideos {
    feeds: Mutex<HashMap<String, Vec<VideoEntry>>>,
    search_results: Mutex<Vec<VideoEntry>>,
    trending_results: Mutex<Vec<VideoEntry>>,
    /// Queries whose search fails.
    pub failing_queries: Mutex<HashSet<String>>,
    pub searches: Mutex<Vec<(String, usize)>>,
    pub feed_down: AtomicBool,
    pub search_down: AtomicBool,
    pub feed_polls: AtomicUsize,
}

impl FakeVideos {
    pub fn set_feed(&self, source: &str, entries: Vec<VideoEntry>) {
        self.feeds.lock().unwrap().insert(source.to_string(), entries);
    }

    pub fn set_search(&self, entries: Vec<VideoEntry>) {
        *self.search_results.lock().unwrap() = entries;
    }

    pub fn set_trending(&self, entries: Vec<VideoEntry>) {
        *self.trending_results.lock().unwrap() = entries;
    }

    pub fn searches(&self) -> Vec<(String, usize)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoSource for FakeVideos {
    async fn resolve_channel_feed(&self, source: &str) -> anyhow::Result<Vec<VideoEntry>> {
        self.feed_polls.fetch_add(1, Ordering::SeqCst);
        if self.feed_down.load(Ordering::SeqCst) {
            anyhow::bail!("feed unreachable");
        }
        Ok(self.feeds.lock().unwrap().get(source).cloned().unwrap_or_default())
    }

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<VideoEntry>> {
        self.searches.lock().unwrap().push((query.to_string(), max_results));
        if self.search_down.load(Ordering::SeqCst) || self.failing_queries.lock().unwrap().contains(query) {
            anyhow::bail!("quota exceeded");
        }
        let mut results = self.search_results.lock().unwrap().clone();
        results.truncate(max_results);
        Ok(results)
    }

    async fn trending(&self, _region: &str, max_results: usize) -> anyhow::Result<Vec<VideoEntry>> {
        let mut results = self.trending_results.lock().unwrap().clone();
        results.truncate(max_results);
        Ok(results)
    }
}

/// Holds a pipeline run inside its transcript stage until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Records every transcript fetch, which is the first stage of every pipeline run.
#[derive(Default)]
pub struct FakeTranscripts {
    pub calls: Mutex<Vec<String>>,
    pub unavailable: Mutex<HashSet<String>>,
    pub gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl FakeTranscripts {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, video_id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|v| *v == video_id).count()
    }

    pub fn gate(&self, video_id: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap().insert(video_id.to_string(), gate.clone());
        gate
    }
}

#[async_trait]
impl TranscriptSource for FakeTranscripts {
    async fn fetch(&self, video_id: &str) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(video_id.to_string());
        let gate = self.gates.lock().unwrap().get(video_id).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.unavailable.lock().unwrap().contains(video_id) {
            anyhow::bail!("captions disabled for {}", video_id);
        }
        Ok(format!("transcript for {} ", video_id).repeat(20))
    }
}

/// Fails generation for the listed ids; `fail_once` ids recover after one failure.
#[derive(Default)]
pub struct FakeGenerator {
    pub fail: Mutex<HashSet<String>>,
    pub fail_once: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ArticleGenerator for FakeGenerator {
    async fn generate(&self, _transcript: &str, video: &VideoEntry) -> anyhow::Result<GeneratedArticle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.lock().unwrap().contains(&video.id) {
            anyhow::bail!("model returned malformed JSON");
        }
        if self.fail_once.lock().unwrap().remove(&video.id) {
            anyhow::bail!("model timed out");
        }
        Ok(GeneratedArticle {
            title: format!("Article about {}", video.id),
            meta_description: "summary".to_string(),
            html: "<p>body</p>".to_string(),
            markdown: "body".to_string(),
            faq: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub down: AtomicBool,
    pub published: Mutex<Vec<(String, Vec<String>)>>,
    pub attempts: AtomicUsize,
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn test_connection(&self) -> anyhow::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("401 Unauthorized");
        }
        Ok(())
    }

    async fn publish(&self, article: &Article, categories: &[String]) -> anyhow::Result<u64> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("502 Bad Gateway");
        }
        self.published
            .lock()
            .unwrap()
            .push((article.video_id.clone(), categories.to_vec()));
        Ok(1000 + attempt as u64)
    }
}

pub struct FakePublisherFactory(pub Arc<FakePublisher>);

impl PublisherFactory for FakePublisherFactory {
    fn for_site(&self, _site: &WordPressSite) -> Arc<dyn Publisher> {
        self.0.clone()
    }
}

/// Memory store whose `record` can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_records: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn create_project(&self, project: NewProject) -> anyhow::Result<Project> {
        self.inner.create_project(project).await
    }
    async fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        self.inner.list_projects().await
    }
    async fn get_project(&self, id: ProjectId) -> anyhow::Result<Option<Project>> {
        self.inner.get_project(id).await
    }
    async fn update_project(&self, id: ProjectId, update: ProjectUpdate) -> anyhow::Result<Option<Project>> {
        self.inner.update_project(id, update).await
    }
    async fn delete_project(&self, id: ProjectId) -> anyhow::Result<bool> {
        self.inner.delete_project(id).await
    }
    async fn add_channel(&self, project_id: ProjectId, channel: NewChannel) -> anyhow::Result<Channel> {
        self.inner.add_channel(project_id, channel).await
    }
    async fn get_channel(&self, id: ChannelId) -> anyhow::Result<Option<Channel>> {
        self.inner.get_channel(id).await
    }
    async fn list_channels(&self, project_id: ProjectId) -> anyhow::Result<Vec<Channel>> {
        self.inner.list_channels(project_id).await
    }
    async fn set_channel_monitoring_state(&self, id: ChannelId, state: MonitoringState) -> anyhow::Result<bool> {
        self.inner.set_channel_monitoring_state(id, state).await
    }
    async fn set_channel_auto_publish(&self, id: ChannelId, auto_publish: bool) -> anyhow::Result<bool> {
        self.inner.set_channel_auto_publish(id, auto_publish).await
    }
    async fn delete_channel(&self, id: ChannelId) -> anyhow::Result<bool> {
        self.inner.delete_channel(id).await
    }
    async fn get_record(&self, channel_key: &str, video_id: &str) -> anyhow::Result<Option<ProcessedVideoRecord>> {
        self.inner.get_record(channel_key, video_id).await
    }
    async fn record(&self, record: &ProcessedVideoRecord, replace_error: bool) -> anyhow::Result<bool> {
        if self.fail_records.load(Ordering::SeqCst) {
            anyhow::bail!("database is locked");
        }
        self.inner.record(record, replace_error).await
    }
    async fn save_article(&self, article: NewArticle) -> anyhow::Result<Article> {
        self.inner.save_article(article).await
    }
    async fn list_articles(&self, project_id: ProjectId) -> anyhow::Result<Vec<Article>> {
        self.inner.list_articles(project_id).await
    }
}

/// A wired facade over fakes with one project.
pub struct Harness {
    pub autopilot: Autopilot,
    pub store: Arc<dyn Store>,
    pub videos: Arc<FakeVideos>,
    pub transcripts: Arc<FakeTranscripts>,
    pub generator: Arc<FakeGenerator>,
    pub publisher: Arc<FakePublisher>,
    pub project: Project,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), options()).await
    }

    pub async fn with_store(store: Arc<dyn Store>, options: AutopilotOptions) -> Self {
        let videos = Arc::new(FakeVideos::default());
        let transcripts = Arc::new(FakeTranscripts::default());
        let generator = Arc::new(FakeGenerator::default());
        let publisher = Arc::new(FakePublisher::default());
        let autopilot = Autopilot::new(
            store.clone(),
            videos.clone(),
            transcripts.clone(),
            generator.clone(),
            Arc::new(FakePublisherFactory(publisher.clone())),
            options,
        );
        let project = autopilot.create_project(new_project("main")).await.unwrap();
        Self {
            autopilot,
            store,
            videos,
            transcripts,
            generator,
            publisher,
            project,
        }
    }

    pub async fn channel(&self, source: &str, auto_publish: bool) -> Channel {
        self.autopilot
            .add_channel(
                self.project.id,
                NewChannel {
                    source: source.to_string(),
                    auto_publish,
                },
                false,
            )
            .await
            .unwrap()
            .channel
    }

    pub async fn ticks(&self, channel_id: ChannelId) -> u64 {
        self.autopilot
            .monitor_status(self.project.id, channel_id)
            .await
            .unwrap()
            .ticks
    }

    /// Wait until the channel's loop has completed `n` more ticks than now.
    pub async fn wait_ticks(&self, channel_id: ChannelId, n: u64) {
        let start = self.ticks(channel_id).await;
        eventually("monitor ticks", move || async move { self.ticks(channel_id).await >= start + n }).await;
    }

    pub async fn record(&self, channel: &Channel, video_id: &str) -> Option<ProcessedVideoRecord> {
        self.store.get_record(&channel.dedup_key(), video_id).await.unwrap()
    }
}
