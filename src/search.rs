use crate::dedup::DedupStore;
use crate::error::{AutopilotError, FailureReason, Result};
use crate::feed::VideoSource;
use crate::model::{search_dedup_key, ChannelSettings, Outcome, VideoEntry};
use crate::pipeline::PipelineExecutor;
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

/// Random delay range between pipeline runs of a batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pacing {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Pacing {
    fn pick(&self) -> Option<std::time::Duration> {
        if self.max_ms == 0 {
            return None;
        }
        let lo = self.min_ms.min(self.max_ms);
        let ms = rand::thread_rng().gen_range(lo..=self.max_ms);
        Some(std::time::Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub max_results: usize,
    /// Candidates published more than this many days ago are dropped. 0 disables the filter.
    pub days_threshold: u32,
    pub settings: ChannelSettings,
    /// Stop once this many candidates succeeded. Later candidates are left out of the report.
    pub success_target: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchItem {
    pub video: VideoEntry,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// False when the outcome could not be written to the dedup store.
    pub recorded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchCounts {
    pub success: usize,
    pub error: usize,
    pub skipped: usize,
    pub unresolved: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub query: String,
    pub results: Vec<SearchItem>,
    pub counts: SearchCounts,
}

impl SearchCounts {
    pub fn add(&mut self, other: &SearchCounts) {
        self.success += other.success;
        self.error += other.error;
        self.skipped += other.skipped;
        self.unresolved += other.unresolved;
    }

    fn tally(results: &[SearchItem]) -> Self {
        let mut counts = Self::default();
        for item in results {
            match item.outcome {
                Outcome::Success { .. } => counts.success += 1,
                Outcome::Error { .. } => counts.error += 1,
                Outcome::Skipped => counts.skipped += 1,
            }
            if !item.recorded {
                counts.unresolved += 1;
            }
        }
        counts
    }
}

/// One-shot "search and generate" over a query's candidates, processed in order.
pub struct SearchBatchRunner {
    source: Arc<dyn VideoSource>,
    dedup: DedupStore,
    pipeline: Arc<PipelineExecutor>,
    pacing: Pacing,
}

impl SearchBatchRunner {
    pub fn new(
        source: Arc<dyn VideoSource>,
        dedup: DedupStore,
        pipeline: Arc<PipelineExecutor>,
        pacing: Pacing,
    ) -> Self {
        Self {
            source,
            dedup,
            pipeline,
            pacing,
        }
    }

    pub async fn run(&self, params: SearchParams) -> Result<SearchReport> {
        let query = params.query.trim();
        if query.is_empty() {
            return Err(AutopilotError::InvalidRequest("search query is empty".to_string()));
        }
        if params.max_results == 0 {
            return Err(AutopilotError::InvalidRequest("max_results must be at least 1".to_string()));
        }

        let mut candidates = self
            .source
            .search(query, params.max_results)
            .await
            .map_err(|e| AutopilotError::FeedFetchFailed {
                source_ref: format!("search \"{}\"", query),
                message: format!("{:#}", e),
            })?;
        candidates.truncate(params.max_results);
        Ok(self
            .process_batch(query, candidates, params.days_threshold, &params.settings, params.success_target)
            .await)
    }

    /// Generate from the currently popular videos of `region`, like a search batch.
    pub async fn run_trending(
        &self,
        region: &str,
        max_results: usize,
        settings: &ChannelSettings,
    ) -> Result<SearchReport> {
        if max_results == 0 {
            return Err(AutopilotError::InvalidRequest("max_results must be at least 1".to_string()));
        }
        let label = format!("trending:{}", region);
        let mut candidates = self
            .source
            .trending(region, max_results)
            .await
            .map_err(|e| AutopilotError::FeedFetchFailed {
                source_ref: label.clone(),
                message: format!("{:#}", e),
            })?;
        candidates.truncate(max_results);
        Ok(self.process_batch(&label, candidates, 0, settings, None).await)
    }

    async fn process_batch(
        &self,
        query: &str,
        mut candidates: Vec<VideoEntry>,
        days_threshold: u32,
        settings: &ChannelSettings,
        success_target: Option<usize>,
    ) -> SearchReport {
        let found = candidates.len();
        if days_threshold > 0 {
            let cutoff = Utc::now() - Duration::days(i64::from(days_threshold));
            candidates.retain(|c| c.published_at >= cutoff);
        }
        tracing::info!(
            query,
            found,
            eligible = candidates.len(),
            days = days_threshold,
            "search batch start"
        );

        let key = search_dedup_key(settings.project_id);
        let mut results = Vec::with_capacity(candidates.len());
        let mut ran_pipeline = false;
        let mut succeeded = 0usize;
        for video in candidates {
            if success_target.is_some_and(|target| succeeded >= target) {
                break;
            }
            let item = self.process_candidate(&key, video, settings, &mut ran_pipeline).await;
            if matches!(item.outcome, Outcome::Success { .. }) {
                succeeded += 1;
            }
            results.push(item);
        }

        let counts = SearchCounts::tally(&results);
        tracing::info!(
            query,
            success = counts.success,
            error = counts.error,
            skipped = counts.skipped,
            unresolved = counts.unresolved,
            "search batch done"
        );
        SearchReport {
            query: query.to_string(),
            results,
            counts,
        }
    }

    async fn process_candidate(
        &self,
        key: &str,
        video: VideoEntry,
        settings: &ChannelSettings,
        ran_pipeline: &mut bool,
    ) -> SearchItem {
        match self.dedup.has(key, &video.id).await {
            Ok(true) => {
                tracing::debug!(video_id = %video.id, "already processed, skipped");
                return SearchItem {
                    video,
                    outcome: Outcome::Skipped,
                    recorded: true,
                };
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(video_id = %video.id, error = %e, "dedup lookup failed");
                return SearchItem {
                    video,
                    outcome: Outcome::Error {
                        reason: FailureReason::PersistenceFailed,
                        message: e.to_string(),
                    },
                    recorded: false,
                };
            }
        }

        if *ran_pipeline {
            if let Some(delay) = self.pacing.pick() {
                tokio::time::sleep(delay).await;
            }
        }
        *ran_pipeline = true;

        let result = self.pipeline.process(&video, settings).await;
        let recorded = match self.dedup.record(key, &video.id, result.outcome.clone()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(video_id = %video.id, error = %e, "failed to record search outcome");
                false
            }
        };
        SearchItem {
            video,
            outcome: result.outcome,
            recorded,
        }
    }
}
