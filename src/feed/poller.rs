use super::VideoSource;
use crate::dedup::DedupStore;
use crate::error::{AutopilotError, Result};
use crate::model::{Channel, VideoEntry};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Fetches a channel feed and keeps only entries that still need processing.
#[derive(Clone)]
pub struct FeedPoller {
    source: Arc<dyn VideoSource>,
    dedup: DedupStore,
    lookback: Option<Duration>,
}

impl FeedPoller {
    pub fn new(source: Arc<dyn VideoSource>, dedup: DedupStore, lookback: Option<Duration>) -> Self {
        Self {
            source,
            dedup,
            lookback,
        }
    }

    /// Unprocessed entries, oldest first.
    ///
    /// Feeds list newest first; the sort is stable so entries sharing a
    /// timestamp keep their feed order.
    pub async fn poll(&self, channel: &Channel) -> Result<Vec<VideoEntry>> {
        let mut entries = self
            .source
            .resolve_channel_feed(&channel.source)
            .await
            .map_err(|e| AutopilotError::FeedFetchFailed {
                source_ref: channel.source.clone(),
                message: format!("{:#}", e),
            })?;
        let fetched = entries.len();

        entries.sort_by_key(|e| e.published_at);
        if let Some(window) = self.lookback {
            let cutoff = Utc::now() - window;
            entries.retain(|e| e.published_at >= cutoff);
        }

        let key = channel.dedup_key();
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.id.clone()) {
                continue;
            }
            if self.dedup.has(&key, &entry.id).await? {
                tracing::debug!(channel_id = channel.id, video_id = %entry.id, "already processed");
                continue;
            }
            fresh.push(entry);
        }

        tracing::debug!(
            channel_id = channel.id,
            fetched,
            fresh = fresh.len(),
            "feed polled"
        );
        Ok(fresh)
    }
}
