use crate::error::{AutopilotError, Result};
use crate::model::{Outcome, ProcessedVideoRecord};
use crate::store::Store;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

/// Whether an `error` outcome counts as processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Failed videos stay eligible and are picked up again on a later run.
    #[default]
    Retry,
    /// Any recorded outcome blocks reprocessing.
    Block,
}

/// Durable record of which (channel, video) pairs were already handled.
#[derive(Clone)]
pub struct DedupStore {
    store: Arc<dyn Store>,
    policy: ErrorPolicy,
}

impl DedupStore {
    pub fn new(store: Arc<dyn Store>, policy: ErrorPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// True when the pipeline must not run again for this pair.
    pub async fn has(&self, channel_key: &str, video_id: &str) -> Result<bool> {
        let record = self
            .store
            .get_record(channel_key, video_id)
            .await
            .map_err(AutopilotError::persistence)?;
        Ok(match record {
            None => false,
            Some(r) if r.outcome.is_error() => self.policy == ErrorPolicy::Block,
            Some(_) => true,
        })
    }

    /// Idempotent: the first terminal write wins. Returns whether this call wrote.
    ///
    /// Storage failures are returned, never swallowed.
    pub async fn record(&self, channel_key: &str, video_id: &str, outcome: Outcome) -> Result<bool> {
        let record = ProcessedVideoRecord {
            channel_key: channel_key.to_string(),
            video_id: video_id.to_string(),
            outcome,
            recorded_at: Utc::now(),
        };
        let written = self
            .store
            .record(&record, self.policy == ErrorPolicy::Retry)
            .await
            .map_err(AutopilotError::persistence)?;
        if !written {
            tracing::debug!(channel_key, video_id, "processed video already recorded");
        }
        Ok(written)
    }
}
