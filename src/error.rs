use crate::model::{ChannelId, ProjectId};
use serde::{Deserialize, Serialize};

/// Errors surfaced by the autopilot core and its facade.
///
/// Per-video pipeline failures are not returned through this type on the
/// monitor/batch paths; they are folded into a record outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum AutopilotError {
    #[error("feed fetch failed for {source_ref}: {message}")]
    FeedFetchFailed { source_ref: String, message: String },

    #[error("transcript unavailable: {0}")]
    TranscriptUnavailable(String),

    #[error("article generation failed: {0}")]
    GenerationFailed(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AutopilotError {
    /// Wrap a storage-layer error, keeping the full context chain.
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::PersistenceFailed(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, AutopilotError>;

/// Why a pipeline run ended with an `error` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    TranscriptUnavailable,
    GenerationFailed,
    PersistenceFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::TranscriptUnavailable => "transcript_unavailable",
            FailureReason::GenerationFailed => "generation_failed",
            FailureReason::PersistenceFailed => "persistence_failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "transcript_unavailable" => Some(FailureReason::TranscriptUnavailable),
            "generation_failed" => Some(FailureReason::GenerationFailed),
            "persistence_failed" => Some(FailureReason::PersistenceFailed),
            _ => None,
        }
    }
}
