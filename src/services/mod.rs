pub mod generation;
pub mod transcript;
pub mod wordpress;

use crate::model::{Article, GeneratedArticle, VideoEntry, WordPressSite};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use generation::MistralGenerator;
pub use transcript::WatchPageTranscripts;
pub use wordpress::{WordPressClient, WordPressFactory};

/// Plain-text transcript for a video.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch(&self, video_id: &str) -> Result<String>;
}

/// Turns a transcript into a structured article.
#[async_trait]
pub trait ArticleGenerator: Send + Sync {
    async fn generate(&self, transcript: &str, video: &VideoEntry) -> Result<GeneratedArticle>;
}

/// A WordPress site articles can be pushed to.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn test_connection(&self) -> Result<()>;
    /// Create a post and return its id.
    async fn publish(&self, article: &Article, categories: &[String]) -> Result<u64>;
}

/// Builds a publisher for a project's site.
pub trait PublisherFactory: Send + Sync {
    fn for_site(&self, site: &WordPressSite) -> Arc<dyn Publisher>;
}
