pub mod markup;
pub mod poller;
pub mod urls;
pub mod youtube_rss;
pub mod youtube_search;

use crate::model::VideoEntry;
use anyhow::Result;
use async_trait::async_trait;
use youtube_rss::YouTubeRss;
use youtube_search::YouTubeSearch;

pub use poller::FeedPoller;

/// Resolves channel feeds and search queries into video entries.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Current entries of a channel feed, in source order.
    async fn resolve_channel_feed(&self, source: &str) -> Result<Vec<VideoEntry>>;
    /// Up to `max_results` candidates for `query`, in relevance order.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<VideoEntry>>;
    /// Up to `max_results` currently popular videos in `region`.
    async fn trending(&self, region: &str, max_results: usize) -> Result<Vec<VideoEntry>> {
        let _ = (region, max_results);
        anyhow::bail!("trending videos are not available from this source")
    }
}

/// RSS for channel feeds, the Data API for search (only when a key is configured).
pub struct YouTube {
    rss: YouTubeRss,
    search: Option<YouTubeSearch>,
}

impl YouTube {
    pub fn new(rss: YouTubeRss, search: Option<YouTubeSearch>) -> Self {
        Self { rss, search }
    }
}

#[async_trait]
impl VideoSource for YouTube {
    async fn resolve_channel_feed(&self, source: &str) -> Result<Vec<VideoEntry>> {
        self.rss.fetch(source).await
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<VideoEntry>> {
        match &self.search {
            Some(client) => client.search(query, max_results).await,
            None => anyhow::bail!("YouTube search is not configured (set YOUTUBE_API_KEY)"),
        }
    }

    async fn trending(&self, region: &str, max_results: usize) -> Result<Vec<VideoEntry>> {
        match &self.search {
            Some(client) => client.trending(region, max_results).await,
            None => anyhow::bail!("YouTube trending is not configured (set YOUTUBE_API_KEY)"),
        }
    }
}
