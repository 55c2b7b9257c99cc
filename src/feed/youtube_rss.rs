use super::markup::{elements, first, first_text};
use super::urls::{feed_url, watch_url};
use crate::model::VideoEntry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::Html;
use std::time::Duration;

/// Client for the public per-channel Atom feed (no API key needed).
pub struct YouTubeRss {
    client: Client,
    base_url: String,
}

impl YouTubeRss {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch(&self, source: &str) -> Result<Vec<VideoEntry>> {
        let url = feed_url(source, &self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach channel feed {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("channel feed returned {} for {}", status, url);
        }
        let body = resp.text().await.context("failed to read channel feed body")?;
        parse_feed(&body)
    }
}

/// Parse an Atom channel feed. Entries missing an id or a valid date are dropped.
pub fn parse_feed(body: &str) -> Result<Vec<VideoEntry>> {
    let doc = Html::parse_document(body);
    let Some(feed) = first(doc.root_element(), "feed") else {
        anyhow::bail!("response is not an Atom feed");
    };
    let feed_channel = first_text(feed, "yt:channelid").unwrap_or_default();

    let mut entries = Vec::new();
    for entry in elements(feed, "entry") {
        let Some(id) = first_text(entry, "yt:videoid").filter(|id| !id.is_empty()) else {
            tracing::debug!("feed entry without video id skipped");
            continue;
        };
        let published_at = match first_text(entry, "published")
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
        {
            Some(Ok(ts)) => ts.with_timezone(&Utc),
            _ => {
                tracing::debug!(video_id = %id, "feed entry without valid published date skipped");
                continue;
            }
        };
        let url = elements(entry, "link")
            .find(|link| link.value().attr("rel") == Some("alternate"))
            .and_then(|link| link.value().attr("href"))
            .map(str::to_string)
            .unwrap_or_else(|| watch_url(&id));
        entries.push(VideoEntry {
            channel_id: first_text(entry, "yt:channelid").unwrap_or_else(|| feed_channel.clone()),
            title: first_text(entry, "title").unwrap_or_default(),
            published_at,
            url,
            id,
        });
    }
    Ok(entries)
}
