use super::urls::watch_url;
use super::markup::decode_text;
use crate::model::VideoEntry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Hard cap of the Data API v3 `maxResults` parameter.
const MAX_RESULTS_CAP: usize = 50;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

/// `videos?chart=mostPopular` returns the id as a bare string.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    #[serde(default)]
    items: Vec<ChartItem>,
}

#[derive(Debug, Deserialize)]
struct ChartItem {
    id: String,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    published_at: DateTime<Utc>,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    title: String,
}

/// YouTube Data API v3 keyword search.
pub struct YouTubeSearch {
    client: Client,
    api_key: String,
    base_url: String,
}

impl YouTubeSearch {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<VideoEntry>> {
        let max = max_results.clamp(1, MAX_RESULTS_CAP).to_string();
        let body: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("order", "relevance"),
                    ("q", query),
                    ("maxResults", max.as_str()),
                ],
            )
            .await?;
        Ok(into_entries(body))
    }

    /// Most popular videos in `region` right now.
    pub async fn trending(&self, region: &str, max_results: usize) -> Result<Vec<VideoEntry>> {
        let max = max_results.clamp(1, MAX_RESULTS_CAP).to_string();
        let body: ChartResponse = self
            .get(
                "videos",
                &[
                    ("part", "snippet"),
                    ("chart", "mostPopular"),
                    ("regionCode", region),
                    ("maxResults", max.as_str()),
                ],
            )
            .await?;
        Ok(chart_entries(body))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .with_context(|| format!("failed to reach YouTube {} API", path))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("YouTube {} API error ({}): {}", path, status, body);
        }
        resp.json()
            .await
            .with_context(|| format!("failed to parse YouTube {} response", path))
    }
}

fn entry(id: String, snippet: Snippet) -> VideoEntry {
    VideoEntry {
        url: watch_url(&id),
        channel_id: snippet.channel_id,
        published_at: snippet.published_at,
        title: decode_text(&snippet.title),
        id,
    }
}

fn into_entries(resp: SearchResponse) -> Vec<VideoEntry> {
    resp.items
        .into_iter()
        .filter_map(|item| Some(entry(item.id.video_id?, item.snippet)))
        .collect()
}

fn chart_entries(resp: ChartResponse) -> Vec<VideoEntry> {
    resp.items
        .into_iter()
        .map(|item| entry(item.id, item.snippet))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_parsing() {
        let json = r#"{
            "kind": "youtube#searchListResponse",
            "items": [
                {
                    "id": {"kind": "youtube#video", "videoId": "abcdefghijk"},
                    "snippet": {
                        "publishedAt": "2026-10-10T09:00:00Z",
                        "channelId": "UCone",
                        "title": "Rust &amp; async"
                    }
                },
                {
                    "id": {"kind": "youtube#channel", "channelId": "UCtwo"},
                    "snippet": {"publishedAt": "2026-10-09T09:00:00Z", "title": "A channel"}
                }
            ]
        }"#;
        let resp: SearchResponse = serde_json::from_str(json).unwrap();
        let entries = into_entries(resp);
        assert_eq!(entries.len(), 1, "non-video items are dropped");
        assert_eq!(entries[0].id, "abcdefghijk");
        assert_eq!(entries[0].title, "Rust & async");
        assert_eq!(entries[0].url, "https://www.youtube.com/watch?v=abcdefghijk");
    }

    #[test]
    fn test_chart_response_parsing() {
        let json = r#"{
            "kind": "youtube#videoListResponse",
            "items": [
                {
                    "id": "zyxwvutsrqp",
                    "snippet": {
                        "publishedAt": "2026-10-17T18:30:00Z",
                        "channelId": "UCpop",
                        "title": "Top &quot;10&quot; crates"
                    }
                }
            ]
        }"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        let entries = chart_entries(resp);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "zyxwvutsrqp");
        assert_eq!(entries[0].channel_id, "UCpop");
        assert_eq!(entries[0].title, "Top \"10\" crates");
    }

    #[test]
    fn test_empty_response() {
        let resp: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(into_entries(resp).is_empty());
    }
}
