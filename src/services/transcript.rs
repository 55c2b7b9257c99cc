use super::TranscriptSource;
use crate::feed::markup::{decode_text, elements, normalize_whitespace};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;
use std::time::Duration;

const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse";

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    captions: Option<Captions>,
}

#[derive(Debug, Deserialize)]
struct Captions {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    tracklist: Tracklist,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tracklist {
    #[serde(default)]
    caption_tracks: Vec<CaptionTrack>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
    /// `asr` for auto-generated tracks.
    #[serde(default)]
    pub kind: Option<String>,
}

impl CaptionTrack {
    pub fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }

    fn matches(&self, lang: &str) -> bool {
        self.language_code == lang
            || self
                .language_code
                .strip_prefix(lang)
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

/// Caption client. Reads the caption tracks a video's watch page advertises,
/// then downloads the best track for the configured languages.
pub struct WatchPageTranscripts {
    client: Client,
    base_url: String,
    languages: Vec<String>,
    min_words: usize,
}

impl WatchPageTranscripts {
    pub fn new(base_url: &str, languages: Vec<String>, min_words: usize, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            languages,
            min_words,
        }
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .header("Accept-Language", "en-US")
            // Skips the EU consent interstitial.
            .header("Cookie", "CONSENT=YES+cb")
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("{} returned {}", url, status);
        }
        resp.text().await.context("failed to read response body")
    }
}

/// Caption tracks listed in a watch page's embedded player response.
pub fn caption_tracks(html: &str) -> Result<Vec<CaptionTrack>> {
    let doc = Html::parse_document(html);
    for script in elements(doc.root_element(), "script") {
        let code: String = script.text().collect();
        for (at, marker) in code.match_indices(PLAYER_RESPONSE_MARKER) {
            let rest = code[at + marker.len()..].trim_start();
            let Some(rest) = rest.strip_prefix('=') else { continue };
            let rest = rest.trim_start();
            if !rest.starts_with('{') {
                continue;
            }
            // The object is followed by more script; read exactly one JSON value.
            let player = serde_json::Deserializer::from_str(rest)
                .into_iter::<PlayerResponse>()
                .next()
                .context("empty player response")?
                .context("malformed player response")?;
            return Ok(player
                .captions
                .map(|c| c.tracklist.caption_tracks)
                .unwrap_or_default());
        }
    }
    anyhow::bail!("watch page has no player response (video unavailable or blocked)")
}

/// Best track for the preferred languages: for each language in order, a
/// manually created track wins over an auto-generated one.
pub fn pick_track<'a>(tracks: &'a [CaptionTrack], languages: &[String]) -> Option<&'a CaptionTrack> {
    languages.iter().find_map(|lang| {
        tracks
            .iter()
            .filter(|t| t.matches(lang))
            .min_by_key(|t| t.is_generated())
    })
}

/// Caption XML to a single whitespace-normalised line of text.
///
/// Caption text is frequently entity-encoded twice (`&amp;#39;`).
pub fn flatten_captions(xml: &str) -> String {
    let doc = Html::parse_document(xml);
    let joined = elements(doc.root_element(), "text")
        .map(|line| decode_text(&line.text().collect::<String>()))
        .collect::<Vec<_>>()
        .join(" ");
    normalize_whitespace(&joined)
}

#[async_trait]
impl TranscriptSource for WatchPageTranscripts {
    async fn fetch(&self, video_id: &str) -> Result<String> {
        let watch = format!("{}/watch", self.base_url);
        let page = self.get_text(&watch, &[("v", video_id)]).await?;
        let tracks = caption_tracks(&page)?;
        if tracks.is_empty() {
            anyhow::bail!("captions are disabled for {}", video_id);
        }
        let Some(track) = pick_track(&tracks, &self.languages) else {
            let available: Vec<_> = tracks.iter().map(|t| t.language_code.as_str()).collect();
            anyhow::bail!(
                "no transcript for {} in {} (available: {})",
                video_id,
                self.languages.join(", "),
                available.join(", ")
            );
        };

        let xml = self.get_text(&track.base_url, &[]).await?;
        let text = flatten_captions(&xml);
        let words = text.split_whitespace().count();
        tracing::debug!(
            video_id,
            lang = %track.language_code,
            generated = track.is_generated(),
            words,
            "transcript fetched"
        );
        if words < self.min_words {
            anyhow::bail!(
                "transcript for {} is too short ({} words, need {})",
                video_id,
                words,
                self.min_words
            );
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATCH_PAGE: &str = r##"<!DOCTYPE html><html><head><title>video</title></head><body>
<script nonce="x">var ytcfg = {"a": 1};</script>
<script nonce="x">var ytInitialPlayerResponse = {"videoDetails": {"videoId": "abcdefghijk"},
"captions": {"playerCaptionsTracklistRenderer": {"captionTracks": [
 {"baseUrl": "https://www.youtube.com/api/timedtext?v=abcdefghijk&lang=en&kind=asr", "languageCode": "en", "kind": "asr"},
 {"baseUrl": "https://www.youtube.com/api/timedtext?v=abcdefghijk&lang=fr", "languageCode": "fr"},
 {"baseUrl": "https://www.youtube.com/api/timedtext?v=abcdefghijk&lang=en-GB", "languageCode": "en-GB"}
]}}};var meta = document.createElement('meta');</script>
</body></html>"##;

    fn langs(list: &[&str]) -> Vec<String> {
        list.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_caption_tracks_from_watch_page() {
        let tracks = caption_tracks(WATCH_PAGE).unwrap();
        assert_eq!(tracks.len(), 3);
        assert!(tracks[0].is_generated());
        assert_eq!(
            tracks[1].base_url,
            "https://www.youtube.com/api/timedtext?v=abcdefghijk&lang=fr"
        );
    }

    #[test]
    fn test_watch_page_without_captions() {
        let page = r#"<script>var ytInitialPlayerResponse = {"videoDetails": {}};</script>"#;
        assert!(caption_tracks(page).unwrap().is_empty());
        assert!(caption_tracks("<html><body>consent</body></html>").is_err());
    }

    #[test]
    fn test_pick_track_prefers_manual_then_language_order() {
        let tracks = caption_tracks(WATCH_PAGE).unwrap();
        let en = pick_track(&tracks, &langs(&["en", "fr"])).unwrap();
        assert_eq!(en.language_code, "en-GB", "manual regional track beats asr");
        let fr = pick_track(&tracks, &langs(&["fr", "en"])).unwrap();
        assert_eq!(fr.language_code, "fr");
        assert!(pick_track(&tracks, &langs(&["de"])).is_none());
        assert!(pick_track(&tracks, &langs(&["e"])).is_none(), "prefix must end at a region tag");
    }

    #[test]
    fn test_flatten_captions() {
        let xml = r##"<?xml version="1.0" encoding="utf-8" ?><transcript>
<text start="0.5" dur="2.1">Hello   there,</text>
<text start="2.6" dur="1.9">it&amp;#39;s a
<font color="#E5E5E5">test</font></text>
</transcript>"##;
        assert_eq!(flatten_captions(xml), "Hello there, it's a test");
    }

    #[test]
    fn test_flatten_empty_document() {
        assert_eq!(flatten_captions("<transcript></transcript>"), "");
    }
}
