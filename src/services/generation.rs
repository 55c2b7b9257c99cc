use super::ArticleGenerator;
use crate::model::{FaqEntry, GeneratedArticle, VideoEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use pulldown_cmark::{html, Options, Parser};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a professional content writer who turns YouTube video \
transcripts into comprehensive blog articles. Cover every major point of the transcript, \
organise the article with clear Markdown headings, and expand each point with context. \
Reply with a single JSON object with the keys: \
\"title\" (compelling, includes the main topic), \
\"meta_description\" (at most 155 characters), \
\"content_markdown\" (the full article body in Markdown, without the title), \
\"faq\" (an array of 3 to 5 objects with \"question\" and \"answer\").";

const META_MAX_CHARS: usize = 155;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// JSON object the model is asked to produce.
#[derive(Debug, Deserialize)]
struct ArticlePayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    meta_description: String,
    #[serde(default)]
    content_markdown: String,
    #[serde(default)]
    faq: Vec<FaqEntry>,
}

/// Mistral chat-completions client producing structured articles.
pub struct MistralGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
}

impl MistralGenerator {
    pub fn new(api_key: String, base_url: &str, model: &str, temperature: f64, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        }
    }
}

#[async_trait]
impl ArticleGenerator for MistralGenerator {
    async fn generate(&self, transcript: &str, video: &VideoEntry) -> Result<GeneratedArticle> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Video title: {}\nVideo URL: {}\n\nTranscript:\n{}",
                        video.title, video.url, transcript
                    ),
                },
            ],
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach generation API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("generation API error ({}): {}", status, body);
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .context("failed to parse generation API response")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("generation API returned no choices")?;

        let article = parse_article(&content, &video.url)?;
        tracing::debug!(
            video_id = %video.id,
            title = %article.title,
            faq = article.faq.len(),
            "article generated"
        );
        Ok(article)
    }
}

/// Validate the model's JSON reply and render it.
pub fn parse_article(content: &str, source_url: &str) -> Result<GeneratedArticle> {
    let payload: ArticlePayload = serde_json::from_str(strip_code_fence(content))
        .context("generation reply is not the expected JSON object")?;

    let title = payload.title.trim().to_string();
    if title.is_empty() {
        anyhow::bail!("generated article has no title");
    }
    if payload.content_markdown.trim().is_empty() {
        anyhow::bail!("generated article has no content");
    }
    let faq: Vec<FaqEntry> = payload
        .faq
        .into_iter()
        .filter(|f| !f.question.trim().is_empty() && !f.answer.trim().is_empty())
        .collect();

    let markdown = compose_markdown(payload.content_markdown.trim(), &faq, source_url);
    Ok(GeneratedArticle {
        title,
        meta_description: truncate_chars(payload.meta_description.trim(), META_MAX_CHARS),
        html: render_html(&markdown),
        markdown,
        faq,
    })
}

fn compose_markdown(body: &str, faq: &[FaqEntry], source_url: &str) -> String {
    let mut md = String::from(body);
    if !faq.is_empty() {
        md.push_str("\n\n## Frequently Asked Questions\n");
        for entry in faq {
            md.push_str(&format!("\n### {}\n\n{}\n", entry.question.trim(), entry.answer.trim()));
        }
    }
    md.push_str(&format!("\n\n---\n\nSource: [watch the original video]({})\n", source_url));
    md
}

pub fn render_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Models sometimes wrap JSON in a ```json fence despite the response format.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches("json");
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
