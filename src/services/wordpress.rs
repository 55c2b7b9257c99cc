use super::{Publisher, PublisherFactory};
use crate::model::{Article, WordPressSite};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Category {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    #[serde(default)]
    name: String,
}

/// WordPress REST API client for one site, authenticated with an application password.
pub struct WordPressClient {
    client: Client,
    api_url: String,
    auth_header: String,
    post_status: String,
}

impl WordPressClient {
    pub fn new(site: &WordPressSite, post_status: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        let credentials = format!("{}:{}", site.username, site.app_password);
        Self {
            client,
            api_url: format!("{}/wp-json/wp/v2", site.base_url.trim_end_matches('/')),
            auth_header: format!("Basic {}", STANDARD.encode(credentials)),
            post_status: post_status.to_string(),
        }
    }

    /// Ids of the named categories that exist on the site. Unknown names are skipped.
    async fn category_ids(&self, names: &[String]) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for name in names {
            let wanted = name.trim();
            if wanted.is_empty() {
                continue;
            }
            let resp = self
                .client
                .get(format!("{}/categories", self.api_url))
                .header("Authorization", &self.auth_header)
                .query(&[("search", wanted), ("per_page", "100")])
                .send()
                .await
                .context("failed to query WordPress categories")?;
            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("WordPress category lookup failed ({})", status);
            }
            let found: Vec<Category> = resp
                .json()
                .await
                .context("failed to parse WordPress categories")?;
            match match_category(&found, wanted) {
                Some(id) => ids.push(id),
                None => tracing::warn!(category = %wanted, "category not found on site, skipping"),
            }
        }
        Ok(ids)
    }
}

fn match_category(found: &[Category], wanted: &str) -> Option<u64> {
    found
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(wanted))
        .map(|c| c.id)
}

#[async_trait]
impl Publisher for WordPressClient {
    async fn test_connection(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/users/me", self.api_url))
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .context("failed to reach WordPress")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("WordPress authentication failed ({}): {}", status, body);
        }
        let user: CurrentUser = resp.json().await.context("failed to parse WordPress user")?;
        tracing::info!(api_url = %self.api_url, user = %user.name, "WordPress connection ok");
        Ok(())
    }

    async fn publish(&self, article: &Article, categories: &[String]) -> Result<u64> {
        let category_ids = self.category_ids(categories).await?;
        let body = serde_json::json!({
            "title": article.title,
            "content": article.html,
            "excerpt": article.meta_description,
            "status": self.post_status,
            "categories": category_ids,
        });
        let resp = self
            .client
            .post(format!("{}/posts", self.api_url))
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send()
            .await
            .context("failed to reach WordPress")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("WordPress post creation failed ({}): {}", status, body);
        }
        let post: CreatedPost = resp
            .json()
            .await
            .context("failed to parse WordPress post response")?;
        Ok(post.id)
    }
}

/// Builds a `WordPressClient` per project site.
pub struct WordPressFactory {
    post_status: String,
    timeout: Duration,
}

impl WordPressFactory {
    pub fn new(post_status: &str, timeout: Duration) -> Self {
        Self {
            post_status: post_status.to_string(),
            timeout,
        }
    }
}

impl PublisherFactory for WordPressFactory {
    fn for_site(&self, site: &WordPressSite) -> Arc<dyn Publisher> {
        Arc::new(WordPressClient::new(site, &self.post_status, self.timeout))
    }
}
