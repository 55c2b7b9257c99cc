use crate::error::FailureReason;
use crate::model::{Article, ChannelSettings, NewArticle, Outcome, PublishStatus, VideoEntry};
use crate::services::{ArticleGenerator, PublisherFactory, TranscriptSource};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Summary of one pipeline run, ready to be recorded by the caller.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub video_id: String,
    pub outcome: Outcome,
    /// The stored article, present exactly when the outcome is `success`.
    pub article: Option<Article>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    fn failed(entry: &VideoEntry, reason: FailureReason, message: String) -> Self {
        tracing::warn!(
            video_id = %entry.id,
            reason = reason.as_str(),
            error = %message,
            "pipeline failed"
        );
        Self {
            video_id: entry.id.clone(),
            outcome: Outcome::Error { reason, message },
            article: None,
            finished_at: Utc::now(),
        }
    }
}

/// Runs one video through transcript -> generation -> persistence -> optional publish.
///
/// Never returns an error: every stage failure is folded into the outcome so
/// one video cannot abort its siblings.
pub struct PipelineExecutor {
    transcripts: Arc<dyn TranscriptSource>,
    generator: Arc<dyn ArticleGenerator>,
    store: Arc<dyn Store>,
    publishers: Arc<dyn PublisherFactory>,
}

impl PipelineExecutor {
    pub fn new(
        transcripts: Arc<dyn TranscriptSource>,
        generator: Arc<dyn ArticleGenerator>,
        store: Arc<dyn Store>,
        publishers: Arc<dyn PublisherFactory>,
    ) -> Self {
        Self {
            transcripts,
            generator,
            store,
            publishers,
        }
    }

    pub async fn process(&self, entry: &VideoEntry, settings: &ChannelSettings) -> PipelineResult {
        tracing::debug!(video_id = %entry.id, title = %entry.title, "pipeline start");

        let transcript = match self.transcripts.fetch(&entry.id).await {
            Ok(text) => text,
            Err(e) => {
                return PipelineResult::failed(entry, FailureReason::TranscriptUnavailable, format!("{:#}", e))
            }
        };

        let generated = match self.generator.generate(&transcript, entry).await {
            Ok(g) => g,
            Err(e) => {
                return PipelineResult::failed(entry, FailureReason::GenerationFailed, format!("{:#}", e))
            }
        };

        let new_article = NewArticle {
            project_id: settings.project_id,
            video_id: entry.id.clone(),
            title: generated.title,
            meta_description: generated.meta_description,
            html: generated.html,
            markdown: generated.markdown,
            source_url: entry.url.clone(),
            generated_at: Utc::now(),
        };
        let article = match self.store.save_article(new_article).await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(video_id = %entry.id, error = %e, "article persistence failed");
                return PipelineResult::failed(entry, FailureReason::PersistenceFailed, format!("{:#}", e));
            }
        };

        let publish = if settings.auto_publish {
            self.publish(&article, settings).await
        } else {
            PublishStatus::NotRequested
        };

        tracing::info!(
            video_id = %entry.id,
            article_id = article.id,
            publish = ?publish,
            "article generated"
        );
        PipelineResult {
            video_id: entry.id.clone(),
            outcome: Outcome::Success {
                article_id: article.id,
                publish,
            },
            article: Some(article),
            finished_at: Utc::now(),
        }
    }

    /// A publish failure leaves the stored article and the `success` outcome intact.
    async fn publish(&self, article: &Article, settings: &ChannelSettings) -> PublishStatus {
        let publisher = self.publishers.for_site(&settings.site);
        match publisher.publish(article, &settings.categories).await {
            Ok(post_id) => {
                tracing::info!(article_id = article.id, post_id, site = %settings.site.name, "article published");
                PublishStatus::Published { post_id }
            }
            Err(e) => {
                tracing::warn!(article_id = article.id, site = %settings.site.name, error = %e, "publish failed");
                PublishStatus::Failed {
                    message: format!("{:#}", e),
                }
            }
        }
    }
}
