use super::Store;
use crate::model::{
    search_dedup_key, Article, Channel, ChannelId, MonitoringState, NewArticle, NewChannel,
    NewProject, ProcessedVideoRecord, Project, ProjectId, ProjectUpdate, WordPressSite,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    next_id: i64,
    projects: BTreeMap<ProjectId, Project>,
    channels: BTreeMap<ChannelId, Channel>,
    articles: Vec<Article>,
    records: HashMap<(String, String), ProcessedVideoRecord>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, project: NewProject) -> Result<Project> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let site_id = inner.next_id();
        let created = Project {
            id,
            name: project.name,
            active: project.active,
            site: WordPressSite {
                id: site_id,
                name: project.site.name,
                base_url: project.site.base_url,
                username: project.site.username,
                app_password: project.site.app_password,
            },
            created_at: Utc::now(),
        };
        inner.projects.insert(id, created.clone());
        Ok(created)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.lock()?.projects.values().cloned().collect())
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>> {
        Ok(self.lock()?.projects.get(&id).cloned())
    }

    async fn update_project(&self, id: ProjectId, update: ProjectUpdate) -> Result<Option<Project>> {
        let mut inner = self.lock()?;
        let Some(project) = inner.projects.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            project.name = name;
        }
        if let Some(active) = update.active {
            project.active = active;
        }
        if let Some(site) = update.site {
            if let Some(name) = site.name {
                project.site.name = name;
            }
            if let Some(url) = site.base_url {
                project.site.base_url = url;
            }
            if let Some(user) = site.username {
                project.site.username = user;
            }
            if let Some(password) = site.app_password.filter(|p| !p.is_empty()) {
                project.site.app_password = password;
            }
        }
        Ok(Some(project.clone()))
    }

    async fn delete_project(&self, id: ProjectId) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.projects.remove(&id).is_none() {
            return Ok(false);
        }
        let mut keys: HashSet<String> = inner
            .channels
            .values()
            .filter(|c| c.project_id == id)
            .map(|c| c.dedup_key())
            .collect();
        keys.insert(search_dedup_key(id));
        inner.channels.retain(|_, c| c.project_id != id);
        inner.articles.retain(|a| a.project_id != id);
        inner.records.retain(|(key, _), _| !keys.contains(key));
        Ok(true)
    }

    async fn add_channel(&self, project_id: ProjectId, channel: NewChannel) -> Result<Channel> {
        let mut inner = self.lock()?;
        if !inner.projects.contains_key(&project_id) {
            anyhow::bail!("project {} does not exist", project_id);
        }
        if inner
            .channels
            .values()
            .any(|c| c.project_id == project_id && c.source == channel.source)
        {
            anyhow::bail!("channel {} already exists in project {}", channel.source, project_id);
        }
        let id = inner.next_id();
        let created = Channel {
            id,
            project_id,
            source: channel.source,
            auto_publish: channel.auto_publish,
            monitoring: MonitoringState::Stopped,
        };
        inner.channels.insert(id, created.clone());
        Ok(created)
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        Ok(self.lock()?.channels.get(&id).cloned())
    }

    async fn list_channels(&self, project_id: ProjectId) -> Result<Vec<Channel>> {
        Ok(self
            .lock()?
            .channels
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn set_channel_monitoring_state(&self, id: ChannelId, state: MonitoringState) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(match inner.channels.get_mut(&id) {
            Some(channel) => {
                channel.monitoring = state;
                true
            }
            None => false,
        })
    }

    async fn set_channel_auto_publish(&self, id: ChannelId, auto_publish: bool) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(match inner.channels.get_mut(&id) {
            Some(channel) => {
                channel.auto_publish = auto_publish;
                true
            }
            None => false,
        })
    }

    async fn delete_channel(&self, id: ChannelId) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(channel) = inner.channels.remove(&id) else {
            return Ok(false);
        };
        let key = channel.dedup_key();
        inner.records.retain(|(k, _), _| *k != key);
        Ok(true)
    }

    async fn get_record(&self, channel_key: &str, video_id: &str) -> Result<Option<ProcessedVideoRecord>> {
        let key = (channel_key.to_string(), video_id.to_string());
        Ok(self.lock()?.records.get(&key).cloned())
    }

    async fn record(&self, record: &ProcessedVideoRecord, replace_error: bool) -> Result<bool> {
        let mut inner = self.lock()?;
        let key = (record.channel_key.clone(), record.video_id.clone());
        let writable = match inner.records.get(&key) {
            None => true,
            Some(existing) => replace_error && existing.outcome.is_error(),
        };
        if writable {
            inner.records.insert(key, record.clone());
        }
        Ok(writable)
    }

    async fn save_article(&self, article: NewArticle) -> Result<Article> {
        let mut inner = self.lock()?;
        if !inner.projects.contains_key(&article.project_id) {
            anyhow::bail!("project {} does not exist", article.project_id);
        }
        let id = inner.next_id();
        let stored = Article {
            id,
            project_id: article.project_id,
            video_id: article.video_id,
            title: article.title,
            meta_description: article.meta_description,
            html: article.html,
            markdown: article.markdown,
            source_url: article.source_url,
            generated_at: article.generated_at,
        };
        inner.articles.push(stored.clone());
        Ok(stored)
    }

    async fn list_articles(&self, project_id: ProjectId) -> Result<Vec<Article>> {
        Ok(self
            .lock()?
            .articles
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }
}
