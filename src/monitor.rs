use crate::dedup::DedupStore;
use crate::error::{AutopilotError, Result};
use crate::feed::FeedPoller;
use crate::model::{ChannelId, ChannelSettings};
use crate::pipeline::PipelineExecutor;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub type TaskId = u64;

/// Lifecycle of one channel's watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    pub fn is_live(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Running)
    }
}

/// Point-in-time view of a monitoring task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub state: LifecycleState,
    pub last_poll: Option<DateTime<Utc>>,
    /// Completed ticks, including ones that ended early on an error.
    pub ticks: u64,
    pub last_error: Option<String>,
}

struct TaskHandle {
    id: TaskId,
    cancel: CancellationToken,
    status: watch::Sender<TaskSnapshot>,
    join: JoinHandle<()>,
}

/// Settings shared by every channel loop.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub categories: Vec<String>,
}

/// Everything a loop needs to run a tick.
struct Worker {
    store: Arc<dyn Store>,
    poller: FeedPoller,
    pipeline: Arc<PipelineExecutor>,
    dedup: DedupStore,
    settings: MonitorSettings,
}

/// Live handles by channel, plus joins of replaced loops still winding down.
#[derive(Default)]
struct Tasks {
    live: HashMap<ChannelId, TaskHandle>,
    retiring: Vec<(ChannelId, JoinHandle<()>)>,
}

type Registry = Arc<Mutex<Tasks>>;

/// Owns the per-channel watch loops. At most one live loop per channel.
pub struct Supervisor {
    worker: Arc<Worker>,
    tasks: Registry,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn Store>,
        poller: FeedPoller,
        pipeline: Arc<PipelineExecutor>,
        dedup: DedupStore,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                poller,
                pipeline,
                dedup,
                settings,
            }),
            tasks: Arc::new(Mutex::new(Tasks::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start watching a channel. Returns the id of the live task, which is the
    /// existing one when the channel is already starting or running.
    pub async fn start(&self, channel_id: ChannelId) -> Result<TaskId> {
        let channel = self
            .worker
            .store
            .get_channel(channel_id)
            .await
            .map_err(AutopilotError::persistence)?
            .ok_or(AutopilotError::ChannelNotFound(channel_id))?;

        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.live.get(&channel_id) {
            if existing.status.borrow().state.is_live() {
                tracing::debug!(channel_id, task_id = existing.id, "monitor already running");
                return Ok(existing.id);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (status, _) = watch::channel(TaskSnapshot {
            task_id: id,
            state: LifecycleState::Starting,
            last_poll: None,
            ticks: 0,
            last_error: None,
        });

        let join = tokio::spawn(run_loop(
            self.worker.clone(),
            self.tasks.clone(),
            channel_id,
            id,
            cancel.clone(),
            status.clone(),
        ));

        let replaced = tasks.live.insert(
            channel_id,
            TaskHandle {
                id,
                cancel,
                status,
                join,
            },
        );
        tasks.retiring.retain(|(_, j)| !j.is_finished());
        if let Some(old) = replaced {
            tasks.retiring.push((channel_id, old.join));
        }
        tracing::info!(channel_id, task_id = id, source = %channel.source, "monitor starting");
        Ok(id)
    }

    /// Signal a channel's loop to stop after its current tick. No-op if absent.
    pub async fn stop(&self, channel_id: ChannelId) -> Option<TaskSnapshot> {
        let tasks = self.tasks.lock().await;
        let handle = tasks.live.get(&channel_id)?;
        handle.cancel.cancel();
        handle.status.send_modify(|s| {
            if s.state != LifecycleState::Stopped {
                s.state = LifecycleState::Stopping;
            }
        });
        tracing::info!(channel_id, task_id = handle.id, "monitor stopping");
        let snapshot = handle.status.borrow().clone();
        Some(snapshot)
    }

    /// Current snapshot, or `None` when the channel has no task.
    pub async fn status(&self, channel_id: ChannelId) -> Option<TaskSnapshot> {
        let tasks = self.tasks.lock().await;
        let snapshot = tasks.live.get(&channel_id).map(|h| h.status.borrow().clone());
        snapshot
    }

    /// Snapshots of every task currently registered.
    pub async fn list(&self) -> Vec<(ChannelId, TaskSnapshot)> {
        let tasks = self.tasks.lock().await;
        let mut all: Vec<_> = tasks
            .live
            .iter()
            .map(|(id, h)| (*id, h.status.borrow().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Stop a channel's loop and wait for it, and any replaced loop, to exit.
    pub async fn stop_and_join(&self, channel_id: ChannelId) {
        let (handle, mut joins) = {
            let mut tasks = self.tasks.lock().await;
            let (mine, others): (Vec<_>, Vec<_>) = std::mem::take(&mut tasks.retiring)
                .into_iter()
                .partition(|(id, _)| *id == channel_id);
            tasks.retiring = others;
            let joins: Vec<JoinHandle<()>> = mine.into_iter().map(|(_, j)| j).collect();
            (tasks.live.remove(&channel_id), joins)
        };
        if let Some(handle) = handle {
            handle.cancel.cancel();
            handle.status.send_modify(|s| s.state = LifecycleState::Stopping);
            tracing::info!(channel_id, task_id = handle.id, "monitor stopping for removal");
            joins.push(handle.join);
        }
        join_loops(joins).await;
    }

    /// Cancel every loop and wait for in-flight ticks to finish, including
    /// loops that were replaced by a restart while still stopping.
    pub async fn shutdown(&self) {
        let (handles, retiring): (Vec<TaskHandle>, Vec<JoinHandle<()>>) = {
            let mut tasks = self.tasks.lock().await;
            let handles = tasks.live.drain().map(|(_, h)| h).collect();
            let retiring = tasks.retiring.drain(..).map(|(_, j)| j).collect();
            (handles, retiring)
        };
        if handles.is_empty() && retiring.is_empty() {
            return;
        }
        tracing::info!(tasks = handles.len(), retiring = retiring.len(), "stopping all monitors");
        let mut joins = retiring;
        for handle in handles {
            handle.cancel.cancel();
            handle.status.send_modify(|s| s.state = LifecycleState::Stopping);
            joins.push(handle.join);
        }
        join_loops(joins).await;
    }
}

async fn join_loops(joins: Vec<JoinHandle<()>>) {
    for result in futures_util::future::join_all(joins).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "monitor task panicked");
        }
    }
}

async fn run_loop(
    worker: Arc<Worker>,
    tasks: Registry,
    channel_id: ChannelId,
    task_id: TaskId,
    cancel: CancellationToken,
    status: watch::Sender<TaskSnapshot>,
) {
    status.send_modify(|s| {
        if s.state == LifecycleState::Starting {
            s.state = LifecycleState::Running;
        }
    });

    let mut ticker = tokio::time::interval(worker.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Cancellation is only observed here, between ticks.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let keep_going = worker.tick(channel_id, &status).await;
        status.send_modify(|s| s.ticks += 1);
        if !keep_going {
            break;
        }
    }

    status.send_modify(|s| s.state = LifecycleState::Stopped);
    let mut registry = tasks.lock().await;
    if registry.live.get(&channel_id).map(|h| h.id) == Some(task_id) {
        registry.live.remove(&channel_id);
    }
    tracing::info!(channel_id, task_id, "monitor stopped");
}

impl Worker {
    /// One poll-and-process pass. Returns false when the loop should end.
    async fn tick(&self, channel_id: ChannelId, status: &watch::Sender<TaskSnapshot>) -> bool {
        let set_error = |msg: String| status.send_modify(|s| s.last_error = Some(msg));

        let channel = match self.store.get_channel(channel_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::info!(channel_id, "channel removed, ending monitor");
                return false;
            }
            Err(e) => {
                tracing::error!(channel_id, error = %e, "failed to load channel");
                set_error(format!("{:#}", e));
                return true;
            }
        };
        let project = match self.store.get_project(channel.project_id).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                tracing::info!(channel_id, project_id = channel.project_id, "project removed, ending monitor");
                return false;
            }
            Err(e) => {
                tracing::error!(channel_id, error = %e, "failed to load project");
                set_error(format!("{:#}", e));
                return true;
            }
        };
        if !project.active {
            tracing::debug!(channel_id, project_id = project.id, "project inactive, tick skipped");
            return true;
        }

        let polled = self.poller.poll(&channel).await;
        status.send_modify(|s| s.last_poll = Some(Utc::now()));
        let entries = match polled {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "feed poll failed, retrying next tick");
                set_error(e.to_string());
                return true;
            }
        };

        let settings = ChannelSettings {
            project_id: project.id,
            auto_publish: channel.auto_publish,
            categories: self.settings.categories.clone(),
            site: project.site,
        };
        let key = channel.dedup_key();
        let mut failures = 0usize;
        for entry in &entries {
            let result = self.pipeline.process(entry, &settings).await;
            if result.outcome.is_error() {
                failures += 1;
            }
            if let Err(e) = self.dedup.record(&key, &entry.id, result.outcome).await {
                tracing::error!(
                    channel_id,
                    video_id = %entry.id,
                    error = %e,
                    "failed to record outcome, abandoning tick"
                );
                set_error(e.to_string());
                return true;
            }
        }

        status.send_modify(|s| s.last_error = None);
        if !entries.is_empty() {
            tracing::info!(channel_id, processed = entries.len(), failures, "tick complete");
        }
        true
    }
}
