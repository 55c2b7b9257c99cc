//! Recurring search passes at fixed times of day.
//!
//! A pass runs the optional trending batch, then one search batch per saved
//! query, all against one project's dedup key. The loop is owned like a
//! channel monitor: one spawned task with a cancellation token and a `watch`
//! snapshot, cancelled only between passes.

use crate::error::{AutopilotError, Result};
use crate::model::{ChannelSettings, ProjectId};
use crate::monitor::LifecycleState;
use crate::search::{SearchBatchRunner, SearchCounts, SearchParams, SearchReport};
use crate::store::Store;
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Each query asks the source for this many candidates per wanted article, so
/// already-processed or stale results can be passed over.
pub const OVERFETCH: usize = 3;

#[derive(Debug, Clone)]
pub struct TrendingPass {
    pub region: String,
    pub categories: Vec<String>,
}

/// What a scheduled pass searches for and where the articles go.
#[derive(Debug, Clone)]
pub struct SearchSchedule {
    pub project_id: ProjectId,
    pub queries: Vec<String>,
    /// Local times of day, sorted.
    pub times: Vec<NaiveTime>,
    pub videos_per_search: usize,
    /// 0 disables the age filter.
    pub days_threshold: u32,
    pub auto_publish: bool,
    /// `None` uses the configured default categories.
    pub categories: Option<Vec<String>>,
    pub trending: Option<TrendingPass>,
}

/// Parse `HH:MM` times of day, sorted and deduplicated.
pub fn parse_times(raw: &[String]) -> anyhow::Result<Vec<NaiveTime>> {
    let mut times = raw
        .iter()
        .map(|t| {
            let t = t.trim();
            if t.len() != 5 {
                anyhow::bail!("invalid time {:?}, expected HH:MM", t);
            }
            NaiveTime::parse_from_str(t, "%H:%M")
                .map_err(|_| anyhow::anyhow!("invalid time {:?}, expected HH:MM", t))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    times.sort();
    times.dedup();
    Ok(times)
}

/// First slot strictly after `after`. Slots that fall in a DST gap are skipped.
pub fn next_run<Tz: TimeZone>(times: &[NaiveTime], after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = after.timezone();
    let today = after.naive_local().date();
    (0..3)
        .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
        .flat_map(|day| times.iter().map(move |t| day.and_time(*t)))
        .filter_map(|naive| tz.from_local_datetime(&naive).earliest())
        .filter(|slot| slot > after)
        .min()
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub batch: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulePassReport {
    pub project_id: ProjectId,
    pub started_at: DateTime<Utc>,
    /// False when the project was inactive and nothing ran.
    pub ran: bool,
    pub batches: Vec<SearchReport>,
    pub failures: Vec<BatchFailure>,
    pub counts: SearchCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSnapshot {
    pub state: LifecycleState,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub runs: u64,
    pub last_counts: Option<SearchCounts>,
    pub last_error: Option<String>,
}

impl ScheduleSnapshot {
    pub fn stopped() -> Self {
        Self {
            state: LifecycleState::Stopped,
            next_run: None,
            last_run: None,
            runs: 0,
            last_counts: None,
            last_error: None,
        }
    }
}

struct Passes {
    runner: Arc<SearchBatchRunner>,
    store: Arc<dyn Store>,
    default_categories: Vec<String>,
    schedule: SearchSchedule,
}

struct LoopHandle {
    cancel: CancellationToken,
    status: watch::Sender<ScheduleSnapshot>,
    join: JoinHandle<()>,
}

/// Owns the scheduled-search loop. At most one runs at a time.
pub struct SearchScheduler {
    passes: Arc<Passes>,
    handle: Mutex<Option<LoopHandle>>,
}

impl SearchScheduler {
    pub fn new(
        runner: Arc<SearchBatchRunner>,
        store: Arc<dyn Store>,
        default_categories: Vec<String>,
        schedule: SearchSchedule,
    ) -> Self {
        Self {
            passes: Arc::new(Passes {
                runner,
                store,
                default_categories,
                schedule,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn schedule(&self) -> &SearchSchedule {
        &self.passes.schedule
    }

    /// Start the loop. Idempotent while it is live.
    pub async fn start(&self) -> Result<ScheduleSnapshot> {
        self.passes.require_project().await?;
        let mut slot = self.handle.lock().await;
        if let Some(existing) = slot.as_ref() {
            let snapshot = existing.status.borrow().clone();
            if snapshot.state.is_live() {
                return Ok(snapshot);
            }
        }
        if let Some(old) = slot.take() {
            join_quietly(old.join).await;
        }

        let cancel = CancellationToken::new();
        let (status, _) = watch::channel(ScheduleSnapshot {
            state: LifecycleState::Starting,
            ..ScheduleSnapshot::stopped()
        });
        let join = tokio::spawn(run_loop(self.passes.clone(), cancel.clone(), status.clone()));
        let snapshot = status.borrow().clone();
        *slot = Some(LoopHandle { cancel, status, join });
        tracing::info!(
            project_id = self.passes.schedule.project_id,
            queries = self.passes.schedule.queries.len(),
            times = self.passes.schedule.times.len(),
            "search schedule starting"
        );
        Ok(snapshot)
    }

    /// Signal the loop to stop after any pass in progress.
    pub async fn stop(&self) -> ScheduleSnapshot {
        let slot = self.handle.lock().await;
        match slot.as_ref() {
            Some(handle) => {
                handle.cancel.cancel();
                handle.status.send_modify(|s| {
                    if s.state != LifecycleState::Stopped {
                        s.state = LifecycleState::Stopping;
                    }
                });
                tracing::info!("search schedule stopping");
                let snapshot = handle.status.borrow().clone();
                snapshot
            }
            None => ScheduleSnapshot::stopped(),
        }
    }

    pub async fn status(&self) -> ScheduleSnapshot {
        let slot = self.handle.lock().await;
        slot.as_ref()
            .map(|h| h.status.borrow().clone())
            .unwrap_or_else(ScheduleSnapshot::stopped)
    }

    /// Run one pass now, outside the timetable.
    pub async fn run_now(&self) -> Result<SchedulePassReport> {
        self.passes.run_pass().await
    }

    /// Cancel the loop and wait for a pass in progress to finish.
    pub async fn shutdown(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            handle.status.send_modify(|s| s.state = LifecycleState::Stopping);
            join_quietly(handle.join).await;
        }
    }
}

async fn join_quietly(join: JoinHandle<()>) {
    if let Err(e) = join.await {
        tracing::error!(error = %e, "search schedule task panicked");
    }
}

async fn run_loop(
    passes: Arc<Passes>,
    cancel: CancellationToken,
    status: watch::Sender<ScheduleSnapshot>,
) {
    status.send_modify(|s| {
        if s.state == LifecycleState::Starting {
            s.state = LifecycleState::Running;
        }
    });

    // A slot fires at most once even if the timer wakes a little early.
    let mut cursor = Local::now();
    loop {
        let now = Local::now();
        let after = if cursor > now { cursor } else { now };
        let Some(next) = next_run(&passes.schedule.times, &after) else {
            tracing::error!("search schedule has no usable times, stopping");
            status.send_modify(|s| s.last_error = Some("no usable schedule times".to_string()));
            break;
        };
        status.send_modify(|s| s.next_run = Some(next.with_timezone(&Utc)));
        let wait = (next - Local::now()).to_std().unwrap_or_default();
        tracing::debug!(next = %next, wait_s = wait.as_secs(), "next scheduled search");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        cursor = next;

        match passes.run_pass().await {
            Ok(report) => status.send_modify(|s| {
                s.last_run = Some(report.started_at);
                s.runs += 1;
                s.last_error = report
                    .failures
                    .first()
                    .map(|f| format!("{}: {}", f.batch, f.error));
                s.last_counts = Some(report.counts);
            }),
            Err(e) => {
                tracing::error!(error = %e, "scheduled search pass failed");
                status.send_modify(|s| {
                    s.runs += 1;
                    s.last_error = Some(e.to_string());
                });
                if matches!(e, AutopilotError::ProjectNotFound(_)) {
                    break;
                }
            }
        }
    }

    status.send_modify(|s| {
        s.state = LifecycleState::Stopped;
        s.next_run = None;
    });
    tracing::info!("search schedule stopped");
}

impl Passes {
    async fn require_project(&self) -> Result<crate::model::Project> {
        let id = self.schedule.project_id;
        self.store
            .get_project(id)
            .await
            .map_err(AutopilotError::persistence)?
            .ok_or(AutopilotError::ProjectNotFound(id))
    }

    async fn run_pass(&self) -> Result<SchedulePassReport> {
        let started_at = Utc::now();
        let project = self.require_project().await?;
        let mut report = SchedulePassReport {
            project_id: project.id,
            started_at,
            ran: project.active,
            batches: Vec::new(),
            failures: Vec::new(),
            counts: SearchCounts::default(),
        };
        if !project.active {
            tracing::info!(project_id = project.id, "project inactive, scheduled search skipped");
            return Ok(report);
        }

        let schedule = &self.schedule;
        let settings = ChannelSettings {
            project_id: project.id,
            auto_publish: schedule.auto_publish,
            categories: schedule
                .categories
                .clone()
                .unwrap_or_else(|| self.default_categories.clone()),
            site: project.site,
        };

        if let Some(trending) = &schedule.trending {
            let trending_settings = ChannelSettings {
                categories: trending.categories.clone(),
                ..settings.clone()
            };
            let outcome = self
                .runner
                .run_trending(&trending.region, schedule.videos_per_search, &trending_settings)
                .await;
            report.absorb(format!("trending:{}", trending.region), outcome);
        }

        for query in &schedule.queries {
            let params = SearchParams {
                query: query.clone(),
                max_results: schedule.videos_per_search.saturating_mul(OVERFETCH),
                days_threshold: schedule.days_threshold,
                settings: settings.clone(),
                success_target: Some(schedule.videos_per_search),
            };
            let outcome = self.runner.run(params).await;
            report.absorb(query.clone(), outcome);
        }

        tracing::info!(
            project_id = project.id,
            batches = report.batches.len(),
            failed_batches = report.failures.len(),
            success = report.counts.success,
            error = report.counts.error,
            skipped = report.counts.skipped,
            "scheduled search pass done"
        );
        Ok(report)
    }
}

impl SchedulePassReport {
    fn absorb(&mut self, batch: String, outcome: Result<SearchReport>) {
        match outcome {
            Ok(batch_report) => {
                self.counts.add(&batch_report.counts);
                self.batches.push(batch_report);
            }
            Err(e) => {
                tracing::warn!(batch = %batch, error = %e, "scheduled search batch failed");
                self.failures.push(BatchFailure {
                    batch,
                    error: e.to_string(),
                });
            }
        }
    }
}
