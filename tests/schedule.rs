// Integration tests for recurring search passes

mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use chrono::NaiveTime;
    use std::sync::Arc;
    use yt_autopilot::api::AutopilotOptions;
    use yt_autopilot::error::AutopilotError;
    use yt_autopilot::model::{search_dedup_key, Outcome, ProjectUpdate};
    use yt_autopilot::monitor::LifecycleState;
    use yt_autopilot::schedule::{SearchSchedule, TrendingPass, OVERFETCH};
    use yt_autopilot::store::MemoryStore;

    fn schedule(queries: &[&str], trending: bool) -> SearchSchedule {
        SearchSchedule {
            // The harness creates its project first, so it gets id 1.
            project_id: 1,
            queries: queries.iter().map(|q| q.to_string()).collect(),
            times: vec![NaiveTime::from_hms_opt(3, 0, 0).unwrap()],
            videos_per_search: 1,
            days_threshold: 7,
            auto_publish: true,
            categories: None,
            trending: trending.then(|| TrendingPass {
                region: "US".to_string(),
                categories: vec!["Trending".to_string()],
            }),
        }
    }

    async fn harness(schedule: SearchSchedule) -> Harness {
        let h = Harness::with_store(
            Arc::new(MemoryStore::new()),
            AutopilotOptions {
                schedule: Some(schedule),
                ..options()
            },
        )
        .await;
        assert_eq!(h.project.id, 1);
        h
    }

    #[tokio::test]
    async fn test_pass_runs_trending_then_each_query() {
        let h = harness(schedule(&["rust async", "tokio"], true)).await;
        h.videos.set_trending(vec![video("hot", 30), video("hot2", 30)]);
        h.videos.set_search(vec![video("s1", 60), video("s2", 60), video("s3", 60)]);

        let report = h.autopilot.run_schedule_now().await.unwrap();

        assert!(report.ran);
        assert!(report.failures.is_empty());
        let labels: Vec<_> = report.batches.iter().map(|b| b.query.as_str()).collect();
        assert_eq!(labels, vec!["trending:US", "rust async", "tokio"]);
        assert_eq!(
            h.videos.searches(),
            vec![("rust async".to_string(), OVERFETCH), ("tokio".to_string(), OVERFETCH)]
        );

        // One article per query: the second query passes over s1, already done.
        assert_eq!(report.counts.success, 3);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(h.transcripts.calls(), vec!["hot", "s1", "s2"]);
        let key = search_dedup_key(h.project.id);
        for id in ["hot", "s1", "s2"] {
            assert!(h.store.get_record(&key, id).await.unwrap().is_some());
        }
        assert!(h.store.get_record(&key, "s3").await.unwrap().is_none());

        let published = h.publisher.published.lock().unwrap().clone();
        assert_eq!(published[0], ("hot".to_string(), vec!["Trending".to_string()]));
        assert_eq!(published[1].1, vec!["Videos".to_string()]);
    }

    #[tokio::test]
    async fn test_failures_keep_trying_until_target() {
        let h = harness(schedule(&["rust async"], false)).await;
        h.videos.set_search(vec![video("bad", 60), video("good", 60), video("spare", 60)]);
        h.transcripts.unavailable.lock().unwrap().insert("bad".to_string());

        let report = h.autopilot.run_schedule_now().await.unwrap();

        let batch = &report.batches[0];
        let ids: Vec<_> = batch.results.iter().map(|r| r.video.id.as_str()).collect();
        assert_eq!(ids, vec!["bad", "good"]);
        assert!(matches!(batch.results[0].outcome, Outcome::Error { .. }));
        assert_eq!(report.counts.success, 1);
        assert_eq!(report.counts.error, 1);
    }

    #[tokio::test]
    async fn test_failed_query_does_not_stop_the_pass() {
        let h = harness(schedule(&["broken", "rust async"], false)).await;
        h.videos.set_search(vec![video("s1", 60)]);
        h.videos.failing_queries.lock().unwrap().insert("broken".to_string());

        let report = h.autopilot.run_schedule_now().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].batch, "broken");
        assert!(report.failures[0].error.contains("quota"));
        assert_eq!(report.batches.len(), 1);
        assert_eq!(report.counts.success, 1);
    }

    #[tokio::test]
    async fn test_empty_trending_chart_is_an_empty_batch() {
        let h = harness(schedule(&[], true)).await;
        let report = h.autopilot.run_schedule_now().await.unwrap();
        assert_eq!(report.batches.len(), 1);
        assert_eq!(report.batches[0].results.len(), 0);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_project_is_skipped() {
        let h = harness(schedule(&["rust async"], false)).await;
        h.videos.set_search(vec![video("s1", 60)]);
        h.autopilot
            .update_project(
                h.project.id,
                ProjectUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = h.autopilot.run_schedule_now().await.unwrap();

        assert!(!report.ran);
        assert!(report.batches.is_empty());
        assert!(h.videos.searches().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_lifecycle() {
        let h = harness(schedule(&["rust async"], false)).await;
        assert_eq!(h.autopilot.schedule_status().await.unwrap().state, LifecycleState::Stopped);

        let started = h.autopilot.start_schedule().await.unwrap();
        assert!(started.state.is_live());
        let again = h.autopilot.start_schedule().await.unwrap();
        assert!(again.state.is_live());

        let autopilot = &h.autopilot;
        eventually("next run planned", move || async move {
            autopilot.schedule_status().await.unwrap().next_run.is_some()
        })
        .await;
        assert_eq!(h.autopilot.schedule_status().await.unwrap().state, LifecycleState::Running);

        h.autopilot.stop_schedule().await.unwrap();
        eventually("schedule stopped", move || async move {
            autopilot.schedule_status().await.unwrap().state == LifecycleState::Stopped
        })
        .await;
        assert!(h.autopilot.schedule_status().await.unwrap().next_run.is_none());

        // A stopped loop can be started again.
        assert!(h.autopilot.start_schedule().await.unwrap().state.is_live());
        h.autopilot.shutdown().await;
        assert_eq!(h.autopilot.schedule_status().await.unwrap().state, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_schedule_for_missing_project() {
        let h = harness(schedule(&["rust async"], false)).await;
        h.autopilot.delete_project(h.project.id).await.unwrap();
        assert!(matches!(
            h.autopilot.start_schedule().await,
            Err(AutopilotError::ProjectNotFound(1))
        ));
        assert!(matches!(
            h.autopilot.run_schedule_now().await,
            Err(AutopilotError::ProjectNotFound(1))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_schedule_is_rejected() {
        let h = Harness::new().await;
        assert!(matches!(
            h.autopilot.start_schedule().await,
            Err(AutopilotError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.autopilot.run_schedule_now().await,
            Err(AutopilotError::InvalidRequest(_))
        ));
    }
}
