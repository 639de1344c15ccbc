/// Background task handlers
///
/// Every handler is idempotent, so the queue's at-least-once delivery is
/// safe. Retry cadence differs per task type; the queue reschedules failed
/// tasks and abandons them once the attempt budget is spent.
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::LeaderboardCache;
use crate::db::LeaderboardStore;
use crate::metrics;
use crate::models::TopSnapshot;
use crate::services::RankEngine;
use task_queue::{RetryPolicy, Task, TaskHandler, TaskProcessor};

pub const TASK_REBUILD_RANKS: &str = "rank.rebuild";
pub const TASK_REFRESH_TOP: &str = "cache.refresh_top";
pub const TASK_PURGE_SESSIONS: &str = "sessions.purge";
pub const TASK_RECOMPUTE_STATS: &str = "stats.recompute";
pub const TASK_NOTIFY_RANK: &str = "rank.notify";
pub const TASK_DAILY_REPORT: &str = "report.daily";

fn record(task_type: &str, result: &anyhow::Result<()>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::record_task_run(task_type, outcome);
}

/// Full rank rebuild, then a snapshot refresh so cached ranks converge to
/// the new ordering. A failed refresh is logged but does not fail the task;
/// the periodic refresh covers recovery.
pub struct RebuildRanksHandler {
    engine: Arc<RankEngine>,
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn LeaderboardCache>,
    top_k: i64,
}

impl RebuildRanksHandler {
    pub fn new(
        engine: Arc<RankEngine>,
        store: Arc<dyn LeaderboardStore>,
        cache: Arc<dyn LeaderboardCache>,
        top_k: i64,
    ) -> Self {
        Self {
            engine,
            store,
            cache,
            top_k,
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.engine.rebuild_all_ranks().await?;

        let entries = self.store.top_entries(self.top_k, 0).await?;
        if let Err(err) = self
            .cache
            .refresh_top(&TopSnapshot::from_entries(entries))
            .await
        {
            warn!(error = %err, "Snapshot refresh after rebuild failed");
        }

        Ok(())
    }
}

#[async_trait]
impl TaskHandler for RebuildRanksHandler {
    fn task_type(&self) -> &'static str {
        TASK_REBUILD_RANKS
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        }
    }

    async fn handle(&self, _task: &Task) -> anyhow::Result<()> {
        let result = self.run().await;
        record(TASK_REBUILD_RANKS, &result);
        result
    }
}

/// Rebuild the cached top-K snapshot from the store.
pub struct RefreshTopHandler {
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn LeaderboardCache>,
    top_k: i64,
}

impl RefreshTopHandler {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        cache: Arc<dyn LeaderboardCache>,
        top_k: i64,
    ) -> Self {
        Self {
            store,
            cache,
            top_k,
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let entries = self.store.top_entries(self.top_k, 0).await?;
        let snapshot = TopSnapshot::from_entries(entries);
        self.cache.refresh_top(&snapshot).await?;

        info!(entries = snapshot.entries.len(), "Top snapshot refreshed");
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for RefreshTopHandler {
    fn task_type(&self) -> &'static str {
        TASK_REFRESH_TOP
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
        }
    }

    async fn handle(&self, _task: &Task) -> anyhow::Result<()> {
        let result = self.run().await;
        record(TASK_REFRESH_TOP, &result);
        result
    }
}

/// Retention sweep over play sessions. Re-running deletes nothing new.
pub struct PurgeSessionsHandler {
    store: Arc<dyn LeaderboardStore>,
    retention_days: i64,
}

impl PurgeSessionsHandler {
    pub fn new(store: Arc<dyn LeaderboardStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
        let deleted = self.store.purge_sessions_older_than(cutoff).await?;

        metrics::record_sessions_purged(deleted);
        info!(deleted, %cutoff, "Session retention sweep complete");
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for PurgeSessionsHandler {
    fn task_type(&self) -> &'static str {
        TASK_PURGE_SESSIONS
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(300),
        }
    }

    async fn handle(&self, _task: &Task) -> anyhow::Result<()> {
        let result = self.run().await;
        record(TASK_PURGE_SESSIONS, &result);
        result
    }
}

/// Recompute per-mode aggregates and cache them. Stats are only ever
/// computed here, never inline on a read.
pub struct RecomputeStatsHandler {
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn LeaderboardCache>,
}

impl RecomputeStatsHandler {
    pub fn new(store: Arc<dyn LeaderboardStore>, cache: Arc<dyn LeaderboardCache>) -> Self {
        Self { store, cache }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let stats = self.store.game_mode_stats().await?;
        self.cache.write_mode_stats(&stats).await?;

        info!(modes = stats.len(), "Game mode stats recomputed");
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for RecomputeStatsHandler {
    fn task_type(&self) -> &'static str {
        TASK_RECOMPUTE_STATS
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(120),
        }
    }

    async fn handle(&self, _task: &Task) -> anyhow::Result<()> {
        let result = self.run().await;
        record(TASK_RECOMPUTE_STATS, &result);
        result
    }
}

#[derive(Debug, Deserialize)]
struct RankNotification {
    player_id: Uuid,
    old_rank: Option<i64>,
    new_rank: i64,
}

/// Emit the rank-change notification. Delivery to players is owned by an
/// external notifier; this service records the structured event.
pub struct NotifyRankHandler;

impl NotifyRankHandler {
    async fn run(&self, task: &Task) -> anyhow::Result<()> {
        let notification: RankNotification = serde_json::from_value(task.payload.clone())?;

        info!(
            player_id = %notification.player_id,
            old_rank = ?notification.old_rank,
            new_rank = notification.new_rank,
            "Rank change notification"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for NotifyRankHandler {
    fn task_type(&self) -> &'static str {
        TASK_NOTIFY_RANK
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        }
    }

    async fn handle(&self, task: &Task) -> anyhow::Result<()> {
        let result = self.run(task).await;
        record(TASK_NOTIFY_RANK, &result);
        result
    }
}

/// Build and cache the daily activity report. Skips work when the report
/// for the day is already cached.
pub struct DailyReportHandler {
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn LeaderboardCache>,
}

impl DailyReportHandler {
    pub fn new(store: Arc<dyn LeaderboardStore>, cache: Arc<dyn LeaderboardCache>) -> Self {
        Self { store, cache }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let date = Utc::now().date_naive();

        if self.cache.daily_report(date).await?.is_some() {
            info!(%date, "Daily report already cached, skipping");
            return Ok(());
        }

        let report = self.store.daily_report(date).await?;
        self.cache.write_daily_report(&report).await?;

        info!(
            %date,
            sessions = report.sessions_played,
            new_players = report.new_players,
            "Daily report generated"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for DailyReportHandler {
    fn task_type(&self) -> &'static str {
        TASK_DAILY_REPORT
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        }
    }

    async fn handle(&self, _task: &Task) -> anyhow::Result<()> {
        let result = self.run().await;
        record(TASK_DAILY_REPORT, &result);
        result
    }
}

/// Register every leaderboard handler on the processor.
pub fn register_all(
    processor: TaskProcessor,
    engine: Arc<RankEngine>,
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn LeaderboardCache>,
    top_k: i64,
    retention_days: i64,
) -> TaskProcessor {
    processor
        .register(Arc::new(RebuildRanksHandler::new(
            engine,
            store.clone(),
            cache.clone(),
            top_k,
        )))
        .register(Arc::new(RefreshTopHandler::new(
            store.clone(),
            cache.clone(),
            top_k,
        )))
        .register(Arc::new(PurgeSessionsHandler::new(
            store.clone(),
            retention_days,
        )))
        .register(Arc::new(RecomputeStatsHandler::new(
            store.clone(),
            cache.clone(),
        )))
        .register(Arc::new(NotifyRankHandler))
        .register(Arc::new(DailyReportHandler::new(store, cache)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_with_payload(task_type: &str, payload: serde_json::Value) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type: task_type.to_string(),
            payload,
            created_at: Utc::now(),
            run_after: Utc::now(),
            attempts: 0,
            last_error: None,
            completed_at: None,
            abandoned_at: None,
        }
    }

    #[tokio::test]
    async fn test_notify_handler_accepts_well_formed_payload() {
        let handler = NotifyRankHandler;
        let task = task_with_payload(
            TASK_NOTIFY_RANK,
            json!({"player_id": Uuid::new_v4(), "old_rank": 25, "new_rank": 8}),
        );

        assert!(handler.handle(&task).await.is_ok());
    }

    #[tokio::test]
    async fn test_notify_handler_accepts_null_old_rank() {
        let handler = NotifyRankHandler;
        let task = task_with_payload(
            TASK_NOTIFY_RANK,
            json!({"player_id": Uuid::new_v4(), "old_rank": null, "new_rank": 3}),
        );

        assert!(handler.handle(&task).await.is_ok());
    }

    #[tokio::test]
    async fn test_notify_handler_rejects_malformed_payload() {
        let handler = NotifyRankHandler;
        let task = task_with_payload(TASK_NOTIFY_RANK, json!({"player": "not-a-uuid"}));

        assert!(handler.handle(&task).await.is_err());
    }

    #[test]
    fn test_notify_retry_cadence() {
        let notify = NotifyRankHandler.retry_policy();
        assert_eq!(notify.base_delay, Duration::from_secs(60));
        assert_eq!(notify.max_attempts, 3);
    }
}
