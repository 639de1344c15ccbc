/// Periodic task scheduling
///
/// Recurring work is enqueued onto the durable queue on a fixed cadence and
/// executed by the task processor; the schedulers themselves never touch the
/// store or cache. Every scheduled task is idempotent, so an occasional
/// duplicate enqueue is harmless.
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::workers::{
    TASK_DAILY_REPORT, TASK_PURGE_SESSIONS, TASK_REBUILD_RANKS, TASK_RECOMPUTE_STATS,
    TASK_REFRESH_TOP,
};
use task_queue::TaskQueue;

/// The daily report runs once a day regardless of other tuning.
const DAILY_REPORT_INTERVAL: Duration = Duration::from_secs(86_400);

/// One recurring enqueue: which task type, how often.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub task_type: &'static str,
    pub every: Duration,
}

/// The full recurring schedule for this service. The rebuild cadence is the
/// staleness bound for non-submitting players' ranks.
pub fn schedules(config: &Config) -> Vec<Schedule> {
    vec![
        Schedule {
            task_type: TASK_REBUILD_RANKS,
            every: Duration::from_secs(config.ranking.rebuild_interval_secs),
        },
        Schedule {
            task_type: TASK_REFRESH_TOP,
            every: Duration::from_secs(config.cache.top_refresh_interval_secs),
        },
        Schedule {
            task_type: TASK_RECOMPUTE_STATS,
            every: Duration::from_secs(config.cache.stats_refresh_interval_secs),
        },
        Schedule {
            task_type: TASK_PURGE_SESSIONS,
            every: Duration::from_secs(config.retention.purge_interval_secs),
        },
        Schedule {
            task_type: TASK_DAILY_REPORT,
            every: DAILY_REPORT_INTERVAL,
        },
    ]
}

/// Enqueue `schedule.task_type` on its cadence until shutdown. The first
/// tick fires immediately so a fresh boot converges ranks and caches right
/// away. Enqueue failures are logged and retried on the next tick.
pub async fn run_schedule(
    queue: Arc<dyn TaskQueue>,
    schedule: Schedule,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut timer = interval(schedule.every);

    info!(
        task_type = schedule.task_type,
        every_secs = schedule.every.as_secs(),
        "Starting scheduler loop"
    );

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match queue
                    .enqueue(schedule.task_type, json!({"reason": "scheduled"}))
                    .await
                {
                    Ok(task_id) => {
                        debug!(
                            task_type = schedule.task_type,
                            %task_id,
                            "Scheduled recurring task"
                        );
                    }
                    Err(e) => {
                        error!(
                            task_type = schedule.task_type,
                            error = %e,
                            "Failed to enqueue recurring task, will retry on next interval"
                        );
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(task_type = schedule.task_type, "Stopping scheduler loop");
                break;
            }
        }
    }
}
