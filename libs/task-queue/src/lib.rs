//! # Durable Task Queue
//!
//! A Postgres-backed queue for deferred work. Producers enqueue lightweight
//! task rows (a type tag plus a JSON payload); a background processor claims
//! due tasks, dispatches them to registered handlers, and reschedules
//! failures with exponential backoff.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once execution**: a claim takes a lease by pushing the task's
//!   `run_after` forward. If the process dies mid-task the lease expires and
//!   the task becomes due again, so handlers MUST be idempotent.
//! - **No double-claim between workers**: due tasks are selected with
//!   `FOR UPDATE SKIP LOCKED`, so concurrent processors never pick up the
//!   same row.
//! - **Bounded retries**: each handler declares a [`RetryPolicy`]; a task
//!   whose attempts exceed the policy is abandoned and left in the table for
//!   inspection rather than retried forever.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use task_queue::{SqlxTaskQueue, Task, TaskHandler, TaskProcessor, TaskQueue};
//!
//! struct PurgeHandler;
//!
//! #[async_trait::async_trait]
//! impl TaskHandler for PurgeHandler {
//!     fn task_type(&self) -> &'static str {
//!         "sessions.purge"
//!     }
//!
//!     async fn handle(&self, _task: &Task) -> anyhow::Result<()> {
//!         // delete expired rows here
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgresql://localhost/app").await?;
//!     let queue = Arc::new(SqlxTaskQueue::new(pool));
//!
//!     queue.enqueue("sessions.purge", serde_json::json!({})).await?;
//!
//!     let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//!     let processor = TaskProcessor::new(queue, 20, Duration::from_secs(5))
//!         .register(Arc::new(PurgeHandler));
//!     tokio::spawn(processor.run(shutdown_rx));
//!
//!     // ... serve traffic ...
//!     let _ = shutdown_tx.send(());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod error;
pub mod metrics;

pub use error::{TaskQueueError, TaskQueueResult};
pub use metrics::TaskQueueMetrics;

/// Lease taken when a task is claimed. A crashed worker releases its tasks
/// after this long.
const CLAIM_LEASE: Duration = Duration::from_secs(60);

/// A unit of deferred work stored in the `background_tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, also the handle returned by `enqueue`
    pub id: Uuid,

    /// Dispatch key, e.g. "rank.rebuild" or "sessions.purge"
    pub task_type: String,

    /// Task arguments as JSON
    pub payload: serde_json::Value,

    /// Timestamp when the task was enqueued
    pub created_at: DateTime<Utc>,

    /// The task is due once this timestamp has passed; claims and retry
    /// backoff both push it forward
    pub run_after: DateTime<Utc>,

    /// Number of failed executions so far
    pub attempts: i32,

    /// Last error message from a failed execution
    pub last_error: Option<String>,

    /// Set once the task ran to completion
    pub completed_at: Option<DateTime<Utc>>,

    /// Set when the task exhausted its retries (or had no handler) and was
    /// given up on
    pub abandoned_at: Option<DateTime<Utc>>,
}

/// Retry budget for a task type.
///
/// Backoff is exponential: `base_delay * 2^(attempts - 1)`, capped at five
/// minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Executions allowed before the task is abandoned
    pub max_attempts: i32,

    /// Delay before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: i32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the next execution given the number of failures so far.
    pub fn backoff(&self, attempts: i32) -> Duration {
        const MAX_BACKOFF_SECS: u64 = 300;

        let exponent = attempts.saturating_sub(1).max(0) as u32;
        let secs = self
            .base_delay
            .as_secs()
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(MAX_BACKOFF_SECS);
        Duration::from_secs(secs)
    }
}

/// Queue operations, both the producer side (`enqueue`) and the consumer
/// side used by [`TaskProcessor`].
///
/// This trait abstracts the storage to allow for testing and alternative
/// implementations; see [`SqlxTaskQueue`] and [`MemoryTaskQueue`].
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task for execution as soon as a processor picks it up.
    ///
    /// Returns the task id, usable as a handle in operator-facing responses.
    async fn enqueue(&self, task_type: &str, payload: serde_json::Value)
        -> TaskQueueResult<Uuid>;

    /// Claim up to `limit` due tasks, taking a lease of `lease` on each so
    /// other processors skip them.
    async fn claim_due(&self, limit: i32, lease: Duration) -> TaskQueueResult<Vec<Task>>;

    /// Mark a task as successfully completed.
    async fn mark_completed(&self, task_id: Uuid) -> TaskQueueResult<()>;

    /// Record a failed execution: increments the attempt counter, stores the
    /// error, and reschedules the task after `retry_in`.
    async fn mark_failed(
        &self,
        task_id: Uuid,
        error: &str,
        retry_in: Duration,
    ) -> TaskQueueResult<()>;

    /// Give up on a task permanently, keeping the row for inspection.
    async fn abandon(&self, task_id: Uuid, error: &str) -> TaskQueueResult<()>;

    /// Pending count and oldest pending age in seconds (0 if none pending).
    async fn pending_stats(&self) -> TaskQueueResult<(i64, i64)>;
}

/// SQLx-based implementation of [`TaskQueue`] using PostgreSQL.
pub struct SqlxTaskQueue {
    pool: PgPool,
}

impl SqlxTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn as_seconds(duration: Duration) -> i64 {
    duration.as_secs().min(i64::MAX as u64) as i64
}

#[async_trait]
impl TaskQueue for SqlxTaskQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
    ) -> TaskQueueResult<Uuid> {
        let task_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO background_tasks (id, task_type, payload, created_at, run_after, attempts)
            VALUES ($1, $2, $3, NOW(), NOW(), 0)
            "#,
        )
        .bind(task_id)
        .bind(task_type)
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        debug!(task_id = %task_id, task_type = %task_type, "Task enqueued");

        Ok(task_id)
    }

    async fn claim_due(&self, limit: i32, lease: Duration) -> TaskQueueResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT id
                FROM background_tasks
                WHERE completed_at IS NULL
                  AND abandoned_at IS NULL
                  AND run_after <= NOW()
                ORDER BY run_after ASC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE background_tasks t
            SET run_after = NOW() + ($2::BIGINT * INTERVAL '1 second')
            FROM due
            WHERE t.id = due.id
            RETURNING t.id, t.task_type, t.payload, t.created_at, t.run_after,
                      t.attempts, t.last_error, t.completed_at, t.abandoned_at
            "#,
        )
        .bind(limit)
        .bind(as_seconds(lease))
        .fetch_all(&self.pool)
        .await?;

        let tasks: Vec<Task> = rows
            .into_iter()
            .map(|row| {
                Ok(Task {
                    id: row.try_get("id")?,
                    task_type: row.try_get("task_type")?,
                    payload: row.try_get("payload")?,
                    created_at: row.try_get("created_at")?,
                    run_after: row.try_get("run_after")?,
                    attempts: row.try_get("attempts")?,
                    last_error: row.try_get("last_error")?,
                    completed_at: row.try_get("completed_at")?,
                    abandoned_at: row.try_get("abandoned_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        if !tasks.is_empty() {
            debug!(count = tasks.len(), "Claimed due tasks");
        }

        Ok(tasks)
    }

    async fn mark_completed(&self, task_id: Uuid) -> TaskQueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE background_tasks
            SET completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(task_id = %task_id, "Task not found when marking as completed");
            return Err(TaskQueueError::TaskNotFound(task_id));
        }

        debug!(task_id = %task_id, "Task marked as completed");

        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: Uuid,
        error: &str,
        retry_in: Duration,
    ) -> TaskQueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE background_tasks
            SET attempts = attempts + 1,
                last_error = $2,
                run_after = NOW() + ($3::BIGINT * INTERVAL '1 second')
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(error)
        .bind(as_seconds(retry_in))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(task_id = %task_id, "Task not found when marking as failed");
            return Err(TaskQueueError::TaskNotFound(task_id));
        }

        warn!(
            task_id = %task_id,
            error = %error,
            retry_in_secs = retry_in.as_secs(),
            "Task marked as failed"
        );

        Ok(())
    }

    async fn abandon(&self, task_id: Uuid, error: &str) -> TaskQueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE background_tasks
            SET abandoned_at = NOW(),
                last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(task_id = %task_id, "Task not found when abandoning");
            return Err(TaskQueueError::TaskNotFound(task_id));
        }

        Ok(())
    }

    async fn pending_stats(&self) -> TaskQueueResult<(i64, i64)> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM background_tasks
            WHERE completed_at IS NULL
              AND abandoned_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let pending: i64 = rec.try_get("pending").unwrap_or(0);
        let age: i64 = rec.try_get("age_seconds").unwrap_or(0);
        Ok((pending, age))
    }
}

/// In-memory implementation of [`TaskQueue`] for tests and single-process
/// setups where durability is not required.
#[derive(Default)]
pub struct MemoryTaskQueue {
    tasks: std::sync::Mutex<Vec<Task>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task in the queue, in insertion order.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .map(|tasks| tasks.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> TaskQueueResult<std::sync::MutexGuard<'_, Vec<Task>>> {
        self.tasks
            .lock()
            .map_err(|_| TaskQueueError::Other(anyhow::anyhow!("task queue mutex poisoned")))
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
    ) -> TaskQueueResult<Uuid> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type: task_type.to_string(),
            payload,
            created_at: now,
            run_after: now,
            attempts: 0,
            last_error: None,
            completed_at: None,
            abandoned_at: None,
        };
        let task_id = task.id;
        self.lock()?.push(task);
        Ok(task_id)
    }

    async fn claim_due(&self, limit: i32, lease: Duration) -> TaskQueueResult<Vec<Task>> {
        let now = Utc::now();
        let mut tasks = self.lock()?;

        let mut due: Vec<usize> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.completed_at.is_none() && t.abandoned_at.is_none() && t.run_after <= now
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| (tasks[i].run_after, tasks[i].created_at));
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            tasks[i].run_after = now + chrono::Duration::seconds(as_seconds(lease));
            claimed.push(tasks[i].clone());
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, task_id: Uuid) -> TaskQueueResult<()> {
        let mut tasks = self.lock()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(TaskQueueError::TaskNotFound(task_id))?;
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(
        &self,
        task_id: Uuid,
        error: &str,
        retry_in: Duration,
    ) -> TaskQueueResult<()> {
        let mut tasks = self.lock()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(TaskQueueError::TaskNotFound(task_id))?;
        task.attempts += 1;
        task.last_error = Some(error.to_string());
        task.run_after = Utc::now() + chrono::Duration::seconds(as_seconds(retry_in));
        Ok(())
    }

    async fn abandon(&self, task_id: Uuid, error: &str) -> TaskQueueResult<()> {
        let mut tasks = self.lock()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(TaskQueueError::TaskNotFound(task_id))?;
        task.abandoned_at = Some(Utc::now());
        task.last_error = Some(error.to_string());
        Ok(())
    }

    async fn pending_stats(&self) -> TaskQueueResult<(i64, i64)> {
        let tasks = self.lock()?;
        let now = Utc::now();
        let pending: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.completed_at.is_none() && t.abandoned_at.is_none())
            .collect();
        let age = pending
            .iter()
            .map(|t| (now - t.created_at).num_seconds())
            .max()
            .unwrap_or(0);
        Ok((pending.len() as i64, age.max(0)))
    }
}

/// Handler for one task type.
///
/// Handlers run at-least-once, so they must tolerate re-execution of work
/// that already happened.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Dispatch key this handler consumes.
    fn task_type(&self) -> &'static str;

    /// Retry budget for this task type.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Execute the task.
    async fn handle(&self, task: &Task) -> anyhow::Result<()>;
}

/// Background processor dispatching due tasks to registered handlers.
///
/// Polls the queue at a fixed interval, executes each claimed task, and
/// records the outcome: completion, a rescheduled failure, or abandonment
/// once the handler's retry budget is spent. Failures are rescheduled in the
/// database (`run_after = now + backoff`) rather than held in memory, so a
/// restart never loses retry state.
pub struct TaskProcessor {
    queue: Arc<dyn TaskQueue>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    batch_size: i32,
    poll_interval: Duration,
    metrics: Option<TaskQueueMetrics>,
}

impl TaskProcessor {
    pub fn new(queue: Arc<dyn TaskQueue>, batch_size: i32, poll_interval: Duration) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            batch_size,
            poll_interval,
            metrics: None,
        }
    }

    /// Register a handler; tasks of its type are routed to it.
    pub fn register(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.task_type().to_string(), handler);
        self
    }

    /// Update Prometheus gauges with queue depth each polling cycle.
    pub fn with_metrics(mut self, metrics: TaskQueueMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the polling loop until the shutdown channel fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            batch_size = self.batch_size,
            poll_interval_secs = self.poll_interval.as_secs(),
            handlers = self.handlers.len(),
            "Task processor starting"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(count) if count > 0 => {
                            info!(completed_count = count, "Processed tasks from queue");
                        }
                        Ok(_) => {
                            debug!("No tasks due");
                        }
                        Err(e) => {
                            error!(error = ?e, "Task processor error");
                        }
                    }

                    if let Some(metrics) = &self.metrics {
                        if let Ok((pending, age)) = self.queue.pending_stats().await {
                            metrics.pending.set(pending);
                            metrics.oldest_pending_age_seconds.set(age);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Task processor shutting down");
                    break;
                }
            }
        }
    }

    /// Claim and execute a single batch of due tasks.
    ///
    /// Returns the number of tasks completed. Exposed so tests and drain
    /// paths can drive the processor without the polling loop.
    pub async fn run_once(&self) -> TaskQueueResult<usize> {
        let tasks = self.queue.claim_due(self.batch_size, CLAIM_LEASE).await?;
        let mut completed_count = 0usize;

        for task in tasks {
            let handler = match self.handlers.get(&task.task_type) {
                Some(handler) => Arc::clone(handler),
                None => {
                    warn!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        "No handler registered for task type, abandoning"
                    );
                    if let Err(e) = self.queue.abandon(task.id, "no handler registered").await {
                        error!(task_id = %task.id, error = ?e, "Failed to abandon task");
                    }
                    continue;
                }
            };

            let policy = handler.retry_policy();
            if task.attempts >= policy.max_attempts {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempts = task.attempts,
                    max_attempts = policy.max_attempts,
                    last_error = ?task.last_error,
                    "Task exceeded max attempts, abandoning (requires manual intervention)"
                );
                if let Err(e) = self.queue.abandon(task.id, "max attempts exceeded").await {
                    error!(task_id = %task.id, error = ?e, "Failed to abandon task");
                }
                continue;
            }

            match handler.handle(&task).await {
                Ok(()) => {
                    if let Err(e) = self.queue.mark_completed(task.id).await {
                        error!(
                            task_id = %task.id,
                            error = ?e,
                            "Failed to mark task as completed (work was applied)"
                        );
                    } else {
                        completed_count += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.completed.inc();
                        }
                        debug!(
                            task_id = %task.id,
                            task_type = %task.task_type,
                            "Task completed"
                        );
                    }
                }
                Err(e) => {
                    let retry_in = policy.backoff(task.attempts + 1);
                    error!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        attempts = task.attempts,
                        error = ?e,
                        "Task execution failed"
                    );
                    if let Err(mark_err) = self
                        .queue
                        .mark_failed(task.id, &e.to_string(), retry_in)
                        .await
                    {
                        error!(
                            task_id = %task.id,
                            error = ?mark_err,
                            "Failed to mark task as failed"
                        );
                    } else if let Some(metrics) = &self.metrics {
                        metrics.failed.inc();
                    }
                }
            }
        }

        Ok(completed_count)
    }
}
