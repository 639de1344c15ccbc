/// Submission coordinator: the write path and the cached read paths.
///
/// Ordering on submit is fixed: validate, commit the durable transaction
/// (session + aggregate increment), then fix up the submitter's rank, then
/// cache invalidation and notification as fire-and-forget side effects. A
/// failed fix-up is logged and the response carries the stale rank; the
/// committed score is never rolled back.
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::LeaderboardCache;
use crate::config::RankingConfig;
use crate::db::LeaderboardStore;
use crate::error::{AppError, Result};
use crate::metrics::{RANK_LOOKUPS_TOTAL, SUBMISSIONS_TOTAL, SUBMISSION_DURATION_SECONDS};
use crate::models::{
    GameModeStats, LeaderboardPage, PlayerRank, SubmittedScore, TopEntry,
};
use crate::services::RankEngine;
use crate::workers::{TASK_NOTIFY_RANK, TASK_REBUILD_RANKS, TASK_RECOMPUTE_STATS, TASK_REFRESH_TOP};
use task_queue::TaskQueue;

pub const MAX_GAME_MODE_LEN: usize = 50;

pub struct SubmissionService {
    store: Arc<dyn LeaderboardStore>,
    cache: Arc<dyn LeaderboardCache>,
    queue: Arc<dyn TaskQueue>,
    engine: Arc<RankEngine>,
    top_k: i64,
    notify_min_improvement: i64,
    notify_top_threshold: i64,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        cache: Arc<dyn LeaderboardCache>,
        queue: Arc<dyn TaskQueue>,
        engine: Arc<RankEngine>,
        config: &RankingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            engine,
            top_k: config.top_k,
            notify_min_improvement: config.notify_min_improvement,
            notify_top_threshold: config.notify_top_threshold,
        }
    }

    pub async fn submit_score(
        &self,
        player_id: Uuid,
        score: i64,
        game_mode: &str,
    ) -> Result<SubmittedScore> {
        let started = Instant::now();

        if let Err(err) = validate_submission(score, game_mode) {
            SUBMISSIONS_TOTAL
                .with_label_values(&["validation_error"])
                .inc();
            return Err(err);
        }

        let outcome = match self.store.record_session(player_id, score, game_mode).await {
            Ok(outcome) => outcome,
            Err(err) => {
                SUBMISSIONS_TOTAL.with_label_values(&["error"]).inc();
                return Err(err);
            }
        };

        // Rank stored before this submission's fix-up.
        let old_rank = outcome.entry.rank;

        let rank = match self.engine.fix_up_rank(player_id).await {
            Ok(change) => {
                if old_rank != Some(change.new_rank) && change.new_rank <= self.top_k {
                    if let Err(err) = self.cache.invalidate_top().await {
                        warn!(error = %err, "Failed to invalidate top snapshot after submission");
                    }
                }

                if should_notify(
                    old_rank,
                    change.new_rank,
                    self.notify_min_improvement,
                    self.notify_top_threshold,
                ) {
                    self.enqueue_notification(player_id, old_rank, change.new_rank)
                        .await;
                }

                Some(change.new_rank)
            }
            Err(err) => {
                error!(
                    player_id = %player_id,
                    error = %err,
                    "Rank fix-up failed; serving stale rank until the next rebuild"
                );
                old_rank
            }
        };

        SUBMISSIONS_TOTAL.with_label_values(&["success"]).inc();
        SUBMISSION_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        Ok(SubmittedScore {
            session: outcome.session,
            total_score: outcome.entry.total_score,
            rank,
            created: outcome.created,
        })
    }

    /// One page of the leaderboard. Serves the cached snapshot when present;
    /// otherwise reads the store, rewrites display ranks positionally so the
    /// page is self-consistent even when stored ranks lag, and schedules a
    /// background snapshot refresh instead of repopulating inline.
    pub async fn top_players(&self, limit: i64, offset: i64) -> Result<LeaderboardPage> {
        let limit = limit.clamp(1, self.top_k);
        let offset = offset.max(0);

        if let Some(snapshot) = self.cache.top_snapshot().await? {
            let count = snapshot.entries.len() as i64;
            let results = snapshot
                .entries
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
            return Ok(LeaderboardPage { count, results });
        }

        let entries = self.store.top_entries(limit, offset).await?;
        let count = self.store.ranked_player_count().await?;
        let results = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| TopEntry {
                player_id: e.player_id,
                total_score: e.total_score,
                rank: Some(offset + i as i64 + 1),
            })
            .collect();

        if let Err(err) = self.queue.enqueue(TASK_REFRESH_TOP, json!({})).await {
            warn!(error = %err, "Failed to schedule top snapshot refresh");
        }

        Ok(LeaderboardPage { count, results })
    }

    /// Live rank for one player, always computed against the store. Repairs
    /// the stored rank when the live value differs (best-effort).
    pub async fn player_rank(&self, player_id: Uuid) -> Result<PlayerRank> {
        RANK_LOOKUPS_TOTAL.inc();

        let entry = self.store.entry(player_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("player {} has never played", player_id))
        })?;

        let rank = self.store.count_better_than(entry.total_score).await? + 1;

        if entry.rank != Some(rank) {
            if let Err(err) = self.store.set_rank(player_id, rank).await {
                debug!(
                    player_id = %player_id,
                    error = %err,
                    "Failed to read-repair stored rank"
                );
            }
        }

        Ok(PlayerRank {
            player_id,
            total_score: entry.total_score,
            rank,
        })
    }

    /// Cached game-mode statistics. On a miss the recompute task is
    /// scheduled and `None` is returned; stats are never computed inline.
    pub async fn game_mode_stats(&self) -> Result<Option<Vec<GameModeStats>>> {
        let stats = self.cache.mode_stats().await?;

        if stats.is_none() {
            if let Err(err) = self.queue.enqueue(TASK_RECOMPUTE_STATS, json!({})).await {
                warn!(error = %err, "Failed to schedule mode stats recompute");
            }
        }

        Ok(stats)
    }

    /// Schedule a full rank rebuild and hand back the task id.
    pub async fn request_rebuild(&self) -> Result<Uuid> {
        let task_id = self
            .queue
            .enqueue(TASK_REBUILD_RANKS, json!({"reason": "admin"}))
            .await?;
        Ok(task_id)
    }

    async fn enqueue_notification(&self, player_id: Uuid, old_rank: Option<i64>, new_rank: i64) {
        let payload = json!({
            "player_id": player_id,
            "old_rank": old_rank,
            "new_rank": new_rank,
        });

        if let Err(err) = self.queue.enqueue(TASK_NOTIFY_RANK, payload).await {
            warn!(
                player_id = %player_id,
                error = %err,
                "Failed to enqueue rank change notification"
            );
        }
    }
}

fn validate_submission(score: i64, game_mode: &str) -> Result<()> {
    if score < 0 {
        return Err(AppError::Validation("score must be non-negative".into()));
    }

    let len = game_mode.chars().count();
    if len == 0 || len > MAX_GAME_MODE_LEN {
        return Err(AppError::Validation(format!(
            "game_mode must be between 1 and {} characters",
            MAX_GAME_MODE_LEN
        )));
    }

    Ok(())
}

/// Notification gate: previous rank known, rank actually moved, and either
/// the improvement is at least `min_improvement` positions or the new rank
/// is within `top_threshold`.
fn should_notify(
    old_rank: Option<i64>,
    new_rank: i64,
    min_improvement: i64,
    top_threshold: i64,
) -> bool {
    match old_rank {
        Some(old) if old != new_rank => {
            old - new_rank >= min_improvement || new_rank <= top_threshold
        }
        _ => false,
    }
}
