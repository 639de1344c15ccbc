/// Rank maintenance: full rebuild and incremental fix-up.
///
/// A submission makes exactly one player's rank fresh via `fix_up_rank`
/// (one indexed count plus one conditional write). Everyone else's stored
/// rank may lag until the next `rebuild_all_ranks`, so the staleness of any
/// rank is bounded by the rebuild cadence.
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RankingConfig;
use crate::db::LeaderboardStore;
use crate::error::{AppError, Result};
use crate::metrics::{self, RANK_FIXUP_TOTAL};
use crate::models::{RankChange, RebuildSummary};

const MAX_FIXUP_BACKOFF: Duration = Duration::from_secs(2);

pub struct RankEngine {
    store: Arc<dyn LeaderboardStore>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl RankEngine {
    pub fn new(store: Arc<dyn LeaderboardStore>, config: &RankingConfig) -> Self {
        Self {
            store,
            max_attempts: config.fixup_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.fixup_backoff_ms),
        }
    }

    /// Recompute dense ranks for all players. Safe to re-run at any time;
    /// only rows whose rank moved are written. Callers schedule this off the
    /// request path, and the task queue owns retries for it.
    pub async fn rebuild_all_ranks(&self) -> Result<RebuildSummary> {
        let started = Instant::now();
        let summary = self.store.rebuild_ranks().await?;

        metrics::record_rebuild(started.elapsed(), summary.updated);
        info!(
            ranked = summary.ranked,
            updated = summary.updated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rank rebuild complete"
        );

        Ok(summary)
    }

    /// Recompute one player's rank as `count_better_than(total) + 1` and
    /// persist it if it moved. Transient store contention is retried up to
    /// the configured budget; a still-failing fix-up surfaces as
    /// `RankUpdateFailed` and never unwinds the committed score.
    pub async fn fix_up_rank(&self, player_id: Uuid) -> Result<RankChange> {
        let mut attempt = 1;

        loop {
            match self.try_fix_up(player_id).await {
                Ok(change) => {
                    let outcome = if change.changed { "applied" } else { "unchanged" };
                    RANK_FIXUP_TOTAL.with_label_values(&[outcome]).inc();
                    return Ok(change);
                }
                Err(err @ AppError::NotFound(_)) => return Err(err),
                Err(err) if err.is_transient_contention() && attempt < self.max_attempts => {
                    warn!(
                        player_id = %player_id,
                        attempt,
                        error = %err,
                        "Transient contention during rank fix-up, retrying"
                    );
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    RANK_FIXUP_TOTAL.with_label_values(&["failed"]).inc();
                    return Err(AppError::RankUpdateFailed {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    async fn try_fix_up(&self, player_id: Uuid) -> Result<RankChange> {
        let entry = self.store.entry(player_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("player {} has no leaderboard entry", player_id))
        })?;

        let better = self.store.count_better_than(entry.total_score).await?;
        let new_rank = better + 1;
        let changed = self.store.set_rank(player_id, new_rank).await?;

        Ok(RankChange {
            old_rank: entry.rank,
            new_rank,
            changed,
        })
    }

    /// Exponential backoff with ±30% jitter, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_FIXUP_BACKOFF);

        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3);
        Duration::from_millis((exp.as_millis() as f64 * jitter_factor) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DailyReport, GameModeStats, LeaderboardEntry, SessionOutcome,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Store stub for retry-path tests: serves a fixed entry map and fails
    /// `count_better_than` with a transient error a configurable number of
    /// times.
    struct StubStore {
        entries: Mutex<HashMap<Uuid, LeaderboardEntry>>,
        transient_failures: AtomicU32,
        count_calls: AtomicU32,
        set_rank_calls: AtomicU32,
    }

    impl StubStore {
        fn new(entries: Vec<LeaderboardEntry>) -> Self {
            Self {
                entries: Mutex::new(entries.into_iter().map(|e| (e.player_id, e)).collect()),
                transient_failures: AtomicU32::new(0),
                count_calls: AtomicU32::new(0),
                set_rank_calls: AtomicU32::new(0),
            }
        }

        fn fail_transiently(self, times: u32) -> Self {
            self.transient_failures.store(times, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl LeaderboardStore for StubStore {
        async fn record_session(
            &self,
            _player_id: Uuid,
            _score: i64,
            _game_mode: &str,
        ) -> Result<SessionOutcome> {
            unimplemented!("not exercised by rank engine tests")
        }

        async fn entry(&self, player_id: Uuid) -> Result<Option<LeaderboardEntry>> {
            Ok(self.entries.lock().unwrap().get(&player_id).cloned())
        }

        async fn count_better_than(&self, total_score: i64) -> Result<i64> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::Database(sqlx::Error::PoolTimedOut));
            }

            Ok(self
                .entries
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.total_score > total_score)
                .count() as i64)
        }

        async fn set_rank(&self, player_id: Uuid, rank: i64) -> Result<bool> {
            self.set_rank_calls.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(&player_id).unwrap();
            if entry.rank == Some(rank) {
                return Ok(false);
            }
            entry.rank = Some(rank);
            Ok(true)
        }

        async fn rebuild_ranks(&self) -> Result<RebuildSummary> {
            let mut entries = self.entries.lock().unwrap();
            let mut ordered: Vec<Uuid> = entries
                .values()
                .filter(|e| e.total_score > 0)
                .map(|e| e.player_id)
                .collect();
            ordered.sort_by_key(|id| {
                let e = &entries[id];
                (std::cmp::Reverse(e.total_score), *id)
            });

            let mut updated = 0;
            for (idx, id) in ordered.iter().enumerate() {
                let new_rank = Some((idx + 1) as i64);
                let entry = entries.get_mut(id).unwrap();
                if entry.rank != new_rank {
                    entry.rank = new_rank;
                    updated += 1;
                }
            }

            Ok(RebuildSummary {
                ranked: ordered.len() as i64,
                updated,
            })
        }

        async fn top_entries(&self, _limit: i64, _offset: i64) -> Result<Vec<LeaderboardEntry>> {
            unimplemented!("not exercised by rank engine tests")
        }

        async fn ranked_player_count(&self) -> Result<i64> {
            unimplemented!("not exercised by rank engine tests")
        }

        async fn purge_sessions_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            unimplemented!("not exercised by rank engine tests")
        }

        async fn game_mode_stats(&self) -> Result<Vec<GameModeStats>> {
            unimplemented!("not exercised by rank engine tests")
        }

        async fn daily_report(&self, _date: NaiveDate) -> Result<DailyReport> {
            unimplemented!("not exercised by rank engine tests")
        }
    }

    fn entry(player_id: Uuid, total_score: i64, rank: Option<i64>) -> LeaderboardEntry {
        LeaderboardEntry {
            player_id,
            total_score,
            rank,
        }
    }

    fn engine_config(max_attempts: u32) -> RankingConfig {
        RankingConfig {
            top_k: 50,
            rebuild_interval_secs: 300,
            fixup_max_attempts: max_attempts,
            fixup_backoff_ms: 1,
            notify_min_improvement: 10,
            notify_top_threshold: 10,
        }
    }

    #[tokio::test]
    async fn test_fix_up_computes_count_better_plus_one() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let store = Arc::new(StubStore::new(vec![
            entry(a, 100, Some(1)),
            entry(b, 150, None),
        ]));
        let engine = RankEngine::new(store.clone(), &engine_config(3));

        let change = engine.fix_up_rank(b).await.unwrap();

        assert_eq!(change.new_rank, 1);
        assert_eq!(change.old_rank, None);
        assert!(change.changed);
    }

    #[tokio::test]
    async fn test_fix_up_is_idempotent() {
        let a = Uuid::new_v4();
        let store = Arc::new(StubStore::new(vec![entry(a, 100, None)]));
        let engine = RankEngine::new(store.clone(), &engine_config(3));

        let first = engine.fix_up_rank(a).await.unwrap();
        assert!(first.changed);

        let second = engine.fix_up_rank(a).await.unwrap();
        assert_eq!(second.new_rank, first.new_rank);
        assert!(!second.changed);
    }

    #[tokio::test]
    async fn test_fix_up_retries_transient_contention() {
        let a = Uuid::new_v4();
        let store = Arc::new(StubStore::new(vec![entry(a, 100, None)]).fail_transiently(2));
        let engine = RankEngine::new(store.clone(), &engine_config(3));

        let change = engine.fix_up_rank(a).await.unwrap();

        assert_eq!(change.new_rank, 1);
        assert_eq!(store.count_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fix_up_surfaces_rank_update_failed_when_budget_exhausted() {
        let a = Uuid::new_v4();
        let store = Arc::new(StubStore::new(vec![entry(a, 100, None)]).fail_transiently(10));
        let engine = RankEngine::new(store.clone(), &engine_config(3));

        let err = engine.fix_up_rank(a).await.unwrap_err();

        match err {
            AppError::RankUpdateFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RankUpdateFailed, got {other}"),
        }
        // The rank write was never reached, so the stored entry is untouched.
        assert_eq!(store.set_rank_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fix_up_unknown_player_is_not_found() {
        let store = Arc::new(StubStore::new(vec![]));
        let engine = RankEngine::new(store.clone(), &engine_config(3));

        let err = engine.fix_up_rank(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        // NotFound is terminal, never retried.
        assert_eq!(store.count_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rebuild_assigns_dense_ranks() {
        let mut players: Vec<LeaderboardEntry> = (0..5)
            .map(|i| entry(Uuid::new_v4(), (i as i64 + 1) * 10, None))
            .collect();
        players.push(entry(Uuid::new_v4(), 0, None));

        let store = Arc::new(StubStore::new(players));
        let engine = RankEngine::new(store.clone(), &engine_config(3));

        let summary = engine.rebuild_all_ranks().await.unwrap();
        assert_eq!(summary.ranked, 5);
        assert_eq!(summary.updated, 5);

        let entries = store.entries.lock().unwrap();
        let mut ranks: Vec<i64> = entries
            .values()
            .filter_map(|e| e.rank)
            .collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        // Zero-total players stay unranked.
        assert!(entries.values().any(|e| e.total_score == 0 && e.rank.is_none()));
    }

    #[test]
    fn test_backoff_grows_and_stays_within_jitter_bounds() {
        let store = Arc::new(StubStore::new(vec![]));
        let engine = RankEngine::new(
            store,
            &RankingConfig {
                fixup_backoff_ms: 100,
                ..engine_config(3)
            },
        );

        for (attempt, base_ms) in [(1u32, 100u64), (2, 200), (3, 400)] {
            for _ in 0..25 {
                let delay = engine.backoff_delay(attempt).as_millis() as u64;
                assert!(delay >= base_ms * 7 / 10, "attempt {attempt}: {delay}ms too short");
                assert!(delay <= base_ms * 13 / 10, "attempt {attempt}: {delay}ms too long");
            }
        }
    }
}
