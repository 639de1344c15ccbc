//! In-memory fakes for leaderboard integration tests
//!
//! `MemoryStore` and `MemoryCache` implement the service's storage and cache
//! traits over plain mutex-guarded state, mirroring the SQL semantics of the
//! production implementations (atomic increments, tie-breaks, diff-only
//! rebuilds) so coordinator and worker behavior can be exercised without
//! PostgreSQL or Redis. `task_queue::MemoryTaskQueue` covers the queue side.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use leaderboard_service::cache::LeaderboardCache;
use leaderboard_service::config::RankingConfig;
use leaderboard_service::db::LeaderboardStore;
use leaderboard_service::models::{
    DailyReport, GameModeStats, LeaderboardEntry, PlaySession, RebuildSummary, SessionOutcome,
    TopScore, TopSnapshot,
};
use leaderboard_service::services::{RankEngine, SubmissionService};
use leaderboard_service::{AppError, Result};
use task_queue::MemoryTaskQueue;

#[derive(Default)]
struct StoreState {
    sessions: Vec<PlaySession>,
    entries: HashMap<Uuid, LeaderboardEntry>,
}

/// In-memory [`LeaderboardStore`] with optional injected read failures.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    fail_rank_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `count_better_than` fail with a
    /// non-retriable error, to exercise the fix-up failure path.
    pub fn fail_next_rank_reads(&self, count: usize) {
        self.fail_rank_reads.store(count, Ordering::SeqCst);
    }

    fn take_rank_read_failure(&self) -> bool {
        self.fail_rank_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Insert a session with an explicit timestamp, folding the score into
    /// the player's aggregate. Used to seed history for purge and report
    /// tests; ranks are left for the caller to rebuild.
    pub fn insert_session_at(
        &self,
        player_id: Uuid,
        score: i64,
        game_mode: &str,
        timestamp: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.sessions.push(PlaySession {
            id: Uuid::new_v4(),
            player_id,
            score,
            game_mode: game_mode.to_string(),
            timestamp,
        });
        let entry = state
            .entries
            .entry(player_id)
            .or_insert_with(|| LeaderboardEntry {
                player_id,
                total_score: 0,
                rank: None,
            });
        entry.total_score += score;
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    fn ordered_entries(state: &StoreState) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = state
            .entries
            .values()
            .filter(|e| e.total_score > 0)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (Reverse(e.total_score), e.player_id));
        entries
    }
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    async fn record_session(
        &self,
        player_id: Uuid,
        score: i64,
        game_mode: &str,
    ) -> Result<SessionOutcome> {
        let mut state = self.state.lock().unwrap();

        let created = !state.entries.contains_key(&player_id);

        let session = PlaySession {
            id: Uuid::new_v4(),
            player_id,
            score,
            game_mode: game_mode.to_string(),
            timestamp: Utc::now(),
        };
        state.sessions.push(session.clone());

        let entry = state
            .entries
            .entry(player_id)
            .or_insert_with(|| LeaderboardEntry {
                player_id,
                total_score: 0,
                rank: None,
            });
        entry.total_score += score;
        let entry = entry.clone();

        Ok(SessionOutcome {
            session,
            entry,
            created,
        })
    }

    async fn entry(&self, player_id: Uuid) -> Result<Option<LeaderboardEntry>> {
        Ok(self.state.lock().unwrap().entries.get(&player_id).cloned())
    }

    async fn count_better_than(&self, total_score: i64) -> Result<i64> {
        if self.take_rank_read_failure() {
            return Err(AppError::Internal("injected rank read failure".into()));
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .values()
            .filter(|e| e.total_score > total_score)
            .count() as i64)
    }

    async fn set_rank(&self, player_id: Uuid, rank: i64) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.entries.get_mut(&player_id) {
            Some(entry) if entry.rank != Some(rank) => {
                entry.rank = Some(rank);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rebuild_ranks(&self) -> Result<RebuildSummary> {
        let mut state = self.state.lock().unwrap();
        let ordered = Self::ordered_entries(&state);

        let mut updated = 0u64;
        for (i, e) in ordered.iter().enumerate() {
            let new_rank = i as i64 + 1;
            let entry = state.entries.get_mut(&e.player_id).unwrap();
            if entry.rank != Some(new_rank) {
                entry.rank = Some(new_rank);
                updated += 1;
            }
        }

        Ok(RebuildSummary {
            ranked: ordered.len() as i64,
            updated,
        })
    }

    async fn top_entries(&self, limit: i64, offset: i64) -> Result<Vec<LeaderboardEntry>> {
        let state = self.state.lock().unwrap();
        Ok(Self::ordered_entries(&state)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn ranked_player_count(&self) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.entries.values().filter(|e| e.total_score > 0).count() as i64)
    }

    async fn purge_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.timestamp >= cutoff);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn game_mode_stats(&self) -> Result<Vec<GameModeStats>> {
        let state = self.state.lock().unwrap();

        let mut by_mode: HashMap<&str, Vec<&PlaySession>> = HashMap::new();
        for session in &state.sessions {
            by_mode.entry(&session.game_mode).or_default().push(session);
        }

        let mut stats: Vec<GameModeStats> = by_mode
            .into_iter()
            .map(|(mode, sessions)| {
                let players: HashSet<Uuid> = sessions.iter().map(|s| s.player_id).collect();
                let total: i64 = sessions.iter().map(|s| s.score).sum();
                GameModeStats {
                    game_mode: mode.to_string(),
                    total_sessions: sessions.len() as i64,
                    unique_players: players.len() as i64,
                    avg_score: total as f64 / sessions.len() as f64,
                    max_score: sessions.iter().map(|s| s.score).max().unwrap_or(0),
                    min_score: sessions.iter().map(|s| s.score).min().unwrap_or(0),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.game_mode.cmp(&b.game_mode));

        Ok(stats)
    }

    async fn daily_report(&self, date: NaiveDate) -> Result<DailyReport> {
        let state = self.state.lock().unwrap();

        let todays: Vec<&PlaySession> = state
            .sessions
            .iter()
            .filter(|s| s.timestamp.date_naive() == date)
            .collect();

        let mut firsts: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        for session in &state.sessions {
            firsts
                .entry(session.player_id)
                .and_modify(|t| {
                    if session.timestamp < *t {
                        *t = session.timestamp;
                    }
                })
                .or_insert(session.timestamp);
        }
        let new_players = firsts
            .values()
            .filter(|t| t.date_naive() == date)
            .count() as i64;

        let mut top_score: Option<TopScore> = None;
        for session in &todays {
            if top_score.as_ref().map_or(true, |t| session.score > t.score) {
                top_score = Some(TopScore {
                    player_id: session.player_id,
                    score: session.score,
                    game_mode: session.game_mode.clone(),
                });
            }
        }

        Ok(DailyReport {
            date,
            sessions_played: todays.len() as i64,
            new_players,
            top_score,
        })
    }
}

#[derive(Default)]
struct CacheState {
    top: Option<TopSnapshot>,
    stats: Option<Vec<GameModeStats>>,
    reports: HashMap<NaiveDate, DailyReport>,
}

/// In-memory [`LeaderboardCache`] with an invalidation counter.
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
    invalidations: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaderboardCache for MemoryCache {
    async fn top_snapshot(&self) -> Result<Option<TopSnapshot>> {
        Ok(self.state.lock().unwrap().top.clone())
    }

    async fn refresh_top(&self, snapshot: &TopSnapshot) -> Result<()> {
        self.state.lock().unwrap().top = Some(snapshot.clone());
        Ok(())
    }

    async fn invalidate_top(&self) -> Result<()> {
        self.state.lock().unwrap().top = None;
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mode_stats(&self) -> Result<Option<Vec<GameModeStats>>> {
        Ok(self.state.lock().unwrap().stats.clone())
    }

    async fn write_mode_stats(&self, stats: &[GameModeStats]) -> Result<()> {
        self.state.lock().unwrap().stats = Some(stats.to_vec());
        Ok(())
    }

    async fn daily_report(&self, date: NaiveDate) -> Result<Option<DailyReport>> {
        Ok(self.state.lock().unwrap().reports.get(&date).cloned())
    }

    async fn write_daily_report(&self, report: &DailyReport) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .reports
            .insert(report.date, report.clone());
        Ok(())
    }
}

/// Rank tuning used by the tests: tiny fix-up backoff, default notification
/// thresholds (improvement of 10 places, or entering the top 10).
pub fn ranking_config(top_k: i64) -> RankingConfig {
    RankingConfig {
        top_k,
        rebuild_interval_secs: 300,
        fixup_max_attempts: 3,
        fixup_backoff_ms: 1,
        notify_min_improvement: 10,
        notify_top_threshold: 10,
    }
}

/// Fully wired service over in-memory fakes.
pub struct Harness {
    pub service: Arc<SubmissionService>,
    pub engine: Arc<RankEngine>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub queue: Arc<MemoryTaskQueue>,
}

pub fn harness_with_top_k(top_k: i64) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let queue = Arc::new(MemoryTaskQueue::new());
    let config = ranking_config(top_k);

    let engine = Arc::new(RankEngine::new(store.clone(), &config));
    let service = Arc::new(SubmissionService::new(
        store.clone(),
        cache.clone(),
        queue.clone(),
        engine.clone(),
        &config,
    ));

    Harness {
        service,
        engine,
        store,
        cache,
        queue,
    }
}

pub fn harness() -> Harness {
    harness_with_top_k(50)
}
