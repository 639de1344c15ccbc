/// Domain models for the leaderboard service
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One immutable score submission event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlaySession {
    pub id: Uuid,
    pub player_id: Uuid,
    pub score: i64,
    pub game_mode: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-player aggregate row. `rank` is a derived projection of the ordering
/// by `total_score`; it is NULL until first computed and may lag behind the
/// true order by at most one rebuild interval.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaderboardEntry {
    pub player_id: Uuid,
    pub total_score: i64,
    pub rank: Option<i64>,
}

/// Entry as served in top-N pages and cached snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopEntry {
    pub player_id: Uuid,
    pub total_score: i64,
    pub rank: Option<i64>,
}

/// Cached top-K snapshot. Entries carry their stored ranks as of refresh
/// time, ordered by total score descending, ties by player id ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopSnapshot {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<TopEntry>,
}

impl TopSnapshot {
    pub fn from_entries(entries: Vec<LeaderboardEntry>) -> Self {
        Self {
            generated_at: Utc::now(),
            entries: entries
                .into_iter()
                .map(|e| TopEntry {
                    player_id: e.player_id,
                    total_score: e.total_score,
                    rank: e.rank,
                })
                .collect(),
        }
    }
}

/// Aggregate statistics per game mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameModeStats {
    pub game_mode: String,
    pub total_sessions: i64,
    pub unique_players: i64,
    pub avg_score: f64,
    pub max_score: i64,
    pub min_score: i64,
}

/// Highest single-session score of a day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopScore {
    pub player_id: Uuid,
    pub score: i64,
    pub game_mode: String,
}

/// Daily activity report. `new_players` counts players whose first recorded
/// session fell on the report date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub sessions_played: i64,
    pub new_players: i64,
    pub top_score: Option<TopScore>,
}

/// Outcome of an incremental rank fix-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankChange {
    /// Stored rank before the fix-up, if the player had one.
    pub old_rank: Option<i64>,
    pub new_rank: i64,
    /// False when the recomputed rank matched the stored one (no write).
    pub changed: bool,
}

/// Outcome of a full rank rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Players holding a rank after the rebuild.
    pub ranked: i64,
    /// Rows whose rank actually changed.
    pub updated: u64,
}

/// What the store returns for a recorded session: the session row, the
/// post-increment aggregate (rank still pre-fix-up), and whether the entry
/// was created by this submission.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: PlaySession,
    pub entry: LeaderboardEntry,
    pub created: bool,
}

/// Response body for a score submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedScore {
    pub session: PlaySession,
    pub total_score: i64,
    pub rank: Option<i64>,
    pub created: bool,
}

/// One page of the leaderboard. `count` is the snapshot size on a cache hit
/// and the full ranked-player count on a store fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub count: i64,
    pub results: Vec<TopEntry>,
}

/// Live rank lookup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRank {
    pub player_id: Uuid,
    pub total_score: i64,
    pub rank: i64,
}
