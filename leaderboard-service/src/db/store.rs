/// Score store: play sessions and per-player aggregates.
///
/// The trait exists so services can run against an in-memory implementation
/// in tests; `PgLeaderboardStore` is the production implementation.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    DailyReport, GameModeStats, LeaderboardEntry, PlaySession, RebuildSummary, SessionOutcome,
    TopScore,
};

#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Record one session and fold its score into the player's aggregate.
    /// Both writes commit in a single transaction; the aggregate increment is
    /// a single atomic SQL add, never a read-modify-write. The returned entry
    /// carries the post-increment total and the rank as stored before any
    /// fix-up.
    async fn record_session(
        &self,
        player_id: Uuid,
        score: i64,
        game_mode: &str,
    ) -> Result<SessionOutcome>;

    async fn entry(&self, player_id: Uuid) -> Result<Option<LeaderboardEntry>>;

    /// Number of players with a strictly higher total.
    async fn count_better_than(&self, total_score: i64) -> Result<i64>;

    /// Conditional rank write. Returns false when the stored rank already
    /// matched (no row touched).
    async fn set_rank(&self, player_id: Uuid, rank: i64) -> Result<bool>;

    /// Recompute dense ranks for every player with a positive total, in one
    /// isolation scope, writing only rows whose rank actually changes.
    async fn rebuild_ranks(&self) -> Result<RebuildSummary>;

    /// Ordered page of entries for cache refresh and fallback reads.
    async fn top_entries(&self, limit: i64, offset: i64) -> Result<Vec<LeaderboardEntry>>;

    async fn ranked_player_count(&self) -> Result<i64>;

    /// Delete sessions older than the cutoff. Idempotent.
    async fn purge_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn game_mode_stats(&self) -> Result<Vec<GameModeStats>>;

    async fn daily_report(&self, date: NaiveDate) -> Result<DailyReport>;
}

#[derive(Clone)]
pub struct PgLeaderboardStore {
    pool: PgPool,
}

impl PgLeaderboardStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaderboardStore for PgLeaderboardStore {
    async fn record_session(
        &self,
        player_id: Uuid,
        score: i64,
        game_mode: &str,
    ) -> Result<SessionOutcome> {
        let mut tx = self.pool.begin().await?;

        let already_exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM leaderboard_entries
                WHERE player_id = $1
            )
            "#,
        )
        .bind(player_id)
        .fetch_one(&mut *tx)
        .await?;

        let session = sqlx::query_as::<_, PlaySession>(
            r#"
            INSERT INTO play_sessions (id, player_id, score, game_mode)
            VALUES ($1, $2, $3, $4)
            RETURNING id, player_id, score, game_mode, timestamp
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(player_id)
        .bind(score)
        .bind(game_mode)
        .fetch_one(&mut *tx)
        .await?;

        // The upsert leaves rank untouched, so RETURNING rank yields the
        // pre-fix-up value the coordinator needs as "old rank".
        let entry = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            INSERT INTO leaderboard_entries (player_id, total_score)
            VALUES ($1, $2)
            ON CONFLICT (player_id) DO UPDATE
            SET total_score = leaderboard_entries.total_score + EXCLUDED.total_score,
                updated_at = NOW()
            RETURNING player_id, total_score, rank
            "#,
        )
        .bind(player_id)
        .bind(score)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SessionOutcome {
            session,
            entry,
            created: !already_exists,
        })
    }

    async fn entry(&self, player_id: Uuid) -> Result<Option<LeaderboardEntry>> {
        let entry = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT player_id, total_score, rank
            FROM leaderboard_entries
            WHERE player_id = $1
            "#,
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn count_better_than(&self, total_score: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM leaderboard_entries
            WHERE total_score > $1
            "#,
        )
        .bind(total_score)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn set_rank(&self, player_id: Uuid, rank: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE leaderboard_entries
            SET rank = $2, updated_at = NOW()
            WHERE player_id = $1 AND rank IS DISTINCT FROM $2
            "#,
        )
        .bind(player_id)
        .bind(rank)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rebuild_ranks(&self) -> Result<RebuildSummary> {
        let mut tx = self.pool.begin().await?;

        // Single-statement pass: the statement snapshot gives one consistent
        // ordering, and IS DISTINCT FROM keeps the write set to rows whose
        // rank actually moved.
        let result = sqlx::query(
            r#"
            WITH ranked AS (
                SELECT player_id,
                       ROW_NUMBER() OVER (ORDER BY total_score DESC, player_id ASC) AS new_rank
                FROM leaderboard_entries
                WHERE total_score > 0
            )
            UPDATE leaderboard_entries e
            SET rank = r.new_rank, updated_at = NOW()
            FROM ranked r
            WHERE e.player_id = r.player_id
              AND e.rank IS DISTINCT FROM r.new_rank
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let ranked: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM leaderboard_entries
            WHERE total_score > 0
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RebuildSummary {
            ranked,
            updated: result.rows_affected(),
        })
    }

    async fn top_entries(&self, limit: i64, offset: i64) -> Result<Vec<LeaderboardEntry>> {
        let entries = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT player_id, total_score, rank
            FROM leaderboard_entries
            WHERE total_score > 0
            ORDER BY total_score DESC, player_id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn ranked_player_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM leaderboard_entries
            WHERE total_score > 0
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn purge_sessions_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM play_sessions
            WHERE timestamp < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn game_mode_stats(&self) -> Result<Vec<GameModeStats>> {
        let rows = sqlx::query(
            r#"
            SELECT game_mode,
                   COUNT(*) AS total_sessions,
                   COUNT(DISTINCT player_id) AS unique_players,
                   AVG(score)::DOUBLE PRECISION AS avg_score,
                   MAX(score) AS max_score,
                   MIN(score) AS min_score
            FROM play_sessions
            GROUP BY game_mode
            ORDER BY game_mode ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(GameModeStats {
                    game_mode: row.try_get("game_mode")?,
                    total_sessions: row.try_get("total_sessions")?,
                    unique_players: row.try_get("unique_players")?,
                    avg_score: row.try_get("avg_score")?,
                    max_score: row.try_get("max_score")?,
                    min_score: row.try_get("min_score")?,
                })
            })
            .collect()
    }

    async fn daily_report(&self, date: NaiveDate) -> Result<DailyReport> {
        let sessions_played: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM play_sessions
            WHERE timestamp::date = $1
            "#,
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        let new_players: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT player_id, MIN(timestamp) AS first_seen
                FROM play_sessions
                GROUP BY player_id
            ) firsts
            WHERE first_seen::date = $1
            "#,
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        let top_score = sqlx::query(
            r#"
            SELECT player_id, score, game_mode
            FROM play_sessions
            WHERE timestamp::date = $1
            ORDER BY score DESC
            LIMIT 1
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| -> Result<TopScore> {
            Ok(TopScore {
                player_id: row.try_get("player_id")?,
                score: row.try_get("score")?,
                game_mode: row.try_get("game_mode")?,
            })
        })
        .transpose()?;

        Ok(DailyReport {
            date,
            sessions_played,
            new_players,
            top_score,
        })
    }
}
