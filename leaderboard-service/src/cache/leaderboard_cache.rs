/// Leaderboard cache over Redis
///
/// Reads degrade Redis failures to misses so the read path can always fall
/// back to the store; writes surface errors to the caller, which logs them.
/// Cached values are never ground truth for writes.
use async_trait::async_trait;
use chrono::NaiveDate;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics::CACHE_EVENTS_TOTAL;
use crate::models::{DailyReport, GameModeStats, TopSnapshot};

#[async_trait]
pub trait LeaderboardCache: Send + Sync {
    /// Cached top-K snapshot; `None` on miss or unavailable cache.
    async fn top_snapshot(&self) -> Result<Option<TopSnapshot>>;

    /// Overwrite the top-K snapshot wholesale.
    async fn refresh_top(&self, snapshot: &TopSnapshot) -> Result<()>;

    /// Drop the top-K snapshot so the next read refreshes it.
    async fn invalidate_top(&self) -> Result<()>;

    async fn mode_stats(&self) -> Result<Option<Vec<GameModeStats>>>;

    async fn write_mode_stats(&self, stats: &[GameModeStats]) -> Result<()>;

    async fn daily_report(&self, date: NaiveDate) -> Result<Option<DailyReport>>;

    async fn write_daily_report(&self, report: &DailyReport) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisLeaderboardCache {
    redis: ConnectionManager,
    top_ttl: Duration,
    mode_stats_ttl: Duration,
    report_ttl: Duration,
}

impl RedisLeaderboardCache {
    pub fn new(redis: ConnectionManager, config: &CacheConfig) -> Self {
        Self {
            redis,
            top_ttl: Duration::from_secs(config.top_ttl_secs),
            mode_stats_ttl: Duration::from_secs(config.mode_stats_ttl_secs),
            report_ttl: Duration::from_secs(config.report_ttl_secs),
        }
    }

    fn top_key() -> &'static str {
        "leaderboard:top:v1"
    }

    fn mode_stats_key() -> &'static str {
        "leaderboard:mode_stats:v1"
    }

    fn report_key(date: NaiveDate) -> String {
        format!("leaderboard:report:v1:{}", date)
    }

    /// TTL plus up to 10% random jitter so concurrently written keys do not
    /// expire in lockstep.
    fn jittered(ttl: Duration) -> Duration {
        let jitter = (rand::random::<u32>() % 10) as f64 / 100.0;
        let jitter_secs = (ttl.as_secs_f64() * jitter).round() as u64;
        ttl + Duration::from_secs(jitter_secs)
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str, what: &str) -> Option<T> {
        let mut conn = self.redis.clone();

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => match serde_json::from_str::<T>(&data) {
                Ok(value) => {
                    debug!("{} cache HIT", what);
                    CACHE_EVENTS_TOTAL.with_label_values(&["hit"]).inc();
                    Some(value)
                }
                Err(e) => {
                    error!("Failed to deserialize cached {}: {}", what, e);
                    CACHE_EVENTS_TOTAL.with_label_values(&["error"]).inc();
                    None
                }
            },
            Ok(None) => {
                debug!("{} cache MISS", what);
                CACHE_EVENTS_TOTAL.with_label_values(&["miss"]).inc();
                None
            }
            Err(e) => {
                warn!("Redis read error for {}: {}", what, e);
                CACHE_EVENTS_TOTAL.with_label_values(&["error"]).inc();
                None
            }
        }
    }

    async fn write_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        what: &str,
    ) -> Result<()> {
        let data = serde_json::to_string(value)?;

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, data, ttl.as_secs()).await?;

        debug!("{} cache WRITE with TTL {:?}", what, ttl);
        Ok(())
    }
}

#[async_trait]
impl LeaderboardCache for RedisLeaderboardCache {
    async fn top_snapshot(&self) -> Result<Option<TopSnapshot>> {
        Ok(self.read_json(Self::top_key(), "top snapshot").await)
    }

    async fn refresh_top(&self, snapshot: &TopSnapshot) -> Result<()> {
        self.write_json(
            Self::top_key(),
            snapshot,
            Self::jittered(self.top_ttl),
            "top snapshot",
        )
        .await
    }

    async fn invalidate_top(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::top_key()).await?;

        debug!("top snapshot cache INVALIDATE");
        Ok(())
    }

    async fn mode_stats(&self) -> Result<Option<Vec<GameModeStats>>> {
        Ok(self.read_json(Self::mode_stats_key(), "mode stats").await)
    }

    async fn write_mode_stats(&self, stats: &[GameModeStats]) -> Result<()> {
        self.write_json(
            Self::mode_stats_key(),
            &stats.to_vec(),
            self.mode_stats_ttl,
            "mode stats",
        )
        .await
    }

    async fn daily_report(&self, date: NaiveDate) -> Result<Option<DailyReport>> {
        Ok(self.read_json(&Self::report_key(date), "daily report").await)
    }

    async fn write_daily_report(&self, report: &DailyReport) -> Result<()> {
        self.write_json(
            &Self::report_key(report.date),
            report,
            self.report_ttl,
            "daily report",
        )
        .await
    }
}
