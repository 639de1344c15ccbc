/// Configuration management for Leaderboard Service
///
/// This module handles loading and managing configuration from environment
/// variables.
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Cache (Redis) configuration
    pub cache: CacheConfig,
    /// Rank maintenance configuration
    pub ranking: RankingConfig,
    /// Session retention configuration
    pub retention: RetentionConfig,
    /// Background task processing configuration
    pub tasks: TasksConfig,
    /// Admin endpoint configuration
    pub admin: AdminConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Comma-separated list of allowed origins
    pub allowed_origins: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    pub max_connections: u32,
    /// Min idle connections kept in pool
    pub min_connections: u32,
}

/// Cache (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL
    pub url: String,
    /// TTL for the cached top-K snapshot, in seconds
    pub top_ttl_secs: u64,
    /// TTL for cached game-mode statistics, in seconds
    pub mode_stats_ttl_secs: u64,
    /// TTL for cached daily reports, in seconds
    pub report_ttl_secs: u64,
    /// How often the top-K snapshot refresh task is scheduled, in seconds
    pub top_refresh_interval_secs: u64,
    /// How often the mode-stats recompute task is scheduled, in seconds
    pub stats_refresh_interval_secs: u64,
}

/// Rank maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Number of entries held in the cached top snapshot
    pub top_k: i64,
    /// Full rebuild cadence in seconds. This is the staleness bound for
    /// non-submitting players' ranks.
    pub rebuild_interval_secs: u64,
    /// Attempt budget for the synchronous post-submit rank fix-up
    pub fixup_max_attempts: u32,
    /// Base backoff between fix-up attempts, in milliseconds
    pub fixup_backoff_ms: u64,
    /// Minimum rank improvement that triggers a notification
    pub notify_min_improvement: i64,
    /// Entering the top N triggers a notification
    pub notify_top_threshold: i64,
}

/// Session retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Play sessions older than this many days are purged
    pub session_retention_days: i64,
    /// How often the purge task is scheduled, in seconds
    pub purge_interval_secs: u64,
}

/// Background task processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Queue poll interval in seconds
    pub poll_interval_secs: u64,
    /// Max tasks claimed per poll
    pub batch_size: i32,
}

/// Admin endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared token required by privileged endpoints
    pub token: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Ok(Config {
            app: AppConfig {
                env: app_env.clone(),
                host: std::env::var("LEADERBOARD_SERVICE_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("LEADERBOARD_SERVICE_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8086),
            },
            cors: {
                let allowed_origins = match std::env::var("CORS_ALLOWED_ORIGINS") {
                    Ok(value) => value,
                    Err(_) if app_env.eq_ignore_ascii_case("production") => {
                        return Err("CORS_ALLOWED_ORIGINS must be set in production".to_string())
                    }
                    Err(_) => "http://localhost:3000".to_string(),
                };

                if app_env.eq_ignore_ascii_case("production") && allowed_origins.trim() == "*" {
                    return Err("CORS_ALLOWED_ORIGINS cannot be '*' in production".to_string());
                }

                CorsConfig { allowed_origins }
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/leaderboard".to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(10),
                min_connections: std::env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(2),
            },
            cache: CacheConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                top_ttl_secs: std::env::var("CACHE_TOP_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
                mode_stats_ttl_secs: std::env::var("CACHE_MODE_STATS_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(900),
                report_ttl_secs: std::env::var("CACHE_REPORT_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(86_400),
                top_refresh_interval_secs: std::env::var("CACHE_TOP_REFRESH_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
                stats_refresh_interval_secs: std::env::var("CACHE_STATS_REFRESH_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(900),
            },
            ranking: RankingConfig {
                top_k: std::env::var("LEADERBOARD_TOP_K")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(50),
                rebuild_interval_secs: std::env::var("RANK_REBUILD_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
                fixup_max_attempts: std::env::var("RANK_FIXUP_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3),
                fixup_backoff_ms: std::env::var("RANK_FIXUP_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
                notify_min_improvement: std::env::var("NOTIFY_MIN_IMPROVEMENT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
                notify_top_threshold: std::env::var("NOTIFY_TOP_THRESHOLD")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            },
            retention: RetentionConfig {
                session_retention_days: std::env::var("SESSION_RETENTION_DAYS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(365),
                purge_interval_secs: std::env::var("PURGE_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(86_400),
            },
            tasks: TasksConfig {
                poll_interval_secs: std::env::var("TASK_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
                batch_size: std::env::var("TASK_BATCH_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            },
            admin: {
                let token = match std::env::var("ADMIN_TOKEN") {
                    Ok(value) => value,
                    Err(_) if app_env.eq_ignore_ascii_case("production") => {
                        return Err("ADMIN_TOKEN must be set in production".to_string())
                    }
                    Err(_) => "dev-admin-token".to_string(),
                };

                if app_env.eq_ignore_ascii_case("production") && token.trim().is_empty() {
                    return Err("ADMIN_TOKEN cannot be empty in production".to_string());
                }

                AdminConfig { token }
            },
        })
    }
}
