/// Leaderboard Service Library
///
/// Ingests play-session scores, maintains per-player aggregates with a dense
/// rank projection, and serves leaderboard reads from a Redis snapshot cache.
/// Non-submitting players' ranks are refreshed by a periodic full rebuild, so
/// a stored rank is never staler than one rebuild interval.
///
/// # Modules
///
/// - `handlers`: Leaderboard HTTP request handlers
/// - `models`: Sessions, aggregate entries, snapshots, reports
/// - `services`: Rank engine and submission coordination
/// - `db`: Database access layer
/// - `cache`: Snapshot and statistics caching
/// - `workers`: Deferred task handlers for the durable queue
/// - `jobs`: Periodic schedulers for recurring tasks
/// - `middleware`: Request identity and admin-token extractors
/// - `error`: Error types and handling
/// - `config`: Configuration management
/// - `metrics`: Observability and metrics collection
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;
pub mod workers;

pub use config::Config;
pub use error::{AppError, Result};
