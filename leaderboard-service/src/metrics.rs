/// Prometheus metrics for leaderboard-service
///
/// Submission-path collectors are registered once via `lazy_static` and used
/// directly at call sites; background-work collectors are wrapped in helper
/// functions.
use actix_web::HttpResponse;
use lazy_static::lazy_static;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    /// Score submissions segmented by outcome (success, validation_error, error)
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "leaderboard_submissions_total",
        "Score submissions segmented by outcome",
        &["result"]
    )
    .expect("Failed to register leaderboard_submissions_total");

    /// End-to-end submission handling duration
    pub static ref SUBMISSION_DURATION_SECONDS: Histogram = register_histogram!(
        "leaderboard_submission_duration_seconds",
        "Score submission handling duration in seconds"
    )
    .expect("Failed to register leaderboard_submission_duration_seconds");

    /// Leaderboard cache events segmented by outcome (hit, miss, error)
    pub static ref CACHE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "leaderboard_cache_events_total",
        "Leaderboard cache events segmented by outcome",
        &["event"]
    )
    .expect("Failed to register leaderboard_cache_events_total");

    /// Incremental rank fix-ups segmented by outcome (applied, unchanged, failed)
    pub static ref RANK_FIXUP_TOTAL: IntCounterVec = register_int_counter_vec!(
        "leaderboard_rank_fixup_total",
        "Incremental rank fix-ups segmented by outcome",
        &["result"]
    )
    .expect("Failed to register leaderboard_rank_fixup_total");

    /// Live single-player rank lookups
    pub static ref RANK_LOOKUPS_TOTAL: IntCounter = register_int_counter!(
        "leaderboard_rank_lookups_total",
        "Live single-player rank lookups"
    )
    .expect("Failed to register leaderboard_rank_lookups_total");
}

static RANK_REBUILD_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "leaderboard_rank_rebuild_duration_seconds",
        "Duration of full rank rebuilds in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register leaderboard_rank_rebuild_duration_seconds")
});

static RANK_REBUILD_UPDATED_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "leaderboard_rank_rebuild_updated_entries",
        "Entries whose rank changed in the last full rebuild"
    )
    .expect("Failed to register leaderboard_rank_rebuild_updated_entries")
});

static TASKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "leaderboard_tasks_total",
        "Background task executions segmented by type and outcome",
        &["task_type", "result"]
    )
    .expect("Failed to register leaderboard_tasks_total")
});

static SESSIONS_PURGED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "leaderboard_sessions_purged_total",
        "Play sessions deleted by the retention sweep"
    )
    .expect("Failed to register leaderboard_sessions_purged_total")
});

/// Record the outcome of a full rank rebuild.
pub fn record_rebuild(duration: Duration, updated: u64) {
    RANK_REBUILD_DURATION_SECONDS.observe(duration.as_secs_f64());
    RANK_REBUILD_UPDATED_ENTRIES.set(updated as i64);
}

/// Record a background task execution (`result` is "ok", "error" or
/// "abandoned").
pub fn record_task_run(task_type: &str, result: &str) {
    TASKS_TOTAL.with_label_values(&[task_type, result]).inc();
}

/// Record sessions removed by a retention sweep.
pub fn record_sessions_purged(deleted: u64) {
    SESSIONS_PURGED_TOTAL.inc_by(deleted);
}

/// Actix handler exposing all registered collectors in Prometheus text
/// format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
