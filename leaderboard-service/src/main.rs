use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use chrono::Utc;
use leaderboard_service::cache::{LeaderboardCache, RedisLeaderboardCache};
use leaderboard_service::db::{LeaderboardStore, PgLeaderboardStore};
use leaderboard_service::handlers;
use leaderboard_service::jobs;
use leaderboard_service::services::{RankEngine, SubmissionService};
use leaderboard_service::workers;
use leaderboard_service::Config;
use redis::aio::ConnectionManager;
use redis::RedisError;
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use task_queue::{SqlxTaskQueue, TaskProcessor, TaskQueue, TaskQueueMetrics};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct HealthState {
    db_pool: sqlx::Pool<sqlx::Postgres>,
    redis: ConnectionManager,
    queue: Arc<dyn TaskQueue>,
}

impl HealthState {
    fn new(
        db_pool: sqlx::Pool<sqlx::Postgres>,
        redis: ConnectionManager,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            db_pool,
            redis,
            queue,
        }
    }

    async fn check_postgres(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.db_pool)
            .await
            .map(|_| ())
    }

    async fn check_redis(&self) -> Result<(), RedisError> {
        let mut conn = self.redis.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(RedisError::from((
                redis::ErrorKind::ResponseError,
                "unexpected PING response",
            )))
        }
    }
}

async fn health_summary(state: web::Data<HealthState>) -> HttpResponse {
    match state.check_postgres().await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "leaderboard-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unhealthy",
            "error": format!("PostgreSQL connection failed: {}", e),
            "service": "leaderboard-service"
        })),
    }
}

async fn readiness_summary(state: web::Data<HealthState>) -> HttpResponse {
    let started = Instant::now();
    let postgres = state.check_postgres().await;
    let postgres_ms = started.elapsed().as_millis() as u64;

    let started = Instant::now();
    let redis = state.check_redis().await;
    let redis_ms = started.elapsed().as_millis() as u64;

    // Queue depth is informational; a deep backlog delays rank rebuilds but
    // does not make the service unready.
    let queue_pending = state
        .queue
        .pending_stats()
        .await
        .ok()
        .map(|(pending, _)| pending);

    let ready = postgres.is_ok() && redis.is_ok();
    let body = serde_json::json!({
        "ready": ready,
        "checks": {
            "postgresql": {
                "ok": postgres.is_ok(),
                "latency_ms": postgres_ms,
                "error": postgres.err().map(|e| e.to_string()),
            },
            "redis": {
                "ok": redis.is_ok(),
                "latency_ms": redis_ms,
                "error": redis.err().map(|e| e.to_string()),
            },
        },
        "queue_pending": queue_pending,
        "timestamp": Utc::now().to_rfc3339(),
    });

    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"alive": true}))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

/// Leaderboard Service
///
/// Accepts score submissions, maintains per-player aggregates with a dense
/// rank projection, and serves top-N and per-player rank reads. Rank upkeep
/// is split between a synchronous post-submit fix-up for the submitter and a
/// periodic full rebuild for everyone else.
///
/// # Routes
///
/// - `POST /api/v1/leaderboard/submit` - Record a play session
/// - `GET /api/v1/leaderboard/top` - Current top of the leaderboard
/// - `GET /api/v1/leaderboard/rank/{player_id}` - Live rank for one player
/// - `POST /api/v1/leaderboard/admin/update-ranks` - Queue a full rebuild
/// - `GET /api/v1/leaderboard/stats/modes` - Per-mode statistics
#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting leaderboard-service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app.env);

    // Initialize database connection pool
    let db_pool = match PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {}", e);
            eprintln!("ERROR: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Migration failed: {e}")))?;

    tracing::info!("Connected to database, migrations applied");

    // Initialize Redis connection
    let redis_client = redis::Client::open(config.cache.url.as_str())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Invalid REDIS_URL: {e}")))?;
    let redis_manager = ConnectionManager::new(redis_client).await.map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to initialize Redis connection: {e}"),
        )
    })?;

    tracing::info!("Connected to Redis");

    // Wire up components
    let store: Arc<dyn LeaderboardStore> = Arc::new(PgLeaderboardStore::new(db_pool.clone()));
    let cache: Arc<dyn LeaderboardCache> = Arc::new(RedisLeaderboardCache::new(
        redis_manager.clone(),
        &config.cache,
    ));
    let queue: Arc<dyn TaskQueue> = Arc::new(SqlxTaskQueue::new(db_pool.clone()));
    let engine = Arc::new(RankEngine::new(store.clone(), &config.ranking));
    let submission = Arc::new(SubmissionService::new(
        store.clone(),
        cache.clone(),
        queue.clone(),
        engine.clone(),
        &config.ranking,
    ));

    let processor = workers::register_all(
        TaskProcessor::new(
            queue.clone(),
            config.tasks.batch_size,
            Duration::from_secs(config.tasks.poll_interval_secs),
        )
        .with_metrics(TaskQueueMetrics::new("leaderboard-service")),
        engine.clone(),
        store.clone(),
        cache.clone(),
        config.ranking.top_k,
        config.retention.session_retention_days,
    );

    let schedules = jobs::schedules(&config);

    let http_bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Starting HTTP server at {}", http_bind_address);

    let health_state = web::Data::new(HealthState::new(
        db_pool.clone(),
        redis_manager.clone(),
        queue.clone(),
    ));
    let config_data = web::Data::new(config.clone());
    let submission_data = web::Data::new(submission.clone());
    let server_config = config.clone();

    // Create HTTP server
    let server = HttpServer::new(move || {
        // Build CORS configuration
        let mut cors = Cors::default();
        for origin in server_config.cors.allowed_origins.split(',') {
            let origin = origin.trim();
            if origin == "*" {
                cors = cors.allow_any_origin();
            } else {
                cors = cors.allowed_origin(origin);
            }
        }
        let cors = cors.allow_any_method().allow_any_header().max_age(3600);

        App::new()
            .app_data(config_data.clone())
            .app_data(submission_data.clone())
            .app_data(health_state.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route(
                "/metrics",
                web::get().to(leaderboard_service::metrics::serve_metrics),
            )
            // Health check endpoints
            .route("/api/v1/health", web::get().to(health_summary))
            .route("/api/v1/health/ready", web::get().to(readiness_summary))
            .route("/api/v1/health/live", web::get().to(liveness_check))
            .service(
                web::scope("/api/v1/leaderboard")
                    .route("/submit", web::post().to(handlers::submit_score))
                    .route("/top", web::get().to(handlers::get_top_players))
                    .route("/rank/{player_id}", web::get().to(handlers::get_player_rank))
                    .route("/admin/update-ranks", web::post().to(handlers::update_ranks))
                    .route("/stats/modes", web::get().to(handlers::get_mode_stats)),
            )
    })
    .bind(&http_bind_address)?
    .workers(4)
    .run();

    let server_handle = server.handle();

    let (shutdown_tx, _) = broadcast::channel(1);

    // Spawn the HTTP server, the task processor, and the schedulers
    let mut tasks: JoinSet<io::Result<()>> = JoinSet::new();

    tasks.spawn(async move {
        tracing::info!("HTTP server is running");
        server.await
    });

    let processor_shutdown = shutdown_tx.subscribe();
    tasks.spawn(async move {
        processor.run(processor_shutdown).await;
        Ok(())
    });

    for schedule in schedules {
        let schedule_queue = queue.clone();
        let schedule_shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move {
            jobs::run_schedule(schedule_queue, schedule, schedule_shutdown).await;
            Ok(())
        });
    }

    // Every spawned task runs until shutdown, so the first one to finish
    // (cleanly or not) takes the whole service down with it.
    let mut first_error: Option<io::Error> = None;

    tokio::select! {
        finished = tasks.join_next() => {
            match finished {
                Some(Ok(Ok(()))) => tracing::warn!("A background worker exited unexpectedly"),
                Some(Ok(Err(e))) => {
                    tracing::error!("Background worker failed: {}", e);
                    first_error = Some(e);
                }
                Some(Err(e)) => {
                    tracing::error!("Background worker panicked: {}", e);
                    first_error = Some(io::Error::new(io::ErrorKind::Other, e.to_string()));
                }
                None => {}
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(());
    server_handle.stop(true).await;
    tasks.shutdown().await;

    tracing::info!("Leaderboard service stopped");

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
