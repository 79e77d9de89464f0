use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing::info;

use syncd::config::AppConfig;
use syncd::job_store::PgJobStore;
use syncd::provider::HttpProviderFactory;
use syncd::queue::{PgTaskQueue, QUEUE_CLEANUP, QUEUE_JOBS};
use syncd::quota::PgQuotaLedger;
use syncd::state::AppState;
use syncd::tokens::TokenStore;
use syncd::{routes_jobs, routes_quota, scheduler, worker_loop};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let pool = PgPool::connect(&cfg.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    check_postgres(&pool).await?;
    info!("postgres: ok");

    let tokens = TokenStore::new(pool.clone());
    let state = AppState::new(
        cfg.clone(),
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(PgQuotaLedger::new(pool.clone(), cfg.quota_tz)),
        Arc::new(PgTaskQueue::new(pool.clone())),
        Arc::new(HttpProviderFactory::new(cfg.clone(), tokens)),
    );

    // One worker per queue: long sync tasks never block the reaper.
    tokio::spawn(worker_loop::run(state.clone(), QUEUE_JOBS));
    tokio::spawn(worker_loop::run(state.clone(), QUEUE_CLEANUP));
    tokio::spawn(scheduler::run(state.clone()));

    let app = Router::new()
        .route("/jobs/sync_sp_to_yt", post(routes_jobs::start_sync_sp_to_yt))
        .route("/jobs/sync_yt_to_sp", post(routes_jobs::start_sync_yt_to_sp))
        .route("/jobs/merge_playlists", post(routes_jobs::start_merge_playlists))
        .route("/jobs/:job_id", get(routes_jobs::get_job))
        .route("/jobs/latest/:user_id", get(routes_jobs::get_latest_job))
        .route("/jobs/:job_id/finalize", post(routes_jobs::finalize_job))
        .route("/api/youtube_quota_usage", get(routes_quota::youtube_quota_usage))
        .route("/api/set_youtube_quota", post(routes_quota::set_youtube_quota))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = &cfg.bind_addr;
    info!(%addr, "syncd listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn check_postgres(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("Postgres ping failed")?;
    Ok(())
}
