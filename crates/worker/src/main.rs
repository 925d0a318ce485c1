//! Skillet Background Worker
//!
//! Handles scheduled jobs including:
//! - Trial expiration sweep (once at startup, then hourly)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use skillet_billing::{SweepSummary, TrialService};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Log results of one sweep run
fn log_sweep_summary(summary: &SweepSummary) {
    info!(
        scanned = summary.scanned,
        expired = summary.expired,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        "Trial expiration sweep complete"
    );

    // Log individual errors
    for (user_id, error) in &summary.errors {
        error!(user_id = %user_id, error = %error, "Failed to expire trial");
    }
}

/// Run one sweep, skipping if the previous run is still in flight
async fn run_sweep(trials: &TrialService, in_flight: &tokio::sync::Mutex<()>) {
    let Ok(_guard) = in_flight.try_lock() else {
        warn!("Previous trial sweep still running, skipping this tick");
        return;
    };

    match trials.expire_lapsed_trials().await {
        Ok(summary) => log_sweep_summary(&summary),
        Err(e) => error!(error = %e, "Trial expiration sweep failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Skillet Worker");

    let pool = create_db_pool().await?;

    let cache = Arc::new(skillet_billing::QuotaCache::default());
    let trials = TrialService::new(pool.clone(), cache);
    let in_flight = Arc::new(tokio::sync::Mutex::new(()));

    // Sweep once at startup so trials that lapsed while the worker was
    // down are demoted immediately rather than up to an hour later
    info!("Running startup trial expiration sweep");
    run_sweep(&trials, &in_flight).await;

    let scheduler = JobScheduler::new().await?;

    // Job 1: Trial expiration sweep (hourly, on the hour)
    let sweep_trials = trials.clone();
    let sweep_in_flight = in_flight.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let trials = sweep_trials.clone();
            let in_flight = sweep_in_flight.clone();
            Box::pin(async move {
                info!("Running scheduled trial expiration sweep");
                run_sweep(&trials, &in_flight).await;
            })
        })?)
        .await?;
    info!("Scheduled: Trial expiration sweep (hourly)");

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker started, all jobs scheduled");

    // Park the main task; the scheduler runs on its own tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
