//! Database pool construction

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the standard application connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("Database pool created");
    Ok(pool)
}

/// Create a pool and run pending migrations
///
/// Used by the API binary on startup so schema changes ship with the deploy.
pub async fn create_migration_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = create_pool(database_url).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    tracing::info!("Database migrations applied");
    Ok(pool)
}
