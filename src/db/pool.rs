use sqlx::PgPool;
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Sized for one writer per concurrently processed property plus the
/// shared cache and the HTTP handlers.
pub async fn create_pool(database_url: &str, max_concurrent_properties: usize) -> Result<PgPool, sqlx::Error> {
    let max_connections = (max_concurrent_properties as u32).saturating_mul(2).clamp(5, 50);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Database connection pool created");

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
