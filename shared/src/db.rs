use anyhow::Result;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use bb8::RunError;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, PoolError};
use diesel::Connection;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use thiserror::Error;
use tracing::info;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

impl From<RunError<PoolError>> for StoreError {
    fn from(e: RunError<PoolError>) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub async fn build_pool(database_url: &str, max_size: u32) -> Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder().max_size(max_size).build(config).await?;
    Ok(pool)
}

/// Applies pending embedded migrations. Migrations are synchronous in
/// diesel, so the wrapped connection is opened and driven on the blocking
/// pool.
pub async fn run_migrations(database_url: &str, migrations: EmbeddedMigrations) -> Result<()> {
    let database_url = database_url.to_string();

    let applied = tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut conn = <AsyncConnectionWrapper<AsyncPgConnection> as Connection>::establish(&database_url)?;
        conn.run_pending_migrations(migrations)
            .map(|versions| versions.len())
            .map_err(|e| anyhow::anyhow!("Migration error: {}", e))
    })
    .await??;

    info!(applied, "Migrations completed successfully");
    Ok(())
}

pub async fn ping(pool: &DbPool) -> Result<(), StoreError> {
    let mut conn = pool.get().await?;
    diesel::sql_query("SELECT 1").execute(&mut conn).await?;
    Ok(())
}
