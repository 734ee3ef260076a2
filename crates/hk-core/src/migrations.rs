use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, Pool, Postgres};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies pending server migrations and returns the newest known version.
pub async fn run(pool: &Pool<Postgres>) -> Result<Option<i64>> {
    MIGRATOR
        .run(pool)
        .await
        .context("server migrations failed")?;
    let version = MIGRATOR.iter().map(|migration| migration.version).max();
    tracing::info!(version, "server schema up to date");
    Ok(version)
}
