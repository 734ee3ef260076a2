use crate::config;
use anyhow::{bail, Context, Result};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;

pub async fn connect(database_url: &str) -> Result<Pool<Postgres>> {
    let max_connections = config::u64_from_env("HK_DB_MAX_CONNECTIONS", 10)?.clamp(1, 200) as u32;
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    tracing::debug!(max_connections, "postgres pool ready");
    Ok(pool)
}

/// Ready means reachable and migrated.
pub async fn check_ready(pool: &Pool<Postgres>) -> Result<()> {
    let migrated: bool =
        sqlx::query_scalar("SELECT to_regclass('hk.user_grants') IS NOT NULL")
            .fetch_one(pool)
            .await?;
    if !migrated {
        bail!("hk schema has not been migrated");
    }
    Ok(())
}
