use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::config::ServiceConfig;

const SCHEMA: &str = include_str!("../schema.sql");

pub async fn connect_database(config: &ServiceConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    Ok(pool)
}

/// Creates missing tables and indexes. Safe to run on every start.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("failed to apply schema")?;
    info!("database schema is up to date");
    Ok(())
}
