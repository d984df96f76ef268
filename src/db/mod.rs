use sqlx::postgres::{PgPool, PgPoolOptions};
use crate::config::Config;

pub mod models;
pub mod queries;

pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

/// A unique violation raised by the named index.
pub fn violates_unique(err: &sqlx::Error, index: &str) -> bool {
    is_unique_violation(err)
        && err
            .as_database_error()
            .and_then(|db| db.constraint())
            .map(|name| name == index)
            .unwrap_or(false)
}
