use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;
use uuid::Uuid;

use crate::AppResult;

/// Opens the pool and brings the schema up to date.
///
/// Foreign keys are enforced on every connection, so deleting a user or a
/// post cascades to everything that references it.
pub async fn connect(database_url: &str) -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;

    migrate(&db_pool).await?;
    info!(url = %database_url, "database ready");

    Ok(db_pool)
}

/// A private in-memory database. One connection, so every query sees the
/// same data.
pub async fn memory() -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&db_pool).await?;
    Ok(db_pool)
}

pub async fn migrate(db_pool: &SqlitePool) -> AppResult<()> {
    sqlx::migrate!("./migrations").run(db_pool).await?;
    Ok(())
}

/// Ids are UUIDv7, so sorting by id sorts by creation time.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}
