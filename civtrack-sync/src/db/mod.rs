//! Database access for civtrack-sync
//!
//! SQLite through a small sqlx pool. Write paths take a `&mut SqliteConnection`
//! so the persister can group them in one transaction per ballot.

pub mod ballots;
pub mod mandates;
pub mod persons;
pub mod schema;
pub mod stats;
pub mod sync_runs;
pub mod votes;

use civtrack_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Open (creating if needed) the database file and initialize the schema
pub async fn init_database_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    schema::initialize_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with schema, for tests and dry tooling
///
/// Each `:memory:` connection is its own database, hence one connection.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    schema::initialize_schema(&pool).await?;

    Ok(pool)
}
