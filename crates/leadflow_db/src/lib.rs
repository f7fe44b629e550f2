//! Persistence boundary for leads and the CRM audit log.
//!
//! The core depends on this boundary (`find_by_id`, `save_*`, key lookups),
//! not on an ORM. Writes are single-row; there is no multi-row consistency
//! requirement anywhere in the pipeline.

mod error;
mod leads;
mod schema;
mod sync_log;

pub use error::{DbError, Result};
pub use leads::LeadStore;
pub use sync_log::{NewSyncLog, SyncLogStore};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Database pool type alias.
///
/// SQLite is the supported backend; a `postgres://` URL is recognised but
/// rejected until that backend lands.
pub type DbPool = sqlx::SqlitePool;

/// Open a pool from a database URL and initialise the schema.
pub async fn connect(url: &str) -> Result<DbPool> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        return Err(DbError::UnsupportedUrl(format!(
            "{url} (Postgres persistence not yet supported)"
        )));
    }
    if !url.starts_with("sqlite:") {
        return Err(DbError::UnsupportedUrl(url.to_string()));
    }

    let options = SqliteConnectOptions::from_str(url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    schema::init(&pool).await?;
    info!("Database ready");
    Ok(pool)
}

/// Open an in-memory pool for tests.
pub async fn connect_memory() -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(sqlx::Error::from)?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    schema::init(&pool).await?;
    Ok(pool)
}
