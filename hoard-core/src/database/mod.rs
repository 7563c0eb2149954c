//! SQLite persistence for the catalog.

pub mod directories;
pub mod file_groups;
pub mod tags;

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Rows bound per statement when a query expands an `IN (...)` list.
pub(crate) const BIND_CHUNK: usize = 500;

/// Open (creating if needed) the catalog database at `url`.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    info!(target: "hoard::database", url, max_connections, "connected to catalog database");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// `connect` followed by `migrate`.
pub async fn open(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let pool = connect(url, max_connections).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Row counts shown by status displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub file_groups: i64,
    pub unindexed: i64,
    pub directories: i64,
}

pub async fn stats(pool: &SqlitePool) -> Result<CatalogStats> {
    let mut conn = pool.acquire().await?;
    Ok(CatalogStats {
        file_groups: file_groups::count(&mut conn).await?,
        unindexed: file_groups::count_unindexed(&mut conn).await?,
        directories: directories::count(&mut conn).await?,
    })
}
