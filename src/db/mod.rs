//! SQLite database shared by every popper process.
//!
//! This module is split into:
//! - `mod.rs` - Db struct and connection pool
//! - `schema.rs` - Schema initialization
//!
//! The account store and the acknowledgement store both live in this one
//! file. Cross-process consistency relies on SQLite's own locking (WAL plus a
//! busy timeout); there is no in-process lock around it.

mod schema;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::account::AccountStore;
use crate::constants::{DB_BUSY_TIMEOUT_SECS, DB_POOL_SIZE};
use crate::notify::AckStore;

#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn open(path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(DB_BUSY_TIMEOUT_SECS))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DB_POOL_SIZE)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single connection that never expires: the database lives and dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to create in-memory connection pool")?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool (for tests).
    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn accounts(&self) -> AccountStore {
        AccountStore::new(self.pool.clone())
    }

    pub fn acks(&self) -> AckStore {
        AckStore::new(self.pool.clone())
    }

    /// Close every connection, checkpointing the WAL. Called on the way out
    /// so nothing is left half-written.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
