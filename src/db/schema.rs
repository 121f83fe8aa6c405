//! Database schema initialization.

use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Idempotent, runs on every open.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        -- Accounts; ids are assigned by the store, not AUTOINCREMENT
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY CHECK (id >= 1),
            server TEXT NOT NULL,
            port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
            username TEXT NOT NULL,
            password TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_login INTEGER
        );

        -- Accounts to resume on the next plain start
        CREATE TABLE IF NOT EXISTS last_active (
            account_id INTEGER PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
            position INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        -- User reactions to notifications, keyed by notification key
        CREATE TABLE IF NOT EXISTS acknowledgements (
            key TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            recorded_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ack_recorded_at ON acknowledgements(recorded_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
