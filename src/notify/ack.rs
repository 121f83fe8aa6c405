//! Persisted user reactions to notifications.

use sqlx::{Row, SqlitePool};
use std::time::Duration;

use crate::error::StoreResult;

use super::UserAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub key: String,
    pub action: UserAction,
    /// Unix seconds
    pub recorded_at: i64,
}

impl AckRecord {
    /// A record is live until `ttl` has passed since it was written.
    pub fn is_live(&self, ttl: Option<Duration>, now: i64) -> bool {
        match ttl {
            None => true,
            Some(ttl) => now - self.recorded_at < ttl.as_secs() as i64,
        }
    }
}

#[derive(Clone)]
pub struct AckStore {
    pool: SqlitePool,
}

impl AckStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record (or overwrite) the reaction for a key.
    pub async fn record(&self, key: &str, action: UserAction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO acknowledgements (key, action, recorded_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                action = excluded.action,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(key)
        .bind(action.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Recorded {} for {}", action.as_str(), key);
        Ok(())
    }

    pub async fn lookup(&self, key: &str) -> StoreResult<Option<AckRecord>> {
        let row = sqlx::query("SELECT action, recorded_at FROM acknowledgements WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| {
            let action: String = row.get("action");
            // Unknown actions come from a newer build; treat them as absent.
            UserAction::parse(&action).map(|action| AckRecord {
                key: key.to_string(),
                action,
                recorded_at: row.get("recorded_at"),
            })
        }))
    }

    pub async fn is_acknowledged(&self, key: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let now = chrono::Utc::now().timestamp();
        let Some(record) = self.lookup(key).await? else {
            return Ok(false);
        };
        tracing::trace!(
            "{} was {} at {}",
            record.key,
            record.action.as_str(),
            record.recorded_at
        );
        Ok(record.is_live(ttl, now))
    }

    /// Returns whether a record existed.
    pub async fn clear(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM acknowledgements WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_all(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM acknowledgements")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete records older than `older_than`. Returns how many went.
    pub async fn prune(&self, older_than: Duration) -> StoreResult<u64> {
        let age = i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp().saturating_sub(age);
        let result = sqlx::query("DELETE FROM acknowledgements WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[cfg(test)]
    async fn backdate(&self, key: &str, secs: i64) {
        sqlx::query("UPDATE acknowledgements SET recorded_at = recorded_at - ? WHERE key = ?")
            .bind(secs)
            .bind(key)
            .execute(&self.pool)
            .await
            .unwrap();
    }
}
