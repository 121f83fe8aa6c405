//! Persistent account store.
//!
//! Every mutation is a single statement or a single transaction and is
//! committed before the call returns, so the database is the source of
//! truth across restarts and across concurrently running popper processes.

use sqlx::{Row, SqlitePool};

use super::model::{Account, AccountId, AccountSummary, AccountUpdate, NewAccount, Password};
use crate::error::{StoreError, StoreResult};

#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All accounts ordered by id. An empty result means nothing is
    /// configured yet.
    pub async fn list(&self) -> StoreResult<Vec<AccountSummary>> {
        let rows = sqlx::query(
            "SELECT id, username, server, port, last_login FROM accounts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AccountSummary {
                    id: AccountId(row.get("id")),
                    username: row.get("username"),
                    server: row.get("server"),
                    port: stored_port(row.get("port"))?,
                    last_login: row.get("last_login"),
                })
            })
            .collect()
    }

    /// Insert a new account under the smallest unused id >= 1.
    ///
    /// The id is computed inside the INSERT so two concurrent creators can
    /// never pick the same one.
    pub async fn create(&self, account: &NewAccount) -> StoreResult<AccountId> {
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO accounts (id, server, port, username, password, created_at)
            SELECT COALESCE(
                (SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM accounts WHERE id = 1)),
                (SELECT MIN(a.id + 1) FROM accounts a
                 WHERE NOT EXISTS (SELECT 1 FROM accounts b WHERE b.id = a.id + 1))
            ), ?, ?, ?, ?, ?
            RETURNING id
            "#,
        )
        .bind(&account.server)
        .bind(i64::from(account.port))
        .bind(&account.username)
        .bind(account.password.expose())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Created account {} for {}", id, account.username);
        Ok(AccountId(id))
    }

    pub async fn get(&self, id: AccountId) -> StoreResult<Account> {
        let row = sqlx::query(
            "SELECT id, server, port, username, password, last_login FROM accounts WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Ok(Account {
            id: AccountId(row.get("id")),
            server: row.get("server"),
            port: stored_port(row.get("port"))?,
            username: row.get("username"),
            password: Password::new(row.get::<String, _>("password")),
            last_login: row.get("last_login"),
        })
    }

    /// Replace one field of an account, leaving the others untouched.
    pub async fn update(&self, id: AccountId, update: AccountUpdate) -> StoreResult<()> {
        let update = update.validated()?;
        let field = update.field_name();

        let result = match update {
            AccountUpdate::ServerPort { server, port } => {
                sqlx::query("UPDATE accounts SET server = ?, port = ? WHERE id = ?")
                    .bind(server)
                    .bind(i64::from(port))
                    .bind(id.0)
                    .execute(&self.pool)
                    .await?
            }
            AccountUpdate::Username(username) => {
                sqlx::query("UPDATE accounts SET username = ? WHERE id = ?")
                    .bind(username)
                    .bind(id.0)
                    .execute(&self.pool)
                    .await?
            }
            AccountUpdate::Password(password) => {
                sqlx::query("UPDATE accounts SET password = ? WHERE id = ?")
                    .bind(password.expose())
                    .bind(id.0)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        tracing::info!("Updated {} of account {}", field, id);
        Ok(())
    }

    /// Delete an account and drop it from the last-active set.
    pub async fn delete(&self, id: AccountId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM last_active WHERE account_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Err(StoreError::NotFound(id));
        }

        tx.commit().await?;
        tracing::info!("Deleted account {}", id);
        Ok(())
    }

    /// Add accounts to the set resumed by a plain `popper` start. Already
    /// present ids keep their position; an unknown id aborts the whole call.
    pub async fn record_last_active(&self, ids: &[AccountId]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for id in ids {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM accounts WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(StoreError::NotFound(*id));
            }

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO last_active (account_id, position)
                VALUES (?, (SELECT COALESCE(MAX(position), 0) + 1 FROM last_active))
                "#,
            )
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn last_active(&self) -> StoreResult<Vec<AccountId>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT account_id FROM last_active ORDER BY position")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(AccountId).collect())
    }

    /// Log a single account out. Returns whether it was active.
    pub async fn remove_last_active(&self, id: AccountId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM last_active WHERE account_id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Log every account out.
    pub async fn clear_last_active(&self) -> StoreResult<()> {
        sqlx::query("DELETE FROM last_active")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stamp the last successful login.
    pub async fn touch_login(&self, id: AccountId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE accounts SET last_login = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

fn stored_port(port: i64) -> StoreResult<u16> {
    u16::try_from(port)
        .map_err(|_| StoreError::validation(format!("stored port {} is out of range", port)))
}
