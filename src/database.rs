use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::errors::{AppError, Result};
use crate::models::{Account, MediaKind};
use crate::models::account::ProviderIdentity;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Database { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_by_id(&self, account_id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    pub async fn find_by_provider_id(&self, provider_id: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE provider_id = ?")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    /// Looks up or creates the account for a provider identity. First seen
    /// wins: a later login never overwrites plan or usage fields.
    pub async fn upsert_account(&self, identity: &ProviderIdentity, now: i64) -> Result<Account> {
        if let Some(existing) = self.find_by_provider_id(&identity.id).await? {
            return Ok(existing);
        }

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO accounts
                (provider_id, email, display_name, avatar_url, plan, mp3_count, mp4_count, window_start)
            VALUES (?, ?, ?, ?, 'free', 0, 0, ?)
            "#,
        )
        .bind(&identity.id)
        .bind(&identity.email)
        .bind(&identity.name)
        .bind(&identity.picture)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_provider_id(&identity.id)
            .await?
            .ok_or_else(|| AppError::Auth("Email is already linked to another account".to_string()))
    }

    /// Zeroes both counters and advances the window in one conditional
    /// update. Returns whether a reset happened; a concurrent second call
    /// inside the fresh window matches zero rows.
    pub async fn reset_window(&self, account_id: i64, cutoff: i64, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET mp3_count = 0, mp4_count = 0, window_start = ? \
             WHERE id = ? AND window_start < ?",
        )
        .bind(now)
        .bind(account_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically advances the counter for `kind` if it is still below
    /// `limit`. Returns whether the reservation succeeded.
    pub async fn try_reserve(&self, account_id: i64, kind: MediaKind, limit: i64) -> Result<bool> {
        let query = match kind {
            MediaKind::Audio => {
                "UPDATE accounts SET mp3_count = mp3_count + 1 WHERE id = ? AND mp3_count < ?"
            }
            MediaKind::Video => {
                "UPDATE accounts SET mp4_count = mp4_count + 1 WHERE id = ? AND mp4_count < ?"
            }
        };

        let result = sqlx::query(query)
            .bind(account_id)
            .bind(limit)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Rolls a reservation back after a failed conversion, floored at zero.
    pub async fn release(&self, account_id: i64, kind: MediaKind) -> Result<()> {
        let query = match kind {
            MediaKind::Audio => {
                "UPDATE accounts SET mp3_count = MAX(mp3_count - 1, 0) WHERE id = ?"
            }
            MediaKind::Video => {
                "UPDATE accounts SET mp4_count = MAX(mp4_count - 1, 0) WHERE id = ?"
            }
        };

        sqlx::query(query).bind(account_id).execute(&self.pool).await?;

        Ok(())
    }
}
