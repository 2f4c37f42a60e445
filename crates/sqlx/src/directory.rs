//! User directory backed by the `system_users` table

use crate::common::datetime_to_string;
use async_trait::async_trait;
use chrono::Utc;
use crm_permission_core::{Error, IdentityValidator, Result, UserId};
use sqlx::{Database, Executor, FromRow, IntoArguments, Pool};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

const STATUS_ENABLED: i32 = 0;
const STATUS_DISABLED: i32 = 1;

/// Generic SQLx implementation of [`IdentityValidator`]
pub struct SqlxUserDirectory<DB: Database> {
    pool: Pool<DB>,
}

#[cfg(feature = "sqlite")]
pub type SqliteUserDirectory = SqlxUserDirectory<sqlx::Sqlite>;

#[cfg(feature = "postgres")]
pub type PostgresUserDirectory = SqlxUserDirectory<sqlx::Postgres>;

impl<DB: Database> SqlxUserDirectory<DB> {
    pub fn from_pool(pool: Pool<DB>) -> Self {
        Self { pool }
    }
}

impl<DB> SqlxUserDirectory<DB>
where
    DB: Database,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    for<'q> String: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> Option<String>: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> i32: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
{
    /// Insert a user or update its nickname and status
    #[instrument(name = "db.upsert_user", skip(self))]
    pub async fn add_user(
        &self,
        user_id: UserId,
        nickname: Option<String>,
        enabled: bool,
    ) -> Result<()> {
        let status = if enabled { STATUS_ENABLED } else { STATUS_DISABLED };

        sqlx::query(
            "INSERT INTO system_users (id, nickname, status, created_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET nickname = excluded.nickname, status = excluded.status",
        )
        .bind(user_id)
        .bind(nickname)
        .bind(status)
        .bind(datetime_to_string(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StateError(format!("Failed to save user: {e}")))?;

        debug!(user_id, enabled, "Saved user");
        Ok(())
    }
}

#[async_trait]
impl<DB> IdentityValidator for SqlxUserDirectory<DB>
where
    DB: Database,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    for<'r> (i32,): FromRow<'r, DB::Row>,
    DB: Send + Sync,
    DB::Connection: Send,
    for<'q> i64: sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
{
    #[instrument(name = "db.validate_users", skip(self))]
    async fn validate_users_exist(&self, user_ids: &[UserId]) -> Result<()> {
        let requested: BTreeSet<UserId> = user_ids.iter().copied().collect();
        let mut missing = Vec::new();

        for user_id in requested {
            let status = sqlx::query_scalar::<_, i32>("SELECT status FROM system_users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::StateError(format!("Failed to look up user: {e}")))?;

            if status != Some(STATUS_ENABLED) {
                missing.push(user_id);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::UserNotFound(missing))
        }
    }
}
