//! PostgreSQL-specific implementation

use crate::common::{
    PERMISSION_COLUMNS, PermissionRow, datetime_to_string, map_insert_error, rows_to_grants,
};
use async_trait::async_trait;
use chrono::Utc;
use crm_permission_core::{
    BizId, BizType, DatabaseConfig, Error, GrantId, NewPermission, PermissionGateway,
    PermissionGrant, PermissionLevel, PermissionLevelUpdate, PermissionTransaction, Result,
    UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::{debug, instrument};

pub struct PostgresPermissionGateway {
    pool: Pool<Postgres>,
    lock_timeout: Duration,
}

impl PostgresPermissionGateway {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| Error::StateError(format!("Failed to connect to database: {e}")))?;

        if config.run_migrations {
            sqlx::migrate!("./migrations/postgres")
                .run(&pool)
                .await
                .map_err(|e| Error::StateError(format!("Failed to run migrations: {e}")))?;
        }

        debug!("Connected to PostgreSQL permission store");
        Ok(Self {
            pool,
            lock_timeout: config.lock_timeout(),
        })
    }

    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            lock_timeout: DatabaseConfig::default().lock_timeout(),
        }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl PermissionGateway for PostgresPermissionGateway {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::StateError(format!("Failed to begin transaction: {e}")))?;

        // SET does not take bind parameters
        let statement = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::StateError(format!("Failed to set lock timeout: {e}")))?;

        Ok(PostgresTransaction { tx })
    }
}

/// Single advisory-lock key for one business object
fn advisory_key(biz_type: BizType, biz_id: BizId) -> i64 {
    (i64::from(biz_type.code()) << 56) ^ biz_id
}

pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn fetch_grants(
        &mut self,
        mut query: QueryBuilder<'_, Postgres>,
    ) -> Result<Vec<PermissionGrant>> {
        let rows = query
            .build_query_as::<PermissionRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| Error::StateError(format!("Failed to select permissions: {e}")))?;

        rows_to_grants(rows)
    }

    fn select() -> QueryBuilder<'static, Postgres> {
        QueryBuilder::new(format!("SELECT {PERMISSION_COLUMNS} FROM crm_permission WHERE "))
    }
}

#[async_trait]
impl PermissionTransaction for PostgresTransaction {
    #[instrument(name = "db.lock_object", skip(self))]
    async fn lock_object(&mut self, biz_type: BizType, biz_id: BizId) -> Result<()> {
        // Released automatically at commit or rollback
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_key(biz_type, biz_id))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| Error::StateError(format!("Failed to lock {biz_type} {biz_id}: {e}")))?;

        Ok(())
    }

    #[instrument(name = "db.insert_permission", skip(self))]
    async fn insert(&mut self, permission: &NewPermission) -> Result<GrantId> {
        let now = datetime_to_string(Utc::now());

        sqlx::query_scalar::<_, i64>(
            "INSERT INTO crm_permission (biz_type, biz_id, user_id, level, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5) RETURNING id",
        )
        .bind(permission.biz_type.code())
        .bind(permission.biz_id)
        .bind(permission.user_id)
        .bind(permission.level.code())
        .bind(&now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_insert_error)
    }

    #[instrument(name = "db.update_permission_levels", skip(self, updates))]
    async fn update_levels(&mut self, updates: &[PermissionLevelUpdate]) -> Result<()> {
        let now = datetime_to_string(Utc::now());

        for update in updates {
            sqlx::query("UPDATE crm_permission SET level = $1, updated_at = $2 WHERE id = $3")
                .bind(update.level.code())
                .bind(&now)
                .bind(update.id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| Error::StateError(format!("Failed to update permission: {e}")))?;
        }

        Ok(())
    }

    #[instrument(name = "db.delete_permissions", skip(self))]
    async fn delete_by_ids(&mut self, ids: &[GrantId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM crm_permission WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| Error::StateError(format!("Failed to delete permissions: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn select_by_ids(&mut self, ids: &[GrantId]) -> Result<Vec<PermissionGrant>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = Self::select();
        query.push("id = ANY(").push_bind(ids.to_vec());
        query.push(") ORDER BY id");

        self.fetch_grants(query).await
    }

    async fn select_by_id_and_user(
        &mut self,
        id: GrantId,
        user_id: UserId,
    ) -> Result<Option<PermissionGrant>> {
        let mut query = Self::select();
        query.push("id = ").push_bind(id);
        query.push(" AND user_id = ").push_bind(user_id);

        Ok(self.fetch_grants(query).await?.into_iter().next())
    }

    async fn select_by_biz(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
    ) -> Result<Vec<PermissionGrant>> {
        let mut query = Self::select();
        query.push("biz_type = ").push_bind(biz_type.code());
        query.push(" AND biz_id = ").push_bind(biz_id);
        query.push(" ORDER BY id");

        self.fetch_grants(query).await
    }

    async fn select_by_biz_and_user(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
        user_id: UserId,
    ) -> Result<Option<PermissionGrant>> {
        let mut query = Self::select();
        query.push("biz_type = ").push_bind(biz_type.code());
        query.push(" AND biz_id = ").push_bind(biz_id);
        query.push(" AND user_id = ").push_bind(user_id);

        Ok(self.fetch_grants(query).await?.into_iter().next())
    }

    async fn select_by_biz_and_level(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
        level: PermissionLevel,
    ) -> Result<Vec<PermissionGrant>> {
        let mut query = Self::select();
        query.push("biz_type = ").push_bind(biz_type.code());
        query.push(" AND biz_id = ").push_bind(biz_id);
        query.push(" AND level = ").push_bind(level.code());
        query.push(" ORDER BY id");

        self.fetch_grants(query).await
    }

    async fn select_by_biz_type_and_user(
        &mut self,
        biz_type: BizType,
        user_id: UserId,
    ) -> Result<Vec<PermissionGrant>> {
        let mut query = Self::select();
        query.push("biz_type = ").push_bind(biz_type.code());
        query.push(" AND user_id = ").push_bind(user_id);
        query.push(" ORDER BY biz_id, id");

        self.fetch_grants(query).await
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::StateError(format!("Failed to commit transaction: {e}")))
    }
}
