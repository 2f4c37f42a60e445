//! SQLite-specific implementation

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
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, instrument};

pub struct SqlitePermissionGateway {
    pool: Pool<Sqlite>,
}

impl SqlitePermissionGateway {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| Error::StateError(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .busy_timeout(config.lock_timeout());

        // Every connection to `:memory:` would otherwise see its own database
        let in_memory = config.url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { config.max_connections })
            .acquire_timeout(config.acquire_timeout());
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| Error::StateError(format!("Failed to connect to database: {e}")))?;

        if config.run_migrations {
            sqlx::migrate!("./migrations/sqlite")
                .run(&pool)
                .await
                .map_err(|e| Error::StateError(format!("Failed to run migrations: {e}")))?;
        }

        debug!(url = %config.url, "Connected to SQLite permission store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl PermissionGateway for SqlitePermissionGateway {
    type Transaction = SqliteTransaction;

    /// Writers take the reserved lock up front so that a read-then-write
    /// sequence never has to upgrade its lock mid-transaction
    async fn begin(&self) -> Result<SqliteTransaction> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| Error::StateError(format!("Failed to begin transaction: {e}")))?;
        Ok(SqliteTransaction { tx })
    }

    async fn begin_read(&self) -> Result<SqliteTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::StateError(format!("Failed to begin transaction: {e}")))?;
        Ok(SqliteTransaction { tx })
    }
}

pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTransaction {
    async fn fetch_grants(
        &mut self,
        mut query: QueryBuilder<'_, Sqlite>,
    ) -> Result<Vec<PermissionGrant>> {
        let rows = query
            .build_query_as::<PermissionRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| Error::StateError(format!("Failed to select permissions: {e}")))?;

        rows_to_grants(rows)
    }

    fn select() -> QueryBuilder<'static, Sqlite> {
        QueryBuilder::new(format!("SELECT {PERMISSION_COLUMNS} FROM crm_permission WHERE "))
    }
}

#[async_trait]
impl PermissionTransaction for SqliteTransaction {
    async fn lock_object(&mut self, _biz_type: BizType, _biz_id: BizId) -> Result<()> {
        // BEGIN IMMEDIATE already holds the database-wide reserved lock
        Ok(())
    }

    #[instrument(name = "db.insert_permission", skip(self))]
    async fn insert(&mut self, permission: &NewPermission) -> Result<GrantId> {
        let now = datetime_to_string(Utc::now());

        sqlx::query_scalar::<_, i64>(
            "INSERT INTO crm_permission (biz_type, biz_id, user_id, level, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
        )
        .bind(permission.biz_type.code())
        .bind(permission.biz_id)
        .bind(permission.user_id)
        .bind(permission.level.code())
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_insert_error)
    }

    #[instrument(name = "db.update_permission_levels", skip(self, updates))]
    async fn update_levels(&mut self, updates: &[PermissionLevelUpdate]) -> Result<()> {
        let now = datetime_to_string(Utc::now());

        for update in updates {
            sqlx::query("UPDATE crm_permission SET level = ?1, updated_at = ?2 WHERE id = ?3")
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

        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM crm_permission WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = query
            .build()
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
        query.push("id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

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

#[cfg(test)]
mod tests {
    use super::*;
    use crm_permission_core::tests::gateway::GatewayTestSuite;
    use crm_permission_core::{InMemoryUserDirectory, PermissionStore, TransferRequest};
    use std::sync::Arc;

    async fn setup_sqlite_gateway() -> SqlitePermissionGateway {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        SqlitePermissionGateway::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_compliance() {
        let gateway = setup_sqlite_gateway().await;
        let suite = GatewayTestSuite::new(gateway);
        suite.run_all_tests().await.expect("All tests should pass");
    }

    #[tokio::test]
    async fn test_stored_codes_round_trip() {
        let gateway = setup_sqlite_gateway().await;
        let mut tx = gateway.begin().await.unwrap();
        let id = tx
            .insert(&NewPermission {
                biz_type: BizType::ReceivablePlan,
                biz_id: 9,
                user_id: 3,
                level: PermissionLevel::Write,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let (biz_type, level): (i32, i32) =
            sqlx::query_as("SELECT biz_type, level FROM crm_permission WHERE id = ?1")
                .bind(id)
                .fetch_one(gateway.pool())
                .await
                .unwrap();
        assert_eq!(biz_type, 8);
        assert_eq!(level, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("crm.db").display()),
            ..DatabaseConfig::default()
        };
        let gateway = SqlitePermissionGateway::connect(&config).await.unwrap();
        let directory = InMemoryUserDirectory::with_users([1, 2, 3]);
        let store = Arc::new(PermissionStore::new(gateway, Arc::new(directory)));
        store
            .create_permission(BizType::Opportunity, 5, 1, PermissionLevel::Owner)
            .await
            .unwrap();

        let handles: Vec<_> = [2, 3]
            .into_iter()
            .map(|target| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .transfer_permission(&TransferRequest {
                            biz_type: BizType::Opportunity,
                            biz_id: 5,
                            current_user_id: 1,
                            new_owner_user_id: target,
                            old_owner_level: Some(PermissionLevel::Read),
                        })
                        .await
                })
            })
            .collect();

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|result| matches!(result, Err(Error::PermissionDenied { .. })))
        );

        let grants = store
            .get_permission_list_by_biz(BizType::Opportunity, 5)
            .await
            .unwrap();
        assert_eq!(grants.len(), 2);
        assert_eq!(grants.iter().filter(|grant| grant.level.is_owner()).count(), 1);
    }
}
