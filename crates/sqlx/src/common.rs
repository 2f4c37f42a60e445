//! Common types and utilities shared between database implementations

use chrono::{DateTime, Utc};
use crm_permission_core::{BizType, Error, PermissionGrant, PermissionLevel, Result};
use sqlx::FromRow;

pub const PERMISSION_COLUMNS: &str = "id, biz_type, biz_id, user_id, level, created_at, updated_at";

// Helper functions for timestamp conversion
pub fn datetime_to_string(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn string_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::StateError(format!("Invalid timestamp format: {e}")))
}

#[derive(FromRow)]
pub struct PermissionRow {
    pub id: i64,
    pub biz_type: i32,
    pub biz_id: i64,
    pub user_id: i64,
    pub level: i32,
    pub created_at: String, // ISO8601 format
    pub updated_at: String, // ISO8601 format
}

impl TryFrom<PermissionRow> for PermissionGrant {
    type Error = Error;

    fn try_from(row: PermissionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            biz_type: BizType::from_code(row.biz_type)?,
            biz_id: row.biz_id,
            user_id: row.user_id,
            level: PermissionLevel::from_code(row.level)?,
            created_at: string_to_datetime(&row.created_at)?,
            updated_at: string_to_datetime(&row.updated_at)?,
        })
    }
}

pub fn rows_to_grants(rows: Vec<PermissionRow>) -> Result<Vec<PermissionGrant>> {
    rows.into_iter().map(PermissionGrant::try_from).collect()
}

/// Map a failed insert, singling out the (biz_type, biz_id, user_id) index
pub fn map_insert_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(database_error) = &err
        && database_error.is_unique_violation()
    {
        return Error::PermissionAlreadyExists;
    }

    Error::StateError(format!("Failed to insert permission: {err}"))
}
