//! SQLx-backed permission gateways and user directory for PostgreSQL and SQLite

mod common;
mod directory;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use directory::SqlxUserDirectory;

#[cfg(feature = "postgres")]
pub use directory::PostgresUserDirectory;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresPermissionGateway, PostgresTransaction};

#[cfg(feature = "sqlite")]
pub use directory::SqliteUserDirectory;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqlitePermissionGateway, SqliteTransaction};
