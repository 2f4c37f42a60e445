//! Settings for the permission store and its tooling
//!
//! Sources are layered with the `config` crate: built-in defaults, then an
//! optional file, then `CRM_PERMISSION__*` environment variables
//! (e.g. `CRM_PERMISSION__DATABASE__URL`).

use crate::validation::{ValidateConfig, validators};
use crate::{Error, Result};
use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CRM_PERMISSION";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:` or `postgres:` connection URL
    pub url: String,

    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Seconds a transaction waits on a lock held by another writer
    pub lock_timeout_secs: u64,

    /// Apply embedded migrations on connect
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://crm-permission.db".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 30,
            lock_timeout_secs: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed, or if the
    /// resulting settings fail validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();

        let mut builder = config::Config::builder()
            .set_default("database.url", defaults.database.url)?
            .set_default(
                "database.max_connections",
                u64::from(defaults.database.max_connections),
            )?
            .set_default(
                "database.acquire_timeout_secs",
                defaults.database.acquire_timeout_secs,
            )?
            .set_default("database.lock_timeout_secs", defaults.database.lock_timeout_secs)?
            .set_default("database.run_migrations", defaults.database.run_migrations)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.json", defaults.logging.json)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(settings)
    }
}

impl ValidateConfig for Settings {
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        validators::validate_database_url(&self.database.url, "database.url")?;
        validators::validate_range(self.database.max_connections, 1, 1024, "database.max_connections")?;
        validators::validate_range(
            self.database.acquire_timeout_secs,
            1,
            3600,
            "database.acquire_timeout_secs",
        )?;
        validators::validate_range(
            self.database.lock_timeout_secs,
            1,
            3600,
            "database.lock_timeout_secs",
        )?;
        validators::validate_not_empty(&self.logging.level, "logging.level")?;
        Ok(())
    }
}
