//! Configuration validation support

use config::ConfigError;

/// Trait for validating configuration values
pub trait ValidateConfig {
    /// Validate the configuration
    ///
    /// Returns Ok(()) if valid, or an error describing what's wrong
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Common validation helpers
pub mod validators {
    use config::ConfigError;

    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::Message(format!("{field}: cannot be empty")));
        }
        Ok(())
    }

    /// Validate that a value is within range
    pub fn validate_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<(), ConfigError> {
        if value < min || value > max {
            return Err(ConfigError::Message(format!(
                "{field}: must be between {min} and {max}"
            )));
        }
        Ok(())
    }

    /// Validate that a database URL names a supported scheme
    pub fn validate_database_url(url: &str, field: &str) -> Result<(), ConfigError> {
        validate_not_empty(url, field)?;
        let supported = ["sqlite:", "postgres:", "postgresql:"];
        if !supported.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(ConfigError::Message(format!(
                "{field}: unsupported database URL '{url}'"
            )));
        }
        Ok(())
    }
}
