//! CLI configuration utilities

use anyhow::Result;
use crm_permission_core::Settings;
use std::path::Path;

/// Save settings to a JSON file
pub fn save_settings<P: AsRef<Path>>(settings: &Settings, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default settings file
pub fn generate_default_settings<P: AsRef<Path>>(path: P) -> Result<()> {
    save_settings(&Settings::default(), path)
}
