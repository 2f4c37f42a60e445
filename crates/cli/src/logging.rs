use anyhow::Result;
use crm_permission_core::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for the CLI
///
/// `RUST_LOG` wins over both the command line level and the configured one.
/// Output goes to stderr so that stdout only carries command results.
pub fn init_logging(config: &LoggingConfig, level_override: Option<Level>) -> Result<()> {
    let level = level_override.map_or_else(
        || config.level.clone(),
        |level| level.as_str().to_lowercase(),
    );
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("crm_perm={level},crm_permission_core={level},crm_permission_sqlx={level}").into()
    });

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let log_file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_writer(Arc::new(log_file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!config.json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(json_layer)
        .with(text_layer)
        .init();

    Ok(())
}
