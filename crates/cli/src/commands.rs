//! CLI commands

use anyhow::{Result, bail};
use clap::Subcommand;
use crm_permission_core::{
    BizId, BizType, GrantId, PermissionLevel, PermissionLevelUpdate, PermissionStore, Settings,
    TransferRequest, UserId,
};
use crm_permission_sqlx::{SqlitePermissionGateway, SqliteUserDirectory};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Grant a user access to a business object
    Grant {
        #[arg(long, value_parser = parse_biz_type)]
        biz_type: BizType,
        #[arg(long)]
        biz_id: BizId,
        #[arg(long)]
        user_id: UserId,
        #[arg(long, value_parser = parse_level, default_value = "read")]
        level: PermissionLevel,
    },

    /// Change the level of existing grants
    Update {
        /// `GRANT_ID=LEVEL` pairs, e.g. `12=write`
        #[arg(required = true, value_parser = parse_level_update)]
        updates: Vec<PermissionLevelUpdate>,
    },

    /// Hand ownership of a business object to another user
    Transfer {
        #[arg(long, value_parser = parse_biz_type)]
        biz_type: BizType,
        #[arg(long)]
        biz_id: BizId,
        /// Acting user, normally the current owner
        #[arg(long = "from")]
        current_user_id: UserId,
        #[arg(long = "to")]
        new_owner_user_id: UserId,
        /// Level the previous owner keeps (read or write); removed entirely when omitted
        #[arg(long, value_parser = parse_level)]
        keep_as: Option<PermissionLevel>,
    },

    /// Delete grants by id
    Revoke {
        #[arg(required = true)]
        ids: Vec<GrantId>,
    },

    /// Delete every grant of one level on a business object
    RevokeLevel {
        #[arg(long, value_parser = parse_biz_type)]
        biz_type: BizType,
        #[arg(long)]
        biz_id: BizId,
        #[arg(long, value_parser = parse_level)]
        level: PermissionLevel,
    },

    /// Show a grant if it belongs to the given user
    Show {
        id: GrantId,
        #[arg(long)]
        user_id: UserId,
    },

    /// List every grant on a business object
    ListBiz {
        #[arg(long, value_parser = parse_biz_type)]
        biz_type: BizType,
        #[arg(long)]
        biz_id: BizId,
    },

    /// List grants by id
    List { ids: Vec<GrantId> },

    /// List a user's grants on one business type
    ListUser {
        #[arg(long, value_parser = parse_biz_type)]
        biz_type: BizType,
        #[arg(long)]
        user_id: UserId,
    },

    /// Manage the local user directory
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Inspect or generate settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Add a user, or update an existing one
    Add {
        user_id: UserId,
        #[arg(long)]
        nickname: Option<String>,
        /// Store the user as disabled
        #[arg(long)]
        disabled: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show,

    /// Generate a default settings file
    Generate {
        /// Output file path
        #[arg(default_value = "crm-permission.json")]
        output: PathBuf,
    },
}

type Store = PermissionStore<SqlitePermissionGateway>;

impl Commands {
    pub async fn execute(self, settings: Settings) -> Result<()> {
        let command = match self {
            Self::Config { command } => return command.execute(&settings),
            command => command,
        };
        let (store, directory) = open_store(&settings).await?;

        match command {
            Self::Grant {
                biz_type,
                biz_id,
                user_id,
                level,
            } => {
                let id = store
                    .create_permission(biz_type, biz_id, user_id, level)
                    .await?;
                info!(id, "Granted permission");
                print_json(&serde_json::json!({ "id": id }))
            }
            Self::Update { updates } => {
                store.update_permission(&updates).await?;
                println!("Updated {} grant(s)", updates.len());
                Ok(())
            }
            Self::Transfer {
                biz_type,
                biz_id,
                current_user_id,
                new_owner_user_id,
                keep_as,
            } => {
                store
                    .transfer_permission(&TransferRequest {
                        biz_type,
                        biz_id,
                        current_user_id,
                        new_owner_user_id,
                        old_owner_level: keep_as,
                    })
                    .await?;
                print_json(&store.get_permission_list_by_biz(biz_type, biz_id).await?)
            }
            Self::Revoke { ids } => {
                store.delete_permission(&ids).await?;
                println!("Revoked {} grant(s)", ids.len());
                Ok(())
            }
            Self::RevokeLevel {
                biz_type,
                biz_id,
                level,
            } => {
                store
                    .delete_permission_by_level(biz_type, biz_id, level)
                    .await?;
                println!("Revoked {level} grants on {biz_type} {biz_id}");
                Ok(())
            }
            Self::Show { id, user_id } => match store.get_permission(id, user_id).await? {
                Some(grant) => print_json(&grant),
                None => bail!("No grant {id} for user {user_id}"),
            },
            Self::ListBiz { biz_type, biz_id } => {
                print_json(&store.get_permission_list_by_biz(biz_type, biz_id).await?)
            }
            Self::List { ids } => print_json(&store.get_permission_list(&ids).await?),
            Self::ListUser { biz_type, user_id } => print_json(
                &store
                    .get_permission_list_by_biz_type_and_user_id(biz_type, user_id)
                    .await?,
            ),
            Self::User { command } => command.execute(&directory).await,
            Self::Config { command } => command.execute(&settings),
        }
    }
}

impl UserCommands {
    pub async fn execute(self, directory: &SqliteUserDirectory) -> Result<()> {
        match self {
            Self::Add {
                user_id,
                nickname,
                disabled,
            } => {
                directory.add_user(user_id, nickname, !disabled).await?;
                println!(
                    "Saved user {user_id} ({})",
                    if disabled { "disabled" } else { "enabled" }
                );
                Ok(())
            }
        }
    }
}

impl ConfigCommands {
    pub fn execute(self, settings: &Settings) -> Result<()> {
        match self {
            Self::Show => print_json(settings),
            Self::Generate { output } => {
                // Create parent directory if it doesn't exist
                if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }

                config::generate_default_settings(&output)?;
                println!("Generated settings at: {}", output.display());
                Ok(())
            }
        }
    }
}

async fn open_store(settings: &Settings) -> Result<(Store, Arc<SqliteUserDirectory>)> {
    if !settings.database.url.starts_with("sqlite:") {
        bail!(
            "crm-perm works on SQLite databases, got {}",
            settings.database.url
        );
    }

    let gateway = SqlitePermissionGateway::connect(&settings.database).await?;
    let directory = Arc::new(SqliteUserDirectory::from_pool(gateway.pool().clone()));
    let store = PermissionStore::new(gateway, directory.clone());
    Ok((store, directory))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Accepts a stored code (`2`) or a name (`customer`, `receivable-plan`)
fn parse_biz_type(value: &str) -> Result<BizType, String> {
    if let Ok(code) = value.parse::<i32>() {
        return BizType::from_code(code).map_err(|e| e.to_string());
    }

    let wanted = normalize(value);
    BizType::ALL
        .into_iter()
        .find(|biz_type| normalize(biz_type.display_name()) == wanted)
        .ok_or_else(|| format!("unknown business type '{value}'"))
}

/// Accepts a stored code (`3`) or `owner`, `read`, `write`
fn parse_level(value: &str) -> Result<PermissionLevel, String> {
    if let Ok(code) = value.parse::<i32>() {
        return PermissionLevel::from_code(code).map_err(|e| e.to_string());
    }

    match normalize(value).as_str() {
        "owner" => Ok(PermissionLevel::Owner),
        "read" => Ok(PermissionLevel::Read),
        "write" | "readwrite" => Ok(PermissionLevel::Write),
        _ => Err(format!("unknown permission level '{value}'")),
    }
}

fn parse_level_update(value: &str) -> Result<PermissionLevelUpdate, String> {
    let (id, level) = value
        .split_once('=')
        .ok_or_else(|| format!("expected GRANT_ID=LEVEL, got '{value}'"))?;
    let id = id
        .trim()
        .parse::<GrantId>()
        .map_err(|e| format!("invalid grant id '{id}': {e}"))?;

    Ok(PermissionLevelUpdate {
        id,
        level: parse_level(level.trim())?,
    })
}
