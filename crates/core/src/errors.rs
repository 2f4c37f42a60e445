use thiserror::Error;

use crate::types::UserId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("User not found: {0:?}")]
    UserNotFound(Vec<UserId>),

    #[error("Permission not found")]
    PermissionNotFound,

    #[error("{biz_type_name} operation failed: permission denied")]
    PermissionDenied { biz_type_name: &'static str },

    #[error("{biz_type_name} transfer failed: target user is already the owner")]
    TransferTargetAlreadyOwner { biz_type_name: &'static str },

    #[error("{biz_type_name} transfer failed: the previous owner cannot keep the owner level")]
    InvalidFallbackLevel { biz_type_name: &'static str },

    #[error("Permission already exists for this user and object")]
    PermissionAlreadyExists,

    #[error("Unknown {kind} code: {code}")]
    InvalidCode { kind: &'static str, code: i32 },

    #[error("Storage error: {0}")]
    StateError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
