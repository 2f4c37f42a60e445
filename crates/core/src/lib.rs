//! CRM data-permission core: grant types, the permission store and its seams

pub mod config;
pub mod errors;
pub mod gateway;
pub mod identity;
pub mod memory;
pub mod service;
pub mod types;
pub mod validation;

#[cfg(any(test, feature = "tests"))]
pub mod tests;

pub use config::{DatabaseConfig, LoggingConfig, Settings};
pub use errors::{Error, Result};
pub use gateway::{PermissionGateway, PermissionTransaction};
pub use identity::{IdentityValidator, InMemoryUserDirectory, NoPrivilegedCallers, PrivilegedCallers};
pub use memory::MemoryPermissionGateway;
pub use service::PermissionStore;
pub use types::{
    BizId, BizType, GrantId, NewPermission, PermissionGrant, PermissionLevel,
    PermissionLevelUpdate, TransferRequest, UserId,
};
