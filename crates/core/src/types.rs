use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::{Error, Result};

pub type GrantId = i64;
pub type BizId = i64;
pub type UserId = i64;

/// Category of the business object a grant refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BizType {
    Lead,
    Customer,
    Contact,
    Opportunity,
    Contract,
    Product,
    Receivable,
    ReceivablePlan,
}

impl BizType {
    pub const ALL: [Self; 8] = [
        Self::Lead,
        Self::Customer,
        Self::Contact,
        Self::Opportunity,
        Self::Contract,
        Self::Product,
        Self::Receivable,
        Self::ReceivablePlan,
    ];

    /// Stored integer code
    pub const fn code(self) -> i32 {
        match self {
            Self::Lead => 1,
            Self::Customer => 2,
            Self::Contact => 3,
            Self::Opportunity => 4,
            Self::Contract => 5,
            Self::Product => 6,
            Self::Receivable => 7,
            Self::ReceivablePlan => 8,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|biz_type| biz_type.code() == code)
            .ok_or(Error::InvalidCode {
                kind: "biz type",
                code,
            })
    }

    /// Human readable name used in user-facing error messages
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Lead => "Lead",
            Self::Customer => "Customer",
            Self::Contact => "Contact",
            Self::Opportunity => "Opportunity",
            Self::Contract => "Contract",
            Self::Product => "Product",
            Self::Receivable => "Receivable",
            Self::ReceivablePlan => "Receivable plan",
        }
    }
}

impl Display for BizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Access level carried by a grant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionLevel {
    Owner,
    Read,
    Write,
}

impl PermissionLevel {
    pub const ALL: [Self; 3] = [Self::Owner, Self::Read, Self::Write];

    pub const fn code(self) -> i32 {
        match self {
            Self::Owner => 1,
            Self::Read => 2,
            Self::Write => 3,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.code() == code)
            .ok_or(Error::InvalidCode {
                kind: "permission level",
                code,
            })
    }

    /// Only owners may hand an object over to someone else
    pub const fn is_owner(self) -> bool {
        matches!(self, Self::Owner)
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::Read => "Read",
            Self::Write => "Read/Write",
        }
    }
}

impl Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionGrant {
    pub id: GrantId,
    pub biz_type: BizType,
    pub biz_id: BizId,
    pub user_id: UserId,
    pub level: PermissionLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Grant to be inserted; the id is assigned by the gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPermission {
    pub biz_type: BizType,
    pub biz_id: BizId,
    pub user_id: UserId,
    pub level: PermissionLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionLevelUpdate {
    pub id: GrantId,
    pub level: PermissionLevel,
}

/// Input of an ownership transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRequest {
    pub biz_type: BizType,
    pub biz_id: BizId,
    /// User initiating the transfer; must currently own the object
    pub current_user_id: UserId,
    pub new_owner_user_id: UserId,
    /// Level the old owner keeps; `None` removes the old owner's grant
    #[serde(default)]
    pub old_owner_level: Option<PermissionLevel>,
}
