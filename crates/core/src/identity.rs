//! Collaborators that answer questions about users

use crate::types::UserId;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// External user directory
#[async_trait]
pub trait IdentityValidator: Send + Sync {
    /// Fails with [`Error::UserNotFound`] naming every id that does not
    /// resolve to an existing, enabled user
    async fn validate_users_exist(&self, user_ids: &[UserId]) -> Result<()>;
}

/// Decides whether a caller may transfer objects it does not own
pub trait PrivilegedCallers: Send + Sync {
    fn caller_is_privileged(&self, user_id: UserId) -> bool;
}

/// Nobody bypasses the owner check. Administrator override is not enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrivilegedCallers;

impl PrivilegedCallers for NoPrivilegedCallers {
    fn caller_is_privileged(&self, _user_id: UserId) -> bool {
        false
    }
}

/// Directory kept in process memory, keyed by user id with an enabled flag
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, bool>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(user_ids: impl IntoIterator<Item = UserId>) -> Self {
        let directory = Self::new();
        for user_id in user_ids {
            directory.add_user(user_id);
        }
        directory
    }

    pub fn add_user(&self, user_id: UserId) {
        self.set_enabled(user_id, true);
    }

    pub fn set_enabled(&self, user_id: UserId, enabled: bool) {
        let mut users = match self.users.write() {
            Ok(users) => users,
            Err(poisoned) => poisoned.into_inner(),
        };
        users.insert(user_id, enabled);
    }
}

#[async_trait]
impl IdentityValidator for InMemoryUserDirectory {
    async fn validate_users_exist(&self, user_ids: &[UserId]) -> Result<()> {
        let users = match self.users.read() {
            Ok(users) => users,
            Err(poisoned) => poisoned.into_inner(),
        };
        let missing: BTreeSet<UserId> = user_ids
            .iter()
            .copied()
            .filter(|user_id| !users.get(user_id).copied().unwrap_or(false))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::UserNotFound(missing.into_iter().collect()))
        }
    }
}
