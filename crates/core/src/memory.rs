//! In-process permission gateway
//!
//! One mutex guards the whole store. A transaction holds the lock for its
//! lifetime and works on a private copy of the state; `commit` swaps the copy
//! in, dropping the transaction discards it.

use crate::gateway::{PermissionGateway, PermissionTransaction};
use crate::types::{
    BizId, BizType, GrantId, NewPermission, PermissionGrant, PermissionLevel,
    PermissionLevelUpdate, UserId,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: GrantId,
    grants: BTreeMap<GrantId, PermissionGrant>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPermissionGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPermissionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grants
    pub async fn len(&self) -> usize {
        self.state.lock().await.grants.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PermissionGateway for MemoryPermissionGateway {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTransaction { guard, working })
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryTransaction {
    fn filter(&self, predicate: impl Fn(&PermissionGrant) -> bool) -> Vec<PermissionGrant> {
        self.working
            .grants
            .values()
            .filter(|grant| predicate(grant))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PermissionTransaction for MemoryTransaction {
    async fn lock_object(&mut self, _biz_type: BizType, _biz_id: BizId) -> Result<()> {
        // The store-wide guard is already held
        Ok(())
    }

    async fn insert(&mut self, permission: &NewPermission) -> Result<GrantId> {
        let duplicate = self.working.grants.values().any(|grant| {
            grant.biz_type == permission.biz_type
                && grant.biz_id == permission.biz_id
                && grant.user_id == permission.user_id
        });
        if duplicate {
            return Err(Error::PermissionAlreadyExists);
        }

        self.working.next_id += 1;
        let id = self.working.next_id;
        let now = Utc::now();
        self.working.grants.insert(
            id,
            PermissionGrant {
                id,
                biz_type: permission.biz_type,
                biz_id: permission.biz_id,
                user_id: permission.user_id,
                level: permission.level,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update_levels(&mut self, updates: &[PermissionLevelUpdate]) -> Result<()> {
        let now = Utc::now();
        for update in updates {
            if let Some(grant) = self.working.grants.get_mut(&update.id) {
                grant.level = update.level;
                grant.updated_at = now;
            }
        }
        Ok(())
    }

    async fn delete_by_ids(&mut self, ids: &[GrantId]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            if self.working.grants.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn select_by_ids(&mut self, ids: &[GrantId]) -> Result<Vec<PermissionGrant>> {
        Ok(self.filter(|grant| ids.contains(&grant.id)))
    }

    async fn select_by_id_and_user(
        &mut self,
        id: GrantId,
        user_id: UserId,
    ) -> Result<Option<PermissionGrant>> {
        Ok(self
            .working
            .grants
            .get(&id)
            .filter(|grant| grant.user_id == user_id)
            .cloned())
    }

    async fn select_by_biz(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
    ) -> Result<Vec<PermissionGrant>> {
        Ok(self.filter(|grant| grant.biz_type == biz_type && grant.biz_id == biz_id))
    }

    async fn select_by_biz_and_user(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
        user_id: UserId,
    ) -> Result<Option<PermissionGrant>> {
        Ok(self
            .filter(|grant| {
                grant.biz_type == biz_type && grant.biz_id == biz_id && grant.user_id == user_id
            })
            .into_iter()
            .next())
    }

    async fn select_by_biz_and_level(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
        level: PermissionLevel,
    ) -> Result<Vec<PermissionGrant>> {
        Ok(self.filter(|grant| {
            grant.biz_type == biz_type && grant.biz_id == biz_id && grant.level == level
        }))
    }

    async fn select_by_biz_type_and_user(
        &mut self,
        biz_type: BizType,
        user_id: UserId,
    ) -> Result<Vec<PermissionGrant>> {
        Ok(self.filter(|grant| grant.biz_type == biz_type && grant.user_id == user_id))
    }

    async fn commit(mut self) -> Result<()> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
