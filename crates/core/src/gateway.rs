//! Persistence seam for permission grants
//!
//! A [`PermissionGateway`] hands out [`PermissionTransaction`]s. Every read and
//! write of a store operation goes through one transaction, so the existence
//! checks and the writes they guard see the same snapshot. Dropping a
//! transaction without calling [`PermissionTransaction::commit`] rolls it back.

use crate::types::{
    BizId, BizType, GrantId, NewPermission, PermissionGrant, PermissionLevel,
    PermissionLevelUpdate, UserId,
};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PermissionGateway: Send + Sync {
    type Transaction: PermissionTransaction;

    /// Open a new transaction against the backing store
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Open a transaction that will only be read from
    async fn begin_read(&self) -> Result<Self::Transaction> {
        self.begin().await
    }
}

#[async_trait]
pub trait PermissionTransaction: Send {
    /// Serialize writers of one business object until this transaction ends
    async fn lock_object(&mut self, biz_type: BizType, biz_id: BizId) -> Result<()>;

    async fn insert(&mut self, permission: &NewPermission) -> Result<GrantId>;
    async fn update_levels(&mut self, updates: &[PermissionLevelUpdate]) -> Result<()>;
    /// Returns the number of deleted grants
    async fn delete_by_ids(&mut self, ids: &[GrantId]) -> Result<u64>;

    async fn select_by_ids(&mut self, ids: &[GrantId]) -> Result<Vec<PermissionGrant>>;
    async fn select_by_id_and_user(
        &mut self,
        id: GrantId,
        user_id: UserId,
    ) -> Result<Option<PermissionGrant>>;
    async fn select_by_biz(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
    ) -> Result<Vec<PermissionGrant>>;
    async fn select_by_biz_and_user(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
        user_id: UserId,
    ) -> Result<Option<PermissionGrant>>;
    async fn select_by_biz_and_level(
        &mut self,
        biz_type: BizType,
        biz_id: BizId,
        level: PermissionLevel,
    ) -> Result<Vec<PermissionGrant>>;
    async fn select_by_biz_type_and_user(
        &mut self,
        biz_type: BizType,
        user_id: UserId,
    ) -> Result<Vec<PermissionGrant>>;

    async fn commit(self) -> Result<()>;
}
