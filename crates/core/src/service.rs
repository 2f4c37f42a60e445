//! Permission store: grant, update, transfer, revoke and query operations
//!
//! Every operation opens exactly one gateway transaction. Pre-condition
//! queries run inside that transaction, and a mutation is only visible once
//! the transaction commits; any early return drops it and rolls back.

use crate::gateway::{PermissionGateway, PermissionTransaction};
use crate::identity::{IdentityValidator, NoPrivilegedCallers, PrivilegedCallers};
use crate::types::{
    BizId, BizType, GrantId, NewPermission, PermissionGrant, PermissionLevel,
    PermissionLevelUpdate, TransferRequest, UserId,
};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct PermissionStore<G: PermissionGateway> {
    gateway: G,
    identity: Arc<dyn IdentityValidator>,
    privileged: Arc<dyn PrivilegedCallers>,
}

impl<G: PermissionGateway> PermissionStore<G> {
    pub fn new(gateway: G, identity: Arc<dyn IdentityValidator>) -> Self {
        Self {
            gateway,
            identity,
            privileged: Arc::new(NoPrivilegedCallers),
        }
    }

    /// Replace the hook consulted before rejecting a non-owner transfer
    #[must_use]
    pub fn with_privileged_callers(mut self, privileged: Arc<dyn PrivilegedCallers>) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Grant `level` on an object to a user and return the new grant id.
    ///
    /// No duplicate pre-check is made; this path is meant for fresh grants.
    #[instrument(name = "permission.create", skip(self))]
    pub async fn create_permission(
        &self,
        biz_type: BizType,
        biz_id: BizId,
        user_id: UserId,
        level: PermissionLevel,
    ) -> Result<GrantId> {
        let mut tx = self.gateway.begin().await?;
        self.identity.validate_users_exist(&[user_id]).await?;

        let id = tx
            .insert(&NewPermission {
                biz_type,
                biz_id,
                user_id,
                level,
            })
            .await?;
        tx.commit().await?;

        info!(grant_id = id, "Created permission");
        Ok(id)
    }

    /// Apply a batch of level changes; all ids must exist
    #[instrument(name = "permission.update", skip(self, updates), fields(count = updates.len()))]
    pub async fn update_permission(&self, updates: &[PermissionLevelUpdate]) -> Result<()> {
        let ids: Vec<GrantId> = updates.iter().map(|update| update.id).collect();

        let mut tx = self.gateway.begin().await?;
        validate_permissions_exist(&mut tx, &ids).await?;
        tx.update_levels(updates).await?;
        tx.commit().await?;

        debug!("Updated permission levels");
        Ok(())
    }

    /// Hand ownership of an object from its current owner to another user
    #[instrument(
        name = "permission.transfer",
        skip(self, request),
        fields(
            biz_type = %request.biz_type,
            biz_id = request.biz_id,
            from = request.current_user_id,
            to = request.new_owner_user_id,
        )
    )]
    pub async fn transfer_permission(&self, request: &TransferRequest) -> Result<()> {
        let biz_type_name = request.biz_type.display_name();

        let mut tx = self.gateway.begin().await?;
        tx.lock_object(request.biz_type, request.biz_id).await?;

        // 1. Only the current owner may hand the object over
        let caller_permission = tx
            .select_by_biz_and_user(request.biz_type, request.biz_id, request.current_user_id)
            .await?;
        let old_permission = match caller_permission {
            Some(permission) if permission.level.is_owner() => permission,
            _ if self.privileged.caller_is_privileged(request.current_user_id) => {
                current_owner(&mut tx, request.biz_type, request.biz_id)
                    .await?
                    .ok_or(Error::PermissionDenied { biz_type_name })?
            }
            _ => {
                warn!("Transfer rejected: caller is not the owner");
                return Err(Error::PermissionDenied { biz_type_name });
            }
        };

        // 1.1 Handing the object to its own owner is an error, not a no-op
        if request.new_owner_user_id == old_permission.user_id {
            return Err(Error::TransferTargetAlreadyOwner { biz_type_name });
        }

        // 1.2 There is only ever one owner, so the old one must step down
        if request.old_owner_level.is_some_and(PermissionLevel::is_owner) {
            return Err(Error::InvalidFallbackLevel { biz_type_name });
        }

        // 1.3 The new owner has to be a real user
        self.identity
            .validate_users_exist(&[request.new_owner_user_id])
            .await?;

        // 2. Promote the new owner, reusing an existing grant
        let permissions = tx.select_by_biz(request.biz_type, request.biz_id).await?;
        match permissions
            .iter()
            .find(|permission| permission.user_id == request.new_owner_user_id)
        {
            Some(existing) => {
                tx.update_levels(&[PermissionLevelUpdate {
                    id: existing.id,
                    level: PermissionLevel::Owner,
                }])
                .await?;
            }
            None => {
                tx.insert(&NewPermission {
                    biz_type: request.biz_type,
                    biz_id: request.biz_id,
                    user_id: request.new_owner_user_id,
                    level: PermissionLevel::Owner,
                })
                .await?;
            }
        }

        // 3. Demote or remove the old owner
        match request.old_owner_level {
            Some(level) => {
                tx.update_levels(&[PermissionLevelUpdate {
                    id: old_permission.id,
                    level,
                }])
                .await?;
            }
            None => {
                tx.delete_by_ids(&[old_permission.id]).await?;
            }
        }

        tx.commit().await?;

        info!(old_owner_level = ?request.old_owner_level, "Transferred ownership");
        Ok(())
    }

    /// Delete grants by id; all ids must exist
    #[instrument(name = "permission.delete", skip(self, ids), fields(count = ids.len()))]
    pub async fn delete_permission(&self, ids: &[GrantId]) -> Result<()> {
        let mut tx = self.gateway.begin().await?;
        let ids = validate_permissions_exist(&mut tx, ids).await?;
        tx.delete_by_ids(&ids).await?;
        tx.commit().await?;

        info!(deleted = ids.len(), "Deleted permissions");
        Ok(())
    }

    /// Delete every grant of `level` on an object; at least one must match
    #[instrument(name = "permission.delete_by_level", skip(self))]
    pub async fn delete_permission_by_level(
        &self,
        biz_type: BizType,
        biz_id: BizId,
        level: PermissionLevel,
    ) -> Result<()> {
        let mut tx = self.gateway.begin().await?;
        let permissions = tx.select_by_biz_and_level(biz_type, biz_id, level).await?;
        if permissions.is_empty() {
            return Err(Error::PermissionNotFound);
        }

        let ids: Vec<GrantId> = permissions.iter().map(|permission| permission.id).collect();
        tx.delete_by_ids(&ids).await?;
        tx.commit().await?;

        info!(deleted = ids.len(), "Deleted permissions by level");
        Ok(())
    }

    /// Grant `id` if and only if it belongs to `user_id`
    #[instrument(name = "permission.get", skip(self))]
    pub async fn get_permission(
        &self,
        id: GrantId,
        user_id: UserId,
    ) -> Result<Option<PermissionGrant>> {
        let mut tx = self.gateway.begin_read().await?;
        tx.select_by_id_and_user(id, user_id).await
    }

    /// Every grant on an object, regardless of who asks
    #[instrument(name = "permission.list_by_biz", skip(self))]
    pub async fn get_permission_list_by_biz(
        &self,
        biz_type: BizType,
        biz_id: BizId,
    ) -> Result<Vec<PermissionGrant>> {
        let mut tx = self.gateway.begin_read().await?;
        tx.select_by_biz(biz_type, biz_id).await
    }

    #[instrument(name = "permission.list", skip(self, ids), fields(count = ids.len()))]
    pub async fn get_permission_list(&self, ids: &[GrantId]) -> Result<Vec<PermissionGrant>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.gateway.begin_read().await?;
        tx.select_by_ids(ids).await
    }

    /// Every grant a user holds on objects of one business type
    #[instrument(name = "permission.list_by_user", skip(self))]
    pub async fn get_permission_list_by_biz_type_and_user_id(
        &self,
        biz_type: BizType,
        user_id: UserId,
    ) -> Result<Vec<PermissionGrant>> {
        let mut tx = self.gateway.begin_read().await?;
        tx.select_by_biz_type_and_user(biz_type, user_id).await
    }
}

/// Owner grant of an object, used when a privileged caller acts for the owner
async fn current_owner<T: PermissionTransaction>(
    tx: &mut T,
    biz_type: BizType,
    biz_id: BizId,
) -> Result<Option<PermissionGrant>> {
    let owners = tx
        .select_by_biz_and_level(biz_type, biz_id, PermissionLevel::Owner)
        .await?;
    Ok(owners.into_iter().next())
}

/// Check that every requested id exists; returns the distinct ids
async fn validate_permissions_exist<T: PermissionTransaction>(
    tx: &mut T,
    ids: &[GrantId],
) -> Result<Vec<GrantId>> {
    let requested: BTreeSet<GrantId> = ids.iter().copied().collect();
    let requested: Vec<GrantId> = requested.into_iter().collect();
    if requested.is_empty() {
        return Ok(requested);
    }

    let found = tx.select_by_ids(&requested).await?;
    if found.len() != requested.len() {
        warn!(
            requested = requested.len(),
            found = found.len(),
            "Permission ids not found"
        );
        return Err(Error::PermissionNotFound);
    }

    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::mock::{MockIdentityValidator, MockPrivilegedCallers};
    use crate::memory::MemoryPermissionGateway;

    const U1: UserId = 1;
    const U2: UserId = 2;
    const U3: UserId = 3;

    fn accepting_identity() -> Arc<dyn IdentityValidator> {
        let mut identity = MockIdentityValidator::new();
        identity
            .expect_validate_users_exist()
            .returning(|_| Ok(()));
        Arc::new(identity)
    }

    fn store() -> PermissionStore<MemoryPermissionGateway> {
        PermissionStore::new(MemoryPermissionGateway::new(), accepting_identity())
    }

    fn transfer(from: UserId, to: UserId, keep: Option<PermissionLevel>) -> TransferRequest {
        TransferRequest {
            biz_type: BizType::Lead,
            biz_id: 100,
            current_user_id: from,
            new_owner_user_id: to,
            old_owner_level: keep,
        }
    }

    async fn snapshot(
        store: &PermissionStore<MemoryPermissionGateway>,
    ) -> Vec<(UserId, PermissionLevel)> {
        let mut grants: Vec<_> = store
            .get_permission_list_by_biz(BizType::Lead, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|grant| (grant.user_id, grant.level))
            .collect();
        grants.sort_by_key(|(user_id, _)| *user_id);
        grants
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_user_before_writing() {
        let mut identity = MockIdentityValidator::new();
        identity
            .expect_validate_users_exist()
            .times(1)
            .returning(|ids| Err(Error::UserNotFound(ids.to_vec())));
        let store = PermissionStore::new(MemoryPermissionGateway::new(), Arc::new(identity));

        let result = store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await;
        assert!(matches!(result, Err(Error::UserNotFound(ids)) if ids == vec![U1]));
        assert!(store.gateway().is_empty().await);
    }

    #[tokio::test]
    async fn test_transfer_without_fallback_removes_old_owner() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        store.transfer_permission(&transfer(U1, U2, None)).await.unwrap();

        assert_eq!(snapshot(&store).await, vec![(U2, PermissionLevel::Owner)]);
    }

    #[tokio::test]
    async fn test_transfer_with_fallback_keeps_old_owner() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        store
            .transfer_permission(&transfer(U1, U2, Some(PermissionLevel::Read)))
            .await
            .unwrap();

        assert_eq!(
            snapshot(&store).await,
            vec![(U1, PermissionLevel::Read), (U2, PermissionLevel::Owner)]
        );
    }

    #[tokio::test]
    async fn test_transfer_promotes_existing_grant_in_place() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();
        let reader = store
            .create_permission(BizType::Lead, 100, U2, PermissionLevel::Read)
            .await
            .unwrap();

        store
            .transfer_permission(&transfer(U1, U2, Some(PermissionLevel::Read)))
            .await
            .unwrap();

        assert_eq!(
            snapshot(&store).await,
            vec![(U1, PermissionLevel::Read), (U2, PermissionLevel::Owner)]
        );
        let promoted = store.get_permission(reader, U2).await.unwrap().unwrap();
        assert_eq!(promoted.level, PermissionLevel::Owner);
    }

    #[tokio::test]
    async fn test_self_transfer_is_rejected() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        let result = store.transfer_permission(&transfer(U1, U1, None)).await;
        match result {
            Err(Error::TransferTargetAlreadyOwner { biz_type_name }) => {
                assert_eq!(biz_type_name, "Lead");
            }
            other => panic!("Expected TransferTargetAlreadyOwner, got {other:?}"),
        }
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Owner)]);
    }

    #[tokio::test]
    async fn test_old_owner_cannot_keep_owner_level() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();
        store
            .create_permission(BizType::Lead, 100, U2, PermissionLevel::Read)
            .await
            .unwrap();

        let result = store
            .transfer_permission(&transfer(U1, U2, Some(PermissionLevel::Owner)))
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidFallbackLevel { biz_type_name: "Lead" })
        ));
        assert_eq!(
            snapshot(&store).await,
            vec![(U1, PermissionLevel::Owner), (U2, PermissionLevel::Read)]
        );
    }

    /// Records whether the store was locked while users were being checked
    struct LockCheckingDirectory {
        gateway: MemoryPermissionGateway,
        checked_under_lock: std::sync::Mutex<Option<bool>>,
    }

    #[async_trait::async_trait]
    impl IdentityValidator for LockCheckingDirectory {
        async fn validate_users_exist(&self, _user_ids: &[UserId]) -> Result<()> {
            let blocked = tokio::time::timeout(
                std::time::Duration::from_millis(20),
                self.gateway.begin(),
            )
            .await
            .is_err();
            *self.checked_under_lock.lock().unwrap() = Some(blocked);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_checks_users_inside_the_transaction() {
        let gateway = MemoryPermissionGateway::new();
        let directory = Arc::new(LockCheckingDirectory {
            gateway: gateway.clone(),
            checked_under_lock: std::sync::Mutex::new(None),
        });
        let store = PermissionStore::new(gateway, directory.clone());

        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        assert_eq!(*directory.checked_under_lock.lock().unwrap(), Some(true));
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Owner)]);
    }

    #[tokio::test]
    async fn test_non_owner_cannot_transfer() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();
        store
            .create_permission(BizType::Lead, 100, U2, PermissionLevel::Write)
            .await
            .unwrap();
        let before = snapshot(&store).await;

        let result = store.transfer_permission(&transfer(U2, U3, None)).await;
        assert!(matches!(result, Err(Error::PermissionDenied { .. })));

        let result = store.transfer_permission(&transfer(U3, U2, None)).await;
        assert!(matches!(
            result,
            Err(Error::PermissionDenied { biz_type_name: "Lead" })
        ));
        assert_eq!(snapshot(&store).await, before);
    }

    #[tokio::test]
    async fn test_privileged_hook_is_consulted_for_non_owners() {
        let mut privileged = MockPrivilegedCallers::new();
        privileged
            .expect_caller_is_privileged()
            .withf(|user_id| *user_id == U2)
            .times(1)
            .return_const(true);
        let store = store().with_privileged_callers(Arc::new(privileged));
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();
        store
            .create_permission(BizType::Lead, 100, U2, PermissionLevel::Read)
            .await
            .unwrap();

        store
            .transfer_permission(&transfer(U2, U3, None))
            .await
            .unwrap();

        // The privileged caller acts on behalf of the real owner
        assert_eq!(
            snapshot(&store).await,
            vec![(U2, PermissionLevel::Read), (U3, PermissionLevel::Owner)]
        );
    }

    #[tokio::test]
    async fn test_transfer_to_unknown_user_leaves_grants_unchanged() {
        let mut identity = MockIdentityValidator::new();
        identity
            .expect_validate_users_exist()
            .returning(|ids| {
                if ids.contains(&U3) {
                    Err(Error::UserNotFound(vec![U3]))
                } else {
                    Ok(())
                }
            });
        let store = PermissionStore::new(MemoryPermissionGateway::new(), Arc::new(identity));
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        let result = store.transfer_permission(&transfer(U1, U3, None)).await;
        assert!(matches!(result, Err(Error::UserNotFound(_))));
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Owner)]);
    }

    #[tokio::test]
    async fn test_update_with_missing_id_changes_nothing() {
        let store = store();
        let id = store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Read)
            .await
            .unwrap();

        let result = store
            .update_permission(&[
                PermissionLevelUpdate {
                    id,
                    level: PermissionLevel::Write,
                },
                PermissionLevelUpdate {
                    id: id + 1000,
                    level: PermissionLevel::Write,
                },
            ])
            .await;
        assert!(matches!(result, Err(Error::PermissionNotFound)));
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Read)]);

        store
            .update_permission(&[PermissionLevelUpdate {
                id,
                level: PermissionLevel::Write,
            }])
            .await
            .unwrap();
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Write)]);
    }

    #[tokio::test]
    async fn test_delete_by_ids_is_all_or_nothing() {
        let store = store();
        let first = store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();
        let second = store
            .create_permission(BizType::Lead, 100, U2, PermissionLevel::Read)
            .await
            .unwrap();

        let result = store.delete_permission(&[first, second, second + 1]).await;
        assert!(matches!(result, Err(Error::PermissionNotFound)));
        assert_eq!(store.gateway().len().await, 2);

        // Repeated ids count once
        store.delete_permission(&[second, second]).await.unwrap();
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Owner)]);
    }

    #[tokio::test]
    async fn test_delete_by_level_requires_a_match() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();
        store
            .create_permission(BizType::Lead, 100, U2, PermissionLevel::Read)
            .await
            .unwrap();
        store
            .create_permission(BizType::Lead, 100, U3, PermissionLevel::Read)
            .await
            .unwrap();

        let result = store
            .delete_permission_by_level(BizType::Lead, 100, PermissionLevel::Write)
            .await;
        assert!(matches!(result, Err(Error::PermissionNotFound)));

        store
            .delete_permission_by_level(BizType::Lead, 100, PermissionLevel::Read)
            .await
            .unwrap();
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Owner)]);
    }

    #[tokio::test]
    async fn test_scoped_lookup_hides_other_users_grants() {
        let store = store();
        let id = store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        assert!(store.get_permission(id, U2).await.unwrap().is_none());
        assert_eq!(store.get_permission(id, U1).await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_list_queries() {
        let store = store();
        let lead = store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();
        let other_lead = store
            .create_permission(BizType::Lead, 101, U1, PermissionLevel::Read)
            .await
            .unwrap();
        store
            .create_permission(BizType::Customer, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        assert!(store.get_permission_list(&[]).await.unwrap().is_empty());
        assert_eq!(
            store
                .get_permission_list(&[lead, other_lead])
                .await
                .unwrap()
                .len(),
            2
        );

        let scope = store
            .get_permission_list_by_biz_type_and_user_id(BizType::Lead, U1)
            .await
            .unwrap();
        let mut biz_ids: Vec<_> = scope.iter().map(|grant| grant.biz_id).collect();
        biz_ids.sort_unstable();
        assert_eq!(biz_ids, vec![100, 101]);
    }

    #[tokio::test]
    async fn test_empty_batches_are_no_ops() {
        let store = store();
        store
            .create_permission(BizType::Lead, 100, U1, PermissionLevel::Owner)
            .await
            .unwrap();

        store.update_permission(&[]).await.unwrap();
        store.delete_permission(&[]).await.unwrap();
        assert_eq!(snapshot(&store).await, vec![(U1, PermissionLevel::Owner)]);
    }
}
