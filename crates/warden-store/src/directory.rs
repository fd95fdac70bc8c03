//! Read access to the platform's own users and groups.
//!
//! The sync engine only enumerates and reads; writes to the local
//! directory belong to other subsystems, which announce them through
//! the change-event bus.

use async_trait::async_trait;
use uuid::Uuid;

use warden_core::{Group, User};

use crate::error::StoreResult;

/// Source of local users and groups.
///
/// Pagination is offset-based with a stable order by id so a full sync
/// observes a consistent enumeration.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn count_users(&self) -> StoreResult<i64>;

    async fn count_groups(&self) -> StoreResult<i64>;

    /// A page of users ordered by id.
    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>>;

    /// A page of groups ordered by id.
    async fn list_groups(&self, limit: i64, offset: i64) -> StoreResult<Vec<Group>>;

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn get_group(&self, id: Uuid) -> StoreResult<Option<Group>>;

    /// Find a user by unique username.
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Find a group by unique name.
    async fn find_group_by_name(&self, name: &str) -> StoreResult<Option<Group>>;

    /// Local user ids that are members of a group, ordered by id.
    async fn group_members(&self, group_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Whether a user is a member of a group.
    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        Ok(self.group_members(group_id).await?.contains(&user_id))
    }
}
