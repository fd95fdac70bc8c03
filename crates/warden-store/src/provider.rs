//! Provider configuration: one per configured external directory.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{Group, User};
use warden_mapping::PropertyMapping;

use crate::directory::Directory;
use crate::error::StoreResult;

/// What to do on the remote system when a local object is deleted.
///
/// Applies only to entity deletion events; deleting the provider itself
/// never touches remote objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteAction {
    /// Leave the remote object untouched.
    DoNothing,
    /// Delete the remote object.
    Delete,
    /// Deactivate the remote object but keep it.  Only meaningful for
    /// users; for groups this degrades to [`DeleteAction::DoNothing`].
    Suspend,
}

impl std::fmt::Display for DeleteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteAction::DoNothing => write!(f, "do_nothing"),
            DeleteAction::Delete => write!(f, "delete"),
            DeleteAction::Suspend => write!(f, "suspend"),
        }
    }
}

/// Settings for one external directory connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,

    /// Base URL of the remote endpoint, e.g. `https://host/scim/v2`.
    pub base_url: String,
    /// Bearer token used against the endpoint.
    pub token: String,
    pub request_timeout_secs: u64,
    pub tls_verify: bool,
    /// Maximum in-run retries for transient remote failures.
    pub max_retries: u32,

    /// Compute payloads but never write to the remote system.
    pub dry_run: bool,

    /// When set, only users that are members of this group (and only
    /// this group itself) are in scope for sync.
    pub filter_group: Option<Uuid>,
    pub exclude_service_accounts: bool,

    pub user_delete_action: DeleteAction,
    pub group_delete_action: DeleteAction,

    /// Ordered property mappings applied to users.
    pub user_mappings: Vec<PropertyMapping>,
    /// Ordered property mappings applied to groups.
    pub group_mappings: Vec<PropertyMapping>,

    /// Page size for full-sync enumeration.
    pub page_size: i64,
    /// Finished sync task records older than this are purged.
    pub task_retention_days: i64,
}

impl Provider {
    /// A provider with sensible defaults for the given endpoint.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_url: base_url.into(),
            token: token.into(),
            request_timeout_secs: 30,
            tls_verify: true,
            max_retries: 3,
            dry_run: false,
            filter_group: None,
            exclude_service_accounts: true,
            user_delete_action: DeleteAction::Delete,
            group_delete_action: DeleteAction::DoNothing,
            user_mappings: Vec::new(),
            group_mappings: Vec::new(),
            page_size: 100,
            task_retention_days: 30,
        }
    }

    /// Whether `user` is currently inside this provider's inclusion
    /// filter.
    ///
    /// Checked lazily right before any remote write so that scope
    /// changes between event-fire and task-run time are honored.
    pub async fn user_in_scope(&self, user: &User, directory: &dyn Directory) -> StoreResult<bool> {
        if self.exclude_service_accounts && user.service_account {
            return Ok(false);
        }
        if let Some(filter_group) = self.filter_group {
            return directory.is_member(filter_group, user.id).await;
        }
        Ok(true)
    }

    /// Whether `group` is currently inside this provider's inclusion
    /// filter.
    pub fn group_in_scope(&self, group: &Group) -> bool {
        match self.filter_group {
            Some(filter_group) => group.id == filter_group,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;

    #[tokio::test]
    async fn test_service_account_exclusion() {
        let directory = MemoryDirectory::new();
        let provider = Provider::new("test", "https://localhost", "token");

        let mut user = User::new("svc-backup");
        user.service_account = true;
        assert!(!provider.user_in_scope(&user, &directory).await.unwrap());

        let user = User::new("jdoe");
        assert!(provider.user_in_scope(&user, &directory).await.unwrap());
    }

    #[tokio::test]
    async fn test_filter_group_scoping() {
        let directory = MemoryDirectory::new();
        let scoped = Group::new("scoped");
        let other = Group::new("other");
        let member = User::new("inside");
        let outsider = User::new("outside");
        directory.insert_group(scoped.clone()).await;
        directory.insert_group(other.clone()).await;
        directory.insert_user(member.clone()).await;
        directory.insert_user(outsider.clone()).await;
        directory.add_member(scoped.id, member.id).await;

        let mut provider = Provider::new("test", "https://localhost", "token");
        provider.filter_group = Some(scoped.id);

        assert!(provider.user_in_scope(&member, &directory).await.unwrap());
        assert!(!provider.user_in_scope(&outsider, &directory).await.unwrap());
        assert!(provider.group_in_scope(&scoped));
        assert!(!provider.group_in_scope(&other));
    }
}
