//! In-memory store implementations.
//!
//! Used by tests and embedded deployments.  All collections are
//! guarded by `tokio::sync::RwLock`; iteration orders match the
//! ordered-by-id contract of the traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use warden_core::{EntityKind, Group, User};

use crate::connection::{Connection, ConnectionStore, NewConnection};
use crate::directory::Directory;
use crate::error::StoreResult;
use crate::task::{SyncTask, TaskKind, TaskStore};

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// In-memory local directory of users, groups, and memberships.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: RwLock<BTreeMap<Uuid, User>>,
    groups: RwLock<BTreeMap<Uuid, Group>>,
    memberships: RwLock<HashMap<Uuid, BTreeSet<Uuid>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn insert_group(&self, group: Group) {
        self.groups.write().await.insert(group.id, group);
    }

    pub async fn remove_user(&self, id: Uuid) {
        self.users.write().await.remove(&id);
        for members in self.memberships.write().await.values_mut() {
            members.remove(&id);
        }
    }

    pub async fn remove_group(&self, id: Uuid) {
        self.groups.write().await.remove(&id);
        self.memberships.write().await.remove(&id);
    }

    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) {
        self.memberships
            .write()
            .await
            .entry(group_id)
            .or_default()
            .insert(user_id);
    }

    pub async fn remove_member(&self, group_id: Uuid, user_id: Uuid) {
        if let Some(members) = self.memberships.write().await.get_mut(&group_id) {
            members.remove(&user_id);
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn count_users(&self) -> StoreResult<i64> {
        Ok(self.users.read().await.len() as i64)
    }

    async fn count_groups(&self) -> StoreResult<i64> {
        Ok(self.groups.read().await.len() as i64)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<Vec<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_groups(&self, limit: i64, offset: i64) -> StoreResult<Vec<Group>> {
        Ok(self
            .groups
            .read()
            .await
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_group(&self, id: Uuid) -> StoreResult<Option<Group>> {
        Ok(self.groups.read().await.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_group_by_name(&self, name: &str) -> StoreResult<Option<Group>> {
        Ok(self
            .groups
            .read()
            .await
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn group_members(&self, group_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .memberships
            .read()
            .await
            .get(&group_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// In-memory connection store keyed by `(provider, kind, local id)`.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    connections: RwLock<HashMap<(Uuid, EntityKind, Uuid), Connection>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections held (test helper).
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_id: Uuid,
    ) -> StoreResult<Option<Connection>> {
        Ok(self
            .connections
            .read()
            .await
            .get(&(provider_id, kind, local_id))
            .cloned())
    }

    async fn get_many(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_ids: &[Uuid],
    ) -> StoreResult<Vec<Connection>> {
        let connections = self.connections.read().await;
        Ok(local_ids
            .iter()
            .filter_map(|id| connections.get(&(provider_id, kind, *id)).cloned())
            .collect())
    }

    async fn link(&self, new: NewConnection) -> StoreResult<Connection> {
        let mut connections = self.connections.write().await;
        let key = (new.provider_id, new.kind, new.local_id);
        if let Some(existing) = connections.get(&key) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let connection = Connection {
            id: Uuid::new_v4(),
            provider_id: new.provider_id,
            kind: new.kind,
            local_id: new.local_id,
            external_id: new.external_id,
            attributes: new.attributes,
            created_at: now,
            updated_at: now,
        };
        connections.insert(key, connection.clone());
        Ok(connection)
    }

    async fn update_snapshot(
        &self,
        connection_id: Uuid,
        attributes: serde_json::Value,
    ) -> StoreResult<()> {
        let mut connections = self.connections.write().await;
        for connection in connections.values_mut() {
            if connection.id == connection_id {
                connection.attributes = attributes;
                connection.updated_at = Utc::now();
                return Ok(());
            }
        }
        Err(crate::error::StoreError::NotFound(format!(
            "connection {connection_id}"
        )))
    }

    async fn unlink(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_id: Uuid,
    ) -> StoreResult<bool> {
        let mut connections = self.connections.write().await;
        Ok(connections.remove(&(provider_id, kind, local_id)).is_some())
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// In-memory task store.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, SyncTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &SyncTask) -> StoreResult<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &SyncTask) -> StoreResult<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<SyncTask>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn last_finished(
        &self,
        provider_id: Uuid,
        kind: TaskKind,
    ) -> StoreResult<Option<SyncTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| {
                t.provider_id == provider_id && t.kind == kind && t.finished_at.is_some()
            })
            .max_by_key(|t| t.finished_at)
            .cloned())
    }

    async fn purge_finished_before(
        &self,
        provider_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| {
            t.provider_id != provider_id
                || match t.finished_at {
                    Some(finished) => finished >= cutoff,
                    None => true,
                }
        });
        Ok((before - tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_link_is_get_or_create() {
        let store = MemoryConnectionStore::new();
        let provider_id = Uuid::new_v4();
        let local_id = Uuid::new_v4();

        let first = store
            .link(NewConnection {
                provider_id,
                kind: EntityKind::User,
                local_id,
                external_id: "ext-1".into(),
                attributes: json!({"userName": "jdoe"}),
            })
            .await
            .unwrap();

        // Second link with a different external id must not replace.
        let second = store
            .link(NewConnection {
                provider_id,
                kind: EntityKind::User,
                local_id,
                external_id: "ext-2".into(),
                attributes: json!({}),
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.external_id, "ext-1");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unlink() {
        let store = MemoryConnectionStore::new();
        let provider_id = Uuid::new_v4();
        let local_id = Uuid::new_v4();
        store
            .link(NewConnection {
                provider_id,
                kind: EntityKind::Group,
                local_id,
                external_id: "ext".into(),
                attributes: json!({}),
            })
            .await
            .unwrap();

        assert!(store
            .unlink(provider_id, EntityKind::Group, local_id)
            .await
            .unwrap());
        assert!(!store
            .unlink(provider_id, EntityKind::Group, local_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_directory_pagination_stable_order() {
        let directory = MemoryDirectory::new();
        for i in 0..5 {
            directory.insert_user(User::new(format!("user-{i}"))).await;
        }
        let page1 = directory.list_users(3, 0).await.unwrap();
        let page2 = directory.list_users(3, 3).await.unwrap();
        assert_eq!(page1.len(), 3);
        assert_eq!(page2.len(), 2);

        let mut ids: Vec<Uuid> = page1.iter().chain(page2.iter()).map(|u| u.id).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        assert_eq!(ids.len(), 5);
        ids.dedup();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_task_purge_respects_cutoff() {
        let store = MemoryTaskStore::new();
        let provider_id = Uuid::new_v4();

        let mut old = SyncTask::new(provider_id, TaskKind::FullSync);
        old.start();
        old.finish(false);
        old.finished_at = Some(Utc::now() - chrono::Duration::days(90));
        store.insert(&old).await.unwrap();

        let mut recent = SyncTask::new(provider_id, TaskKind::FullSync);
        recent.start();
        recent.finish(false);
        store.insert(&recent).await.unwrap();

        let running = SyncTask::new(provider_id, TaskKind::FullSync);
        store.insert(&running).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let purged = store
            .purge_finished_before(provider_id, cutoff)
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(old.id).await.unwrap().is_none());
        assert!(store.get(recent.id).await.unwrap().is_some());
        assert!(store.get(running.id).await.unwrap().is_some());
    }
}
