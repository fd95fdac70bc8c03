//! SCIM client for groups, including membership reconciliation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use warden_core::{Direction, EntityKind, Group, LocalObject, ObjectRef};
use warden_mapping::MappingManager;
use warden_store::{
    Connection, ConnectionStore, DeleteAction, Directory, NewConnection, Provider,
};

use crate::client::{
    ensure_schema, mapping_context, merge_fragments, SyncClient, WriteOutcome, CONTEXT_VARS,
    MAPPING_KIND,
};
use crate::diff::needs_update;
use crate::error::{SyncError, SyncResult};
use crate::scim::schema::ScimGroup;
use crate::scim::transport::{ScimTransport, DISCOVERY_PAGE_SIZE};

/// SCIM strategy object for the group entity kind.
pub struct ScimGroupClient {
    provider: Arc<Provider>,
    transport: Arc<ScimTransport>,
    connections: Arc<dyn ConnectionStore>,
    directory: Arc<dyn Directory>,
    mapper: MappingManager,
}

impl ScimGroupClient {
    pub fn new(
        provider: Arc<Provider>,
        transport: Arc<ScimTransport>,
        connections: Arc<dyn ConnectionStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let mapper = MappingManager::new(
            provider.group_mappings.clone(),
            MAPPING_KIND,
            CONTEXT_VARS,
        );
        Self {
            provider,
            transport,
            connections,
            directory,
            mapper,
        }
    }

    fn expect_group<'a>(&self, obj: &'a LocalObject) -> SyncResult<&'a Group> {
        match obj {
            LocalObject::Group(group) => Ok(group),
            LocalObject::User(_) => Err(SyncError::stop(
                "user object dispatched to the group sync client",
            )),
        }
    }

    fn external_id_of(record: &Value) -> SyncResult<String> {
        record["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SyncError::stop("SCIM response is missing an id"))
    }

    /// Remote member ids for the given local users; users without a
    /// connection are logged and skipped (best-effort per member).
    async fn member_external_ids(&self, member_ids: &[uuid::Uuid]) -> SyncResult<Vec<String>> {
        let connections = self
            .connections
            .get_many(self.provider.id, EntityKind::User, member_ids)
            .await?;
        if connections.len() < member_ids.len() {
            debug!(
                requested = member_ids.len(),
                connected = connections.len(),
                "Skipping members without a connection"
            );
        }
        Ok(connections.into_iter().map(|c| c.external_id).collect())
    }

    /// Push the full current membership of a freshly created group,
    /// through the same patch-or-replace strategy as any other
    /// membership edit.
    async fn push_initial_members(&self, group: &Group) -> SyncResult<()> {
        let members: BTreeSet<uuid::Uuid> = self
            .directory
            .group_members(group.id)
            .await?
            .into_iter()
            .collect();
        if members.is_empty() {
            return Ok(());
        }

        match self
            .update_membership(group.id, Direction::Add, &members)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                // Initial membership is best-effort; the next full
                // sync or membership event converges.
                warn!(
                    group = %group.name,
                    error = %e,
                    "Transient failure pushing initial members"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Full group replace carrying the complete desired membership,
    /// used when the PATCH primitive is unavailable or rejected.
    async fn replace_with_membership(
        &self,
        group: &Group,
        connection: &Connection,
    ) -> SyncResult<()> {
        let obj = LocalObject::Group(group.clone());
        let mut record = self.to_schema(&obj, Some(connection), false).await?;

        let members = self.directory.group_members(group.id).await?;
        let member_ids = self.member_external_ids(&members).await?;
        if let Some(map) = record.as_object_mut() {
            let members_value: Vec<Value> = member_ids
                .iter()
                .map(|id| serde_json::json!({ "value": id }))
                .collect();
            map.insert("members".to_string(), Value::Array(members_value));
        }

        let remote = self
            .transport
            .replace_group(&connection.external_id, &record)
            .await?;
        let snapshot = if remote.is_null() { record } else { remote };
        self.connections
            .update_snapshot(connection.id, snapshot)
            .await?;
        Ok(())
    }

    /// Apply a membership edit to the remote group.
    ///
    /// Prefers the incremental PATCH primitive when the capability
    /// probe advertises it.  When unsupported, or when a PATCH is
    /// rejected at request time with a non-transient error, falls back
    /// to a full group replace plus a best-effort member patch; the
    /// downgrade is cached for the life of this client.  Members (or a
    /// group) without a connection are logged and skipped.
    pub async fn update_membership(
        &self,
        group_id: uuid::Uuid,
        direction: Direction,
        members: &BTreeSet<uuid::Uuid>,
    ) -> SyncResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        let Some(connection) = self
            .connections
            .get(self.provider.id, EntityKind::Group, group_id)
            .await?
        else {
            warn!(
                group_id = %group_id,
                "Could not sync membership, group has no connection"
            );
            return Ok(());
        };

        let local_ids: Vec<uuid::Uuid> = members.iter().copied().collect();
        let member_ids = self.member_external_ids(&local_ids).await?;
        if member_ids.is_empty() {
            debug!(group_id = %group_id, "No connected members to patch");
            return Ok(());
        }

        let (adds, removes) = match direction {
            Direction::Add => (member_ids, Vec::new()),
            Direction::Remove => (Vec::new(), member_ids),
        };

        if self.transport.patch_supported().await {
            match self
                .transport
                .patch_group_members(&connection.external_id, &adds, &removes)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() || e.is_benign() => return Err(e),
                Err(e) => {
                    warn!(
                        group_id = %group_id,
                        error = %e,
                        "Membership PATCH rejected, downgrading to full replace"
                    );
                    self.transport.downgrade_patch();
                }
            }
        }

        let Some(group) = self.directory.get_group(group_id).await? else {
            warn!(group_id = %group_id, "Group vanished locally, skipping membership sync");
            return Ok(());
        };

        self.replace_with_membership(&group, &connection).await?;

        // Best-effort incremental patch for providers that ignore
        // members in PUT; failures only logged.
        if let Err(e) = self
            .transport
            .patch_group_members(&connection.external_id, &adds, &removes)
            .await
        {
            debug!(
                group_id = %group_id,
                error = %e,
                "Best-effort membership patch after full replace failed"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SyncClient for ScimGroupClient {
    fn kind(&self) -> EntityKind {
        EntityKind::Group
    }

    async fn to_schema(
        &self,
        obj: &LocalObject,
        connection: Option<&Connection>,
        creating: bool,
    ) -> SyncResult<Value> {
        self.expect_group(obj)?;
        let ctx = mapping_context(&self.provider, obj, connection, creating);
        let mut record = merge_fragments(&self.mapper, &ctx)?;
        ensure_schema(&mut record, ScimGroup::SCHEMA);

        serde_json::from_value::<ScimGroup>(record.clone()).map_err(|e| {
            SyncError::stop(format!("mapped record is not a valid SCIM group: {e}"))
        })?;
        Ok(record)
    }

    async fn create(&self, obj: &LocalObject) -> SyncResult<Connection> {
        let group = self.expect_group(obj)?;
        let record = self.to_schema(obj, None, true).await?;

        match self.transport.create_group(&record).await {
            Ok(remote) => {
                let external_id = Self::external_id_of(&remote)?;
                let connection = self
                    .connections
                    .link(NewConnection {
                        provider_id: self.provider.id,
                        kind: EntityKind::Group,
                        local_id: group.id,
                        external_id: external_id.clone(),
                        attributes: remote,
                    })
                    .await?;
                info!(
                    group = %group.name,
                    external_id = %external_id,
                    "Group created on SCIM provider"
                );
                Ok(connection)
            }
            Err(SyncError::ObjectExists { message }) => {
                debug!(
                    group = %group.name,
                    "Group creation conflict, attempting lookup by displayName"
                );
                let candidates = self
                    .transport
                    .find_groups_by_display_name(&group.name)
                    .await?;
                if candidates.len() != 1 {
                    warn!(
                        group = %group.name,
                        candidates = candidates.len(),
                        "Cannot resolve create conflict by displayName lookup"
                    );
                    return Err(SyncError::ObjectExists { message });
                }
                let remote = candidates.into_iter().next().unwrap_or(Value::Null);
                let external_id = Self::external_id_of(&remote)?;
                let connection = self
                    .connections
                    .link(NewConnection {
                        provider_id: self.provider.id,
                        kind: EntityKind::Group,
                        local_id: group.id,
                        external_id: external_id.clone(),
                        attributes: remote,
                    })
                    .await?;
                info!(
                    group = %group.name,
                    external_id = %external_id,
                    "Resolved group conflict by linking existing remote group"
                );
                Ok(connection)
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&self, obj: &LocalObject, connection: &Connection) -> SyncResult<bool> {
        let group = self.expect_group(obj)?;
        let record = self.to_schema(obj, Some(connection), false).await?;

        if !needs_update(&connection.attributes, &record) {
            debug!(group = %group.name, "Remote group already up to date, skipping write");
            return Ok(false);
        }

        let remote = self
            .transport
            .replace_group(&connection.external_id, &record)
            .await?;
        let snapshot = if remote.is_null() { record } else { remote };
        self.connections
            .update_snapshot(connection.id, snapshot)
            .await?;
        info!(
            group = %group.name,
            external_id = %connection.external_id,
            "Group updated on SCIM provider"
        );
        Ok(true)
    }

    async fn delete(&self, obj: ObjectRef) -> SyncResult<()> {
        let Some(connection) = self
            .connections
            .get(self.provider.id, EntityKind::Group, obj.id)
            .await?
        else {
            debug!(object = %obj, "Group has no connection, skipping remote delete");
            return Ok(());
        };

        let result = match self.provider.group_delete_action {
            DeleteAction::Delete => self.transport.delete_group(&connection.external_id).await,
            // Remote systems have no group suspension; degrade.
            DeleteAction::Suspend | DeleteAction::DoNothing => {
                debug!(object = %obj, "Deletion policy leaves remote group in place");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(SyncError::NotFound { .. }) => {
                debug!(object = %obj, "Remote group already deleted");
            }
            Err(e) => return Err(e),
        }

        self.connections
            .unlink(self.provider.id, EntityKind::Group, obj.id)
            .await?;
        info!(
            object = %obj,
            action = %self.provider.group_delete_action,
            "Group deprovisioned from SCIM provider"
        );
        Ok(())
    }

    async fn discover(&self) -> SyncResult<u64> {
        let mut linked: u64 = 0;
        let mut start_index: i64 = 1;

        loop {
            let page = self
                .transport
                .list_groups(None, Some(start_index), Some(DISCOVERY_PAGE_SIZE))
                .await?;
            if page.resources.is_empty() {
                break;
            }
            let fetched = page.resources.len() as i64;

            for resource in page.resources {
                let Some(name) = resource["displayName"].as_str() else {
                    continue;
                };
                let Some(external_id) = resource["id"].as_str() else {
                    continue;
                };
                let Some(group) = self.directory.find_group_by_name(name).await? else {
                    continue;
                };
                if self
                    .connections
                    .get(self.provider.id, EntityKind::Group, group.id)
                    .await?
                    .is_some()
                {
                    continue;
                }
                self.connections
                    .link(NewConnection {
                        provider_id: self.provider.id,
                        kind: EntityKind::Group,
                        local_id: group.id,
                        external_id: external_id.to_string(),
                        attributes: resource.clone(),
                    })
                    .await?;
                linked += 1;
                debug!(group = %name, external_id = %external_id, "Discovered remote group");
            }

            start_index += fetched;
            if page.total_results > 0 && start_index > page.total_results {
                break;
            }
        }

        info!(linked, "Group discovery finished");
        Ok(linked)
    }

    async fn connection_for(&self, obj: ObjectRef) -> SyncResult<Option<Connection>> {
        Ok(self
            .connections
            .get(self.provider.id, EntityKind::Group, obj.id)
            .await?)
    }

    async fn forget(&self, obj: ObjectRef) -> SyncResult<()> {
        self.connections
            .unlink(self.provider.id, EntityKind::Group, obj.id)
            .await?;
        Ok(())
    }

    /// Group writes additionally push the initial membership set when
    /// the connection was just created.
    async fn write(&self, obj: &LocalObject) -> SyncResult<WriteOutcome> {
        let group = self.expect_group(obj)?.clone();

        let outcome = match self.connection_for(obj.object_ref()).await? {
            Some(connection) => match self.update(obj, &connection).await {
                Ok(true) => WriteOutcome::Updated,
                Ok(false) => WriteOutcome::Unchanged,
                Err(SyncError::NotFound { .. }) => {
                    info!(object = %obj.object_ref(), "Remote group vanished, re-creating");
                    self.forget(obj.object_ref()).await?;
                    WriteOutcome::Created(self.create(obj).await?)
                }
                Err(e) => return Err(e),
            },
            None => WriteOutcome::Created(self.create(obj).await?),
        };

        if matches!(&outcome, WriteOutcome::Created(_)) {
            self.push_initial_members(&group).await?;
        }
        Ok(outcome)
    }
}
