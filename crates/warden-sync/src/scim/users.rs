//! SCIM client for users.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use warden_core::{EntityKind, LocalObject, ObjectRef, User};
use warden_mapping::MappingManager;
use warden_store::{
    Connection, ConnectionStore, DeleteAction, Directory, NewConnection, Provider,
};

use crate::client::{
    ensure_schema, mapping_context, merge_fragments, SyncClient, CONTEXT_VARS, MAPPING_KIND,
};
use crate::diff::needs_update;
use crate::error::{SyncError, SyncResult};
use crate::scim::schema::ScimUser;
use crate::scim::transport::{ScimTransport, DISCOVERY_PAGE_SIZE};

/// SCIM strategy object for the user entity kind.
pub struct ScimUserClient {
    provider: Arc<Provider>,
    transport: Arc<ScimTransport>,
    connections: Arc<dyn ConnectionStore>,
    directory: Arc<dyn Directory>,
    mapper: MappingManager,
}

impl ScimUserClient {
    pub fn new(
        provider: Arc<Provider>,
        transport: Arc<ScimTransport>,
        connections: Arc<dyn ConnectionStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let mapper = MappingManager::new(
            provider.user_mappings.clone(),
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

    fn expect_user<'a>(&self, obj: &'a LocalObject) -> SyncResult<&'a User> {
        match obj {
            LocalObject::User(user) => Ok(user),
            LocalObject::Group(_) => Err(SyncError::stop(
                "group object dispatched to the user sync client",
            )),
        }
    }

    /// Remote id out of a SCIM response body.
    fn external_id_of(record: &Value) -> SyncResult<String> {
        record["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SyncError::stop("SCIM response is missing an id"))
    }

    /// Resolve a create conflict by looking up the existing remote
    /// user by userName and linking it.  Zero or ambiguous candidates
    /// re-raise the original conflict.
    async fn link_existing(
        &self,
        user: &User,
        original: SyncError,
    ) -> SyncResult<Connection> {
        let candidates = self.transport.find_users_by_username(&user.username).await?;
        if candidates.len() != 1 {
            warn!(
                user = %user.username,
                candidates = candidates.len(),
                "Cannot resolve create conflict by userName lookup"
            );
            return Err(original);
        }

        let remote = candidates.into_iter().next().unwrap_or(Value::Null);
        let external_id = Self::external_id_of(&remote)?;
        let connection = self
            .connections
            .link(NewConnection {
                provider_id: self.provider.id,
                kind: EntityKind::User,
                local_id: user.id,
                external_id: external_id.clone(),
                attributes: remote,
            })
            .await?;

        info!(
            user = %user.username,
            external_id = %external_id,
            "Resolved user conflict by linking existing remote user"
        );
        Ok(connection)
    }
}

#[async_trait]
impl SyncClient for ScimUserClient {
    fn kind(&self) -> EntityKind {
        EntityKind::User
    }

    async fn to_schema(
        &self,
        obj: &LocalObject,
        connection: Option<&Connection>,
        creating: bool,
    ) -> SyncResult<Value> {
        self.expect_user(obj)?;
        let ctx = mapping_context(&self.provider, obj, connection, creating);
        let mut record = merge_fragments(&self.mapper, &ctx)?;
        ensure_schema(&mut record, ScimUser::SCHEMA);

        // Structural validation against the target schema; a mismatch
        // is a configuration error, not transient.
        serde_json::from_value::<ScimUser>(record.clone())
            .map_err(|e| SyncError::stop(format!("mapped record is not a valid SCIM user: {e}")))?;
        Ok(record)
    }

    async fn create(&self, obj: &LocalObject) -> SyncResult<Connection> {
        let user = self.expect_user(obj)?;
        let record = self.to_schema(obj, None, true).await?;

        match self.transport.create_user(&record).await {
            Ok(remote) => {
                let external_id = Self::external_id_of(&remote)?;
                let connection = self
                    .connections
                    .link(NewConnection {
                        provider_id: self.provider.id,
                        kind: EntityKind::User,
                        local_id: user.id,
                        external_id: external_id.clone(),
                        attributes: remote,
                    })
                    .await?;
                info!(
                    user = %user.username,
                    external_id = %external_id,
                    "User created on SCIM provider"
                );
                Ok(connection)
            }
            Err(SyncError::ObjectExists { message }) => {
                debug!(
                    user = %user.username,
                    "User creation conflict, attempting lookup by userName"
                );
                self.link_existing(user, SyncError::ObjectExists { message })
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&self, obj: &LocalObject, connection: &Connection) -> SyncResult<bool> {
        let user = self.expect_user(obj)?;
        let record = self.to_schema(obj, Some(connection), false).await?;

        if !needs_update(&connection.attributes, &record) {
            debug!(user = %user.username, "Remote user already up to date, skipping write");
            return Ok(false);
        }

        let remote = self
            .transport
            .replace_user(&connection.external_id, &record)
            .await?;
        let snapshot = if remote.is_null() { record } else { remote };
        self.connections
            .update_snapshot(connection.id, snapshot)
            .await?;
        info!(
            user = %user.username,
            external_id = %connection.external_id,
            "User updated on SCIM provider"
        );
        Ok(true)
    }

    async fn delete(&self, obj: ObjectRef) -> SyncResult<()> {
        let Some(connection) = self
            .connections
            .get(self.provider.id, EntityKind::User, obj.id)
            .await?
        else {
            debug!(object = %obj, "User has no connection, skipping remote delete");
            return Ok(());
        };

        let result = match self.provider.user_delete_action {
            DeleteAction::Delete => self.transport.delete_user(&connection.external_id).await,
            DeleteAction::Suspend => self
                .transport
                .deactivate_user(&connection.external_id)
                .await
                .map(|_| ()),
            DeleteAction::DoNothing => {
                debug!(object = %obj, "Deletion policy is do_nothing, leaving remote user");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            // Already gone remotely; removing the connection is still
            // the right outcome.
            Err(SyncError::NotFound { .. }) => {
                debug!(object = %obj, "Remote user already deleted");
            }
            Err(e) => return Err(e),
        }

        self.connections
            .unlink(self.provider.id, EntityKind::User, obj.id)
            .await?;
        info!(
            object = %obj,
            action = %self.provider.user_delete_action,
            "User deprovisioned from SCIM provider"
        );
        Ok(())
    }

    async fn discover(&self) -> SyncResult<u64> {
        let mut linked: u64 = 0;
        let mut start_index: i64 = 1;

        loop {
            let page = self
                .transport
                .list_users(None, Some(start_index), Some(DISCOVERY_PAGE_SIZE))
                .await?;
            if page.resources.is_empty() {
                break;
            }
            let fetched = page.resources.len() as i64;

            for resource in page.resources {
                let Some(username) = resource["userName"].as_str() else {
                    continue;
                };
                let Some(external_id) = resource["id"].as_str() else {
                    continue;
                };
                let Some(user) = self.directory.find_user_by_username(username).await? else {
                    continue;
                };
                if self
                    .connections
                    .get(self.provider.id, EntityKind::User, user.id)
                    .await?
                    .is_some()
                {
                    continue;
                }
                self.connections
                    .link(NewConnection {
                        provider_id: self.provider.id,
                        kind: EntityKind::User,
                        local_id: user.id,
                        external_id: external_id.to_string(),
                        attributes: resource.clone(),
                    })
                    .await?;
                linked += 1;
                debug!(user = %username, external_id = %external_id, "Discovered remote user");
            }

            start_index += fetched;
            if page.total_results > 0 && start_index > page.total_results {
                break;
            }
        }

        info!(linked, "User discovery finished");
        Ok(linked)
    }

    async fn connection_for(&self, obj: ObjectRef) -> SyncResult<Option<Connection>> {
        Ok(self
            .connections
            .get(self.provider.id, EntityKind::User, obj.id)
            .await?)
    }

    async fn forget(&self, obj: ObjectRef) -> SyncResult<()> {
        self.connections
            .unlink(self.provider.id, EntityKind::User, obj.id)
            .await?;
        Ok(())
    }
}
