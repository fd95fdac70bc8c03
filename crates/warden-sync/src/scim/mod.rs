//! SCIM 2.0 implementation of the sync-client contract.

pub mod groups;
pub mod schema;
pub mod transport;
pub mod users;

use std::sync::Arc;

use warden_core::EntityKind;
use warden_mapping::PropertyMapping;
use warden_store::{ConnectionStore, Directory, Provider};

use crate::client::{SyncClient, MAPPING_KIND};
use crate::error::SyncResult;

pub use groups::ScimGroupClient;
pub use transport::ScimTransport;
pub use users::ScimUserClient;

/// The per-entity-kind SCIM clients for one provider, sharing a single
/// transport (and therefore one capability probe and dry-run setting).
pub struct ScimClients {
    pub users: ScimUserClient,
    pub groups: ScimGroupClient,
}

impl ScimClients {
    /// Build both clients from provider settings.  `dry_run_override`
    /// replaces the provider's flag for this instance (manual resync).
    pub fn new(
        provider: Arc<Provider>,
        connections: Arc<dyn ConnectionStore>,
        directory: Arc<dyn Directory>,
        dry_run_override: Option<bool>,
    ) -> SyncResult<Self> {
        let transport = Arc::new(ScimTransport::new(&provider, dry_run_override)?);
        Ok(Self {
            users: ScimUserClient::new(
                provider.clone(),
                transport.clone(),
                connections.clone(),
                directory.clone(),
            ),
            groups: ScimGroupClient::new(provider, transport, connections, directory),
        })
    }

    /// Select the client for an entity kind.
    pub fn client_for(&self, kind: EntityKind) -> &dyn SyncClient {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Group => &self.groups,
        }
    }
}

/// Built-in managed mapping for users: the baseline SCIM user record.
pub fn default_user_mapping() -> PropertyMapping {
    let mut mapping = PropertyMapping::new(
        "scim-user",
        MAPPING_KIND,
        r#"
let result = #{
    userName: object.username,
    externalId: object.id,
    active: object.active,
};
if object.display_name != () {
    result.displayName = object.display_name;
}
if object.first_name != () || object.last_name != () {
    let name = #{};
    if object.first_name != () {
        name.givenName = object.first_name;
    }
    if object.last_name != () {
        name.familyName = object.last_name;
    }
    result.name = name;
}
if object.email != () {
    result.emails = [#{ value: object.email, type: "work", primary: true }];
}
result
"#,
    );
    mapping.managed = Some("warden.dev/mappings/scim/user".to_string());
    mapping
}

/// Built-in managed mapping for groups.
pub fn default_group_mapping() -> PropertyMapping {
    let mut mapping = PropertyMapping::new(
        "scim-group",
        MAPPING_KIND,
        r#"
#{
    displayName: object.name,
    externalId: object.id,
}
"#,
    );
    mapping.managed = Some("warden.dev/mappings/scim/group".to_string());
    mapping
}
