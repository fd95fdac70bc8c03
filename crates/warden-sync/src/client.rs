//! The generic sync-client contract.
//!
//! One client instance exists per provider and entity kind; the
//! dispatcher and orchestrator select a client by matching on
//! [`EntityKind`] rather than through inheritance.

use async_trait::async_trait;
use serde_json::Value;

use warden_core::{EntityKind, LocalObject, ObjectRef};
use warden_mapping::{deep_merge, normalize, MappingContext, MappingManager};
use warden_store::{Connection, Provider};

use crate::error::{SyncError, SyncResult};

/// Context variable slots every mapping call site provides.
pub const CONTEXT_VARS: &[&str] = &["object", "provider", "connection", "creating"];

/// Mapping family handled by the SCIM clients.
pub const MAPPING_KIND: &str = "scim";

/// Result of a [`SyncClient::write`].
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// A remote object was created (or an existing one linked) and a
    /// connection now exists.
    Created(Connection),
    /// The remote object was updated.
    Updated,
    /// The computed record matched the snapshot; no request was sent.
    Unchanged,
}

/// Per-entity-kind strategy object for one external system.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// The entity kind this client handles.
    fn kind(&self) -> EntityKind;

    /// Run the mapping manager over the object and produce the
    /// provider-shaped record.
    async fn to_schema(
        &self,
        obj: &LocalObject,
        connection: Option<&Connection>,
        creating: bool,
    ) -> SyncResult<Value>;

    /// Create the object remotely, resolving "already exists" by
    /// look-up-and-link.  Returns the resulting connection.
    async fn create(&self, obj: &LocalObject) -> SyncResult<Connection>;

    /// Update the remote object.  Returns whether a request was
    /// actually sent (diff-before-write may skip it).
    async fn update(&self, obj: &LocalObject, connection: &Connection) -> SyncResult<bool>;

    /// Remove the object remotely per the provider's deletion policy
    /// and drop the connection.  Absence of a connection is not an
    /// error.
    async fn delete(&self, obj: ObjectRef) -> SyncResult<()>;

    /// Enumerate remote objects and link matches to local objects
    /// without writing remotely.  Returns the number of new links.
    async fn discover(&self) -> SyncResult<u64>;

    /// The existing connection for a local object, if any.
    async fn connection_for(&self, obj: ObjectRef) -> SyncResult<Option<Connection>>;

    /// Drop a stale connection (remote object vanished).
    async fn forget(&self, obj: ObjectRef) -> SyncResult<()>;

    /// Create-or-update: update when a connection exists, create
    /// otherwise.  A remote not-found during update drops the stale
    /// connection and re-creates instead of failing permanently.
    async fn write(&self, obj: &LocalObject) -> SyncResult<WriteOutcome> {
        match self.connection_for(obj.object_ref()).await? {
            Some(connection) => match self.update(obj, &connection).await {
                Ok(true) => Ok(WriteOutcome::Updated),
                Ok(false) => Ok(WriteOutcome::Unchanged),
                Err(SyncError::NotFound { .. }) => {
                    tracing::info!(
                        object = %obj.object_ref(),
                        "Remote object vanished, re-creating"
                    );
                    self.forget(obj.object_ref()).await?;
                    Ok(WriteOutcome::Created(self.create(obj).await?))
                }
                Err(e) => Err(e),
            },
            None => Ok(WriteOutcome::Created(self.create(obj).await?)),
        }
    }
}

/// Build the mapping context shared by both entity kinds.
///
/// Credentials are deliberately not exposed to expressions.
pub(crate) fn mapping_context(
    provider: &Provider,
    obj: &LocalObject,
    connection: Option<&Connection>,
    creating: bool,
) -> MappingContext {
    let provider_value = serde_json::json!({
        "id": provider.id,
        "name": provider.name,
        "base_url": provider.base_url,
    });
    let connection_value = match connection {
        Some(c) => serde_json::json!({
            "external_id": c.external_id,
            "attributes": c.attributes,
        }),
        None => Value::Null,
    };

    MappingContext::new()
        .with("object", obj.to_context_value())
        .with("provider", provider_value)
        .with("connection", connection_value)
        .with("creating", Value::Bool(creating))
}

/// Merge mapping fragments into one normalized record.
///
/// Fragments merge key by key in evaluation order, null-valued keys
/// are stripped, and an empty result is a configuration error.
pub(crate) fn merge_fragments(
    manager: &MappingManager,
    ctx: &MappingContext,
) -> SyncResult<Value> {
    let fragments = manager.iterate(ctx)?;

    let mut record = Value::Object(serde_json::Map::new());
    for fragment in fragments {
        if !fragment.is_object() {
            return Err(SyncError::stop(
                "property mapping produced a non-object fragment",
            ));
        }
        deep_merge(&mut record, fragment);
    }

    let record = normalize(&record);
    let empty = record.as_object().map(|m| m.is_empty()).unwrap_or(true);
    if empty {
        return Err(SyncError::stop("no property mappings produced any output"));
    }
    Ok(record)
}

/// Ensure the record carries the given SCIM schema URI.
pub(crate) fn ensure_schema(record: &mut Value, schema_uri: &str) {
    if let Some(map) = record.as_object_mut() {
        let present = map
            .get("schemas")
            .and_then(Value::as_array)
            .map(|a| !a.is_empty())
            .unwrap_or(false);
        if !present {
            map.insert(
                "schemas".to_string(),
                Value::Array(vec![Value::String(schema_uri.to_string())]),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::User;
    use warden_mapping::PropertyMapping;

    #[test]
    fn test_merge_fragments_order_and_strip() {
        let manager = MappingManager::new(
            vec![
                PropertyMapping::new("10-base", MAPPING_KIND, r#"#{ a: 1, b: "x", gone: () }"#),
                PropertyMapping::new("20-override", MAPPING_KIND, r#"#{ b: "y" }"#),
            ],
            MAPPING_KIND,
            CONTEXT_VARS,
        );
        let provider = Provider::new("p", "https://localhost", "t");
        let obj: LocalObject = User::new("jdoe").into();
        let ctx = mapping_context(&provider, &obj, None, true);

        let record = merge_fragments(&manager, &ctx).unwrap();
        assert_eq!(record, json!({"a": 1, "b": "y"}));
    }

    #[test]
    fn test_merge_fragments_empty_is_fatal() {
        let manager = MappingManager::new(vec![], MAPPING_KIND, CONTEXT_VARS);
        let provider = Provider::new("p", "https://localhost", "t");
        let obj: LocalObject = User::new("jdoe").into();
        let ctx = mapping_context(&provider, &obj, None, true);

        match merge_fragments(&manager, &ctx) {
            Err(SyncError::StopSync { .. }) => {}
            other => panic!("Expected StopSync, got {other:?}"),
        }
    }

    #[test]
    fn test_ensure_schema_only_when_missing() {
        let mut record = json!({"userName": "jdoe"});
        ensure_schema(&mut record, "urn:example:User");
        assert_eq!(record["schemas"][0], "urn:example:User");

        let mut with_schema = json!({"schemas": ["urn:other"], "userName": "jdoe"});
        ensure_schema(&mut with_schema, "urn:example:User");
        assert_eq!(with_schema["schemas"][0], "urn:other");
    }
}
