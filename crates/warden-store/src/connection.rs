//! Connections: the persisted link between a local object and its
//! external identifier at one provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::EntityKind;

use crate::error::StoreResult;

/// "Local object X is known at the remote system as external id Y."
///
/// Carries the last successfully written remote attribute snapshot so
/// updates can diff before writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub kind: EntityKind,
    pub local_id: Uuid,
    /// Opaque identifier assigned by the remote system.
    pub external_id: String,
    /// Last-known remote attribute snapshot.
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to link a local object to a remote one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConnection {
    pub provider_id: Uuid,
    pub kind: EntityKind,
    pub local_id: Uuid,
    pub external_id: String,
    pub attributes: serde_json::Value,
}

/// Persistent store of connections.
///
/// Invariant: at most one connection per `(provider, kind, local
/// object)`; [`ConnectionStore::link`] has get-or-create semantics so
/// concurrent linkers and repeated discovery runs cannot violate it.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Look up the connection for a local object at a provider.
    async fn get(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_id: Uuid,
    ) -> StoreResult<Option<Connection>>;

    /// Look up connections for many local objects at once, preserving
    /// the order of `local_ids` for those that exist.
    async fn get_many(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_ids: &[Uuid],
    ) -> StoreResult<Vec<Connection>>;

    /// Create the connection if absent, otherwise return the existing
    /// one unchanged.
    async fn link(&self, new: NewConnection) -> StoreResult<Connection>;

    /// Replace the attribute snapshot after a successful remote write.
    async fn update_snapshot(
        &self,
        connection_id: Uuid,
        attributes: serde_json::Value,
    ) -> StoreResult<()>;

    /// Remove the connection for a local object.  Returns whether a
    /// row existed.
    async fn unlink(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_id: Uuid,
    ) -> StoreResult<bool>;
}
