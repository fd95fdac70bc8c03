//! Local entity model: users, groups, and the tagged dispatch over both.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two entity kinds the sync engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Group,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Group => write!(f, "group"),
        }
    }
}

/// A local user as the sync engine sees it.
///
/// This is a detached snapshot, not a live database row: change events
/// carry one of these so that remove-direction handlers can still read
/// the object after the underlying row is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Unique login name; the uniqueness key used for conflict
    /// resolution and discovery matching.
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub active: bool,
    /// Service accounts can be excluded from sync per provider.
    pub service_account: bool,
    /// Free-form attributes available to property mappings.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl User {
    /// Minimal constructor used by tests and fixtures.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: None,
            display_name: None,
            first_name: None,
            last_name: None,
            active: true,
            service_account: false,
            attributes: serde_json::Value::Null,
        }
    }
}

/// A local group as the sync engine sees it.
///
/// Membership is not embedded; it is read through the directory store so
/// that membership edits do not invalidate event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    /// Group name; the uniqueness key used for conflict resolution and
    /// discovery matching.
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Group {
    /// Minimal constructor used by tests and fixtures.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            attributes: serde_json::Value::Null,
        }
    }
}

/// Tagged variant over the two entity kinds.
///
/// Sync clients dispatch on this instead of trait-object inheritance:
/// one concrete client per kind, selected by matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalObject {
    User(User),
    Group(Group),
}

impl LocalObject {
    /// The entity kind of this object.
    pub fn kind(&self) -> EntityKind {
        match self {
            LocalObject::User(_) => EntityKind::User,
            LocalObject::Group(_) => EntityKind::Group,
        }
    }

    /// The local identifier of this object.
    pub fn id(&self) -> Uuid {
        match self {
            LocalObject::User(u) => u.id,
            LocalObject::Group(g) => g.id,
        }
    }

    /// A lightweight reference to this object.
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: self.kind(),
            id: self.id(),
        }
    }

    /// The object serialized for mapping-expression contexts.
    pub fn to_context_value(&self) -> serde_json::Value {
        match self {
            LocalObject::User(u) => serde_json::to_value(u).unwrap_or_default(),
            LocalObject::Group(g) => serde_json::to_value(g).unwrap_or_default(),
        }
    }
}

impl From<User> for LocalObject {
    fn from(user: User) -> Self {
        LocalObject::User(user)
    }
}

impl From<Group> for LocalObject {
    fn from(group: Group) -> Self {
        LocalObject::Group(group)
    }
}

/// Reference to a local object by kind and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl ObjectRef {
    pub fn user(id: Uuid) -> Self {
        Self {
            kind: EntityKind::User,
            id,
        }
    }

    pub fn group(id: Uuid) -> Self {
        Self {
            kind: EntityKind::Group,
            id,
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_object_dispatch() {
        let user = User::new("jdoe");
        let user_id = user.id;
        let obj: LocalObject = user.into();
        assert_eq!(obj.kind(), EntityKind::User);
        assert_eq!(obj.id(), user_id);
        assert_eq!(obj.object_ref(), ObjectRef::user(user_id));
    }

    #[test]
    fn test_context_value_shape() {
        let mut user = User::new("jdoe");
        user.email = Some("jdoe@example.com".to_string());
        let value = LocalObject::from(user).to_context_value();
        assert_eq!(value["username"], "jdoe");
        assert_eq!(value["email"], "jdoe@example.com");
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::User.to_string(), "user");
        assert_eq!(EntityKind::Group.to_string(), "group");
    }
}
