//! Typed change events published by the storage layer.
//!
//! The sync engine never hooks persistence internals directly; instead
//! the store publishes one of these events on every local lifecycle
//! transition and the change dispatcher subscribes.  Delete events fire
//! *before* the local row disappears, so the payload still carries the
//! full object.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::LocalObject;

/// Direction of a membership edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Add,
    Remove,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Add => write!(f, "add"),
            Direction::Remove => write!(f, "remove"),
        }
    }
}

/// A local lifecycle event the sync engine reacts to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// An object was created locally.
    Created { object: LocalObject },

    /// An object was updated locally.
    Updated { object: LocalObject },

    /// An object is about to be deleted locally.  The payload is the
    /// last full state of the object; handlers must not assume the row
    /// still exists by the time they run.
    PreDelete { object: LocalObject },

    /// Users were added to or removed from a group.
    MembershipChanged {
        group_id: Uuid,
        direction: Direction,
        /// Local user ids affected by the edit.
        members: BTreeSet<Uuid>,
    },
}

/// Broadcast bus for change events.
///
/// Thin wrapper over `tokio::sync::broadcast` so the storage layer and
/// the dispatcher agree on capacity and subscription semantics without
/// sharing a concrete store type.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Create a bus with the given buffered capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event.  Returns the number of active subscribers; a
    /// bus with no subscribers silently drops the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!("No subscribers for change event, dropping");
                0
            }
        }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let user = User::new("jdoe");
        let delivered = bus.publish(ChangeEvent::Created {
            object: user.clone().into(),
        });
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            ChangeEvent::Created {
                object: LocalObject::User(u),
            } => assert_eq!(u.id, user.id),
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        let delivered = bus.publish(ChangeEvent::MembershipChanged {
            group_id: Uuid::new_v4(),
            direction: Direction::Add,
            members: BTreeSet::new(),
        });
        assert_eq!(delivered, 0);
    }
}
