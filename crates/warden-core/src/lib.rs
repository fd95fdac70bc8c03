//! # Warden Core
//!
//! Entity model and change-event seam shared by the warden
//! synchronization crates.
//!
//! This crate deliberately knows nothing about external directories or
//! persistence: it defines the shapes of the platform's own users and
//! groups, and the typed lifecycle events the storage layer publishes
//! for the sync engine to consume.

pub mod events;
pub mod model;

pub use events::{ChangeEvent, Direction, EventBus};
pub use model::{EntityKind, Group, LocalObject, ObjectRef, User};
