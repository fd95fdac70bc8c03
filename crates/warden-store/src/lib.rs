//! # Warden Store
//!
//! Durable coordination state for the sync engine: provider
//! configuration, connections between local objects and their external
//! identifiers, sync task records, and the provider-keyed exclusivity
//! lock.
//!
//! Everything is defined as a trait seam so the engine stays
//! persistence-agnostic.  In-memory implementations are always
//! available (tests, embedded use); Postgres implementations live
//! behind the `postgres` cargo feature.

pub mod connection;
pub mod directory;
pub mod error;
pub mod lock;
pub mod memory;
pub mod provider;
pub mod task;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use connection::{Connection, ConnectionStore, NewConnection};
pub use directory::Directory;
pub use error::{StoreError, StoreResult};
pub use lock::{MemorySyncLock, SyncLock};
pub use memory::{MemoryConnectionStore, MemoryDirectory, MemoryTaskStore};
pub use provider::{DeleteAction, Provider};
pub use task::{SyncTask, TaskKind, TaskStatus, TaskStore};
