//! # Warden Sync
//!
//! Outgoing directory synchronization engine: keeps external
//! directories eventually consistent with the platform's own users
//! and groups.
//!
//! The engine is built from a small set of parts:
//!
//! - a per-entity-kind [`client::SyncClient`] implementing
//!   create/update/delete/discover against one external system,
//! - diff-before-write idempotence ([`diff::needs_update`]),
//! - a [`dispatcher::ChangeDispatcher`] reacting to local lifecycle
//!   events,
//! - a [`orchestrator::SyncOrchestrator`] driving paginated full
//!   resyncs under a provider-keyed non-blocking lock.
//!
//! The SCIM 2.0 implementation lives in [`scim`]; its wire transport
//! is the single seam to the remote system, so every outcome arrives
//! already classified into the [`error::SyncError`] taxonomy.

pub mod client;
pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod scim;

pub use client::{SyncClient, WriteOutcome};
pub use diff::needs_update;
pub use dispatcher::ChangeDispatcher;
pub use error::{SyncError, SyncResult};
pub use orchestrator::{SyncOrchestrator, SyncRunOutcome, SyncStatus};
pub use retry::RetryPolicy;
pub use scim::{default_group_mapping, default_user_mapping, ScimClients, ScimTransport};
