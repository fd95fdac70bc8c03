//! Sync task records: one per asynchronous unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;

/// What a task is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Paginated enumeration of every in-scope object.
    FullSync,
    /// Incremental sync of a single object.
    SyncObject,
    /// Membership patch for one group.
    SyncMembership,
    /// Discovery-linking of pre-existing remote objects.
    Discover,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::FullSync => write!(f, "full_sync"),
            TaskKind::SyncObject => write!(f, "sync_object"),
            TaskKind::SyncMembership => write!(f, "sync_membership"),
            TaskKind::Discover => write!(f, "discover"),
        }
    }
}

/// Terminal and in-flight task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    /// Completed without messages worth flagging.
    Successful,
    /// Completed, but some rows failed or were skipped.
    Warning,
    /// Aborted by a fatal error.
    Error,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Successful | TaskStatus::Warning | TaskStatus::Error
        )
    }
}

/// Record of one unit of sync work, retained for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Accumulated human-readable messages.
    pub messages: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncTask {
    /// A freshly scheduled task.
    pub fn new(provider_id: Uuid, kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            kind,
            status: TaskStatus::Pending,
            messages: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Mark the task as started.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Append a human-readable message.
    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Mark the task finished: `Error` when `fatal`, otherwise
    /// `Warning` if any messages accumulated, else `Successful`.
    pub fn finish(&mut self, fatal: bool) {
        self.finished_at = Some(Utc::now());
        self.status = if fatal {
            TaskStatus::Error
        } else if self.messages.is_empty() {
            TaskStatus::Successful
        } else {
            TaskStatus::Warning
        };
    }
}

/// Persistent store of sync task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task record.
    async fn insert(&self, task: &SyncTask) -> StoreResult<()>;

    /// Persist the current state of a task record.
    async fn update(&self, task: &SyncTask) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<SyncTask>>;

    /// The most recently finished task of a kind for a provider.
    async fn last_finished(
        &self,
        provider_id: Uuid,
        kind: TaskKind,
    ) -> StoreResult<Option<SyncTask>>;

    /// Drop finished task records older than `cutoff`.  Returns the
    /// number of rows removed.
    async fn purge_finished_before(
        &self,
        provider_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_states() {
        let provider_id = Uuid::new_v4();

        let mut clean = SyncTask::new(provider_id, TaskKind::FullSync);
        clean.start();
        clean.finish(false);
        assert_eq!(clean.status, TaskStatus::Successful);

        let mut warned = SyncTask::new(provider_id, TaskKind::FullSync);
        warned.start();
        warned.add_message("row failed");
        warned.finish(false);
        assert_eq!(warned.status, TaskStatus::Warning);

        let mut fatal = SyncTask::new(provider_id, TaskKind::FullSync);
        fatal.start();
        fatal.finish(true);
        assert_eq!(fatal.status, TaskStatus::Error);
        assert!(fatal.status.is_finished());
    }
}
