//! Sync orchestrator: full resyncs, discovery, status, and manual
//! per-object resync.
//!
//! Full resyncs and discovery hold the provider-keyed exclusivity
//! lock; at most one runs per provider at any time.  A second attempt
//! reports "already running" immediately and does no work — no
//! queuing, no retry.  Manual resync targets a single object and
//! deliberately bypasses the lock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use warden_core::{EntityKind, LocalObject, ObjectRef};
use warden_store::{
    ConnectionStore, Directory, Provider, SyncLock, SyncTask, TaskKind, TaskStore,
};

use crate::client::{SyncClient, WriteOutcome};
use crate::error::{SyncError, SyncResult};
use crate::scim::ScimClients;

/// Outcome of attempting a locked run.
#[derive(Debug)]
pub enum SyncRunOutcome {
    /// The run executed; the finished task record is attached.
    Completed(SyncTask),
    /// Another full sync holds the provider lock; nothing was done.
    AlreadyRunning,
}

/// Per-provider sync status for the API layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatus {
    /// Whether a full sync currently holds the provider lock.
    pub is_running: bool,
    /// The most recently finished full-sync task, if any.
    pub last_task: Option<SyncTask>,
}

/// Drives full resyncs and exposes status for one provider.
pub struct SyncOrchestrator {
    provider: Arc<Provider>,
    directory: Arc<dyn Directory>,
    connections: Arc<dyn ConnectionStore>,
    tasks: Arc<dyn TaskStore>,
    lock: Arc<dyn SyncLock>,
    clients: Arc<ScimClients>,
}

impl SyncOrchestrator {
    pub fn new(
        provider: Arc<Provider>,
        directory: Arc<dyn Directory>,
        connections: Arc<dyn ConnectionStore>,
        tasks: Arc<dyn TaskStore>,
        lock: Arc<dyn SyncLock>,
        clients: Arc<ScimClients>,
    ) -> Self {
        Self {
            provider,
            directory,
            connections,
            tasks,
            lock,
            clients,
        }
    }

    /// Run a full resync of every in-scope user and group.
    pub async fn full_sync(&self) -> SyncResult<SyncRunOutcome> {
        if !self.lock.try_acquire(self.provider.id).await? {
            info!(
                provider = %self.provider.name,
                "A sync is already running for this provider"
            );
            return Ok(SyncRunOutcome::AlreadyRunning);
        }

        let result = self.run_full_sync().await;

        if let Err(e) = self.lock.release(self.provider.id).await {
            warn!(provider = %self.provider.name, error = %e, "Failed to release sync lock");
        }

        result.map(SyncRunOutcome::Completed)
    }

    async fn run_full_sync(&self) -> SyncResult<SyncTask> {
        let mut task = SyncTask::new(self.provider.id, TaskKind::FullSync);
        task.start();
        self.tasks.insert(&task).await?;

        let user_count = self.directory.count_users().await?;
        let group_count = self.directory.count_groups().await?;
        info!(
            provider = %self.provider.name,
            users = user_count,
            groups = group_count,
            "Starting full sync"
        );

        let outcome = self.sync_pages(&mut task).await;
        match outcome {
            Ok(()) => {
                task.finish(false);
                info!(
                    provider = %self.provider.name,
                    messages = task.messages.len(),
                    "Full sync completed"
                );
            }
            Err(e) => {
                // A fatal error aborts the remaining pages and is
                // surfaced verbatim on the task record.
                task.add_message(e.to_string());
                task.finish(true);
                warn!(provider = %self.provider.name, error = %e, "Full sync aborted");
            }
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    /// Paginate users then groups with a stable order, syncing each
    /// row best-effort.
    async fn sync_pages(&self, task: &mut SyncTask) -> SyncResult<()> {
        let page_size = self.provider.page_size;

        let mut offset: i64 = 0;
        loop {
            let users = self.directory.list_users(page_size, offset).await?;
            let page_len = users.len() as i64;
            for user in users {
                self.sync_row(LocalObject::User(user), task).await?;
            }
            if page_len < page_size {
                break;
            }
            offset += page_size;
        }

        offset = 0;
        loop {
            let groups = self.directory.list_groups(page_size, offset).await?;
            let page_len = groups.len() as i64;
            for group in groups {
                self.sync_row(LocalObject::Group(group), task).await?;
            }
            if page_len < page_size {
                break;
            }
            offset += page_size;
        }

        Ok(())
    }

    /// Sync one row; row-level failures become task messages, only
    /// fatal errors propagate.
    async fn sync_row(&self, object: LocalObject, task: &mut SyncTask) -> SyncResult<()> {
        let in_scope = match &object {
            LocalObject::User(user) => {
                self.provider
                    .user_in_scope(user, self.directory.as_ref())
                    .await?
            }
            LocalObject::Group(group) => self.provider.group_in_scope(group),
        };
        if !in_scope {
            return Ok(());
        }

        let label = row_label(&object);
        let client = self.clients.client_for(object.kind());
        match client.write(&object).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(SyncError::SkipObject) => {
                debug!(object = %label, "Skipped by property mapping");
                Ok(())
            }
            Err(e @ SyncError::DryRun { .. }) => {
                task.add_message(format!("{label}: {e}"));
                Ok(())
            }
            Err(e) => {
                warn!(object = %label, error = %e, "Failed to sync object during full sync");
                task.add_message(format!("Failed to sync {label}: {e}"));
                Ok(())
            }
        }
    }

    /// Link pre-existing remote objects to local ones, under the same
    /// lock discipline as a full sync.
    pub async fn discover(&self) -> SyncResult<SyncRunOutcome> {
        if !self.lock.try_acquire(self.provider.id).await? {
            info!(
                provider = %self.provider.name,
                "A sync is already running for this provider"
            );
            return Ok(SyncRunOutcome::AlreadyRunning);
        }

        let result = self.run_discovery().await;

        if let Err(e) = self.lock.release(self.provider.id).await {
            warn!(provider = %self.provider.name, error = %e, "Failed to release sync lock");
        }

        result.map(SyncRunOutcome::Completed)
    }

    async fn run_discovery(&self) -> SyncResult<SyncTask> {
        let mut task = SyncTask::new(self.provider.id, TaskKind::Discover);
        task.start();
        self.tasks.insert(&task).await?;

        let outcome = async {
            let users = self.clients.users.discover().await?;
            let groups = self.clients.groups.discover().await?;
            Ok::<(u64, u64), SyncError>((users, groups))
        }
        .await;

        match outcome {
            Ok((users, groups)) => {
                task.add_message(format!("Linked {users} users and {groups} groups"));
                task.finish(false);
            }
            Err(e) => {
                task.add_message(e.to_string());
                task.finish(e.is_fatal());
            }
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    /// Per-provider status for the API layer.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            is_running: self.lock.is_held(self.provider.id).await?,
            last_task: self
                .tasks
                .last_finished(self.provider.id, TaskKind::FullSync)
                .await?,
        })
    }

    /// Manually resync one object through create/update, bypassing the
    /// full-sync lock but keeping the diff/idempotence logic.
    /// `dry_run_override` replaces the provider's dry-run flag for
    /// this call only.  Returns the accumulated messages.
    pub async fn sync_single(
        &self,
        obj: ObjectRef,
        dry_run_override: Option<bool>,
    ) -> SyncResult<Vec<String>> {
        let clients = match dry_run_override {
            // The shared clients already carry the provider's setting.
            None => None,
            Some(_) => Some(ScimClients::new(
                self.provider.clone(),
                self.connections.clone(),
                self.directory.clone(),
                dry_run_override,
            )?),
        };
        let clients: &ScimClients = clients.as_ref().unwrap_or(&*self.clients);

        let mut messages = Vec::new();

        let object = match obj.kind {
            EntityKind::User => self.directory.get_user(obj.id).await?.map(LocalObject::User),
            EntityKind::Group => self
                .directory
                .get_group(obj.id)
                .await?
                .map(LocalObject::Group),
        };
        let Some(object) = object else {
            messages.push(format!("Object {obj} not found"));
            return Ok(messages);
        };

        let label = row_label(&object);
        match clients.client_for(object.kind()).write(&object).await {
            Ok(WriteOutcome::Created(connection)) => {
                messages.push(format!(
                    "Created {label} (external id {})",
                    connection.external_id
                ));
            }
            Ok(WriteOutcome::Updated) => messages.push(format!("Updated {label}")),
            Ok(WriteOutcome::Unchanged) => {
                messages.push(format!("{label} is already up to date"));
            }
            Err(SyncError::SkipObject) => {
                messages.push(format!("{label} skipped by property mapping"));
            }
            Err(e @ SyncError::DryRun { .. }) => messages.push(format!("{label}: {e}")),
            Err(SyncError::Store(e)) => return Err(SyncError::Store(e)),
            Err(e) => messages.push(format!("Failed to sync {label}: {e}")),
        }

        Ok(messages)
    }

    /// Purge finished task records past the provider's retention.
    pub async fn purge_tasks(&self) -> SyncResult<u64> {
        let cutoff = Utc::now() - Duration::days(self.provider.task_retention_days);
        let purged = self
            .tasks
            .purge_finished_before(self.provider.id, cutoff)
            .await?;
        if purged > 0 {
            debug!(provider = %self.provider.name, purged, "Purged old sync tasks");
        }
        Ok(purged)
    }
}

fn row_label(object: &LocalObject) -> String {
    match object {
        LocalObject::User(user) => format!("user {}", user.username),
        LocalObject::Group(group) => format!("group {}", group.name),
    }
}
