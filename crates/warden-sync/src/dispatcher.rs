//! Change dispatcher: turns local lifecycle events into incremental
//! sync work.
//!
//! Each dispatched unit re-checks applicability right before touching
//! the remote system: an object that left the provider's scope between
//! event-fire and task-run time is silently ignored.  Units run on a
//! bounded tokio pool and record their outcome in a sync task record.

use std::sync::Arc;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warden_core::{ChangeEvent, Direction, LocalObject};
use warden_store::{Directory, Provider, SyncTask, TaskKind, TaskStore};

use crate::client::{SyncClient, WriteOutcome};
use crate::error::{SyncError, SyncResult};
use crate::scim::ScimClients;

/// Default number of concurrently running incremental sync units.
const DEFAULT_CONCURRENCY: usize = 4;

/// Subscribes to change events and runs incremental syncs for one
/// provider.
pub struct ChangeDispatcher {
    provider: Arc<Provider>,
    directory: Arc<dyn Directory>,
    tasks: Arc<dyn TaskStore>,
    clients: Arc<ScimClients>,
    semaphore: Arc<Semaphore>,
}

impl ChangeDispatcher {
    pub fn new(
        provider: Arc<Provider>,
        directory: Arc<dyn Directory>,
        tasks: Arc<dyn TaskStore>,
        clients: Arc<ScimClients>,
    ) -> Self {
        Self::with_concurrency(provider, directory, tasks, clients, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(
        provider: Arc<Provider>,
        directory: Arc<dyn Directory>,
        tasks: Arc<dyn TaskStore>,
        clients: Arc<ScimClients>,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            directory,
            tasks,
            clients,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Consume events from the bus until it closes.  Each event runs
    /// as its own tokio task, bounded by the dispatcher's pool size.
    pub fn spawn(self: Arc<Self>, mut rx: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(provider = %self.provider.name, "Change dispatcher started");
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Change dispatcher lagged, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let permit = match self.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.handle_event(event).await {
                        warn!(error = %e, "Incremental sync unit failed");
                    }
                    drop(permit);
                });
            }
            info!(provider = %self.provider.name, "Change dispatcher stopped");
        })
    }

    /// Run one event synchronously.  Returns the finished task record.
    pub async fn handle_event(&self, event: ChangeEvent) -> SyncResult<SyncTask> {
        match event {
            ChangeEvent::Created { object } | ChangeEvent::Updated { object } => {
                self.sync_object(object, Direction::Add).await
            }
            ChangeEvent::PreDelete { object } => self.sync_object(object, Direction::Remove).await,
            ChangeEvent::MembershipChanged {
                group_id,
                direction,
                members,
            } => {
                let mut task = SyncTask::new(self.provider.id, TaskKind::SyncMembership);
                task.start();
                self.tasks.insert(&task).await?;

                let result = self
                    .run_membership(group_id, direction, &members, &mut task)
                    .await;
                self.finish(task, result).await
            }
        }
    }

    async fn sync_object(
        &self,
        object: LocalObject,
        direction: Direction,
    ) -> SyncResult<SyncTask> {
        let mut task = SyncTask::new(self.provider.id, TaskKind::SyncObject);
        task.start();
        self.tasks.insert(&task).await?;

        let result = self.run_object(&object, direction, &mut task).await;
        self.finish(task, result).await
    }

    async fn finish(
        &self,
        mut task: SyncTask,
        result: SyncResult<()>,
    ) -> SyncResult<SyncTask> {
        match result {
            Ok(()) => task.finish(false),
            Err(e) => {
                task.add_message(e.to_string());
                task.finish(true);
            }
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    async fn run_object(
        &self,
        object: &LocalObject,
        direction: Direction,
        task: &mut SyncTask,
    ) -> SyncResult<()> {
        match direction {
            Direction::Add => {
                // Re-read the object so the sync sees current state,
                // not the state at event time.
                let current = match object {
                    LocalObject::User(user) => self
                        .directory
                        .get_user(user.id)
                        .await?
                        .map(LocalObject::User),
                    LocalObject::Group(group) => self
                        .directory
                        .get_group(group.id)
                        .await?
                        .map(LocalObject::Group),
                };
                let Some(current) = current else {
                    debug!(object = %object.object_ref(), "Object vanished before sync, ignoring");
                    return Ok(());
                };

                if !self.in_scope(&current).await? {
                    debug!(object = %current.object_ref(), "Object out of provider scope, ignoring");
                    return Ok(());
                }

                let client = self.clients.client_for(current.kind());
                match client.write(&current).await {
                    Ok(WriteOutcome::Created(_)) => {
                        debug!(object = %current.object_ref(), "Incremental sync created object");
                        Ok(())
                    }
                    Ok(WriteOutcome::Updated) | Ok(WriteOutcome::Unchanged) => Ok(()),
                    Err(e) => self.record_row_error(e, task),
                }
            }
            Direction::Remove => {
                // The local row may already be gone; operate off the
                // event snapshot.
                let client = self.clients.client_for(object.kind());
                match client.delete(object.object_ref()).await {
                    Ok(()) => Ok(()),
                    Err(e) => self.record_row_error(e, task),
                }
            }
        }
    }

    async fn run_membership(
        &self,
        group_id: uuid::Uuid,
        direction: Direction,
        members: &std::collections::BTreeSet<uuid::Uuid>,
        task: &mut SyncTask,
    ) -> SyncResult<()> {
        let Some(group) = self.directory.get_group(group_id).await? else {
            debug!(group_id = %group_id, "Group vanished before membership sync, ignoring");
            return Ok(());
        };
        if !self.provider.group_in_scope(&group) {
            debug!(group = %group.name, "Group out of provider scope, ignoring");
            return Ok(());
        }

        match self
            .clients
            .groups
            .update_membership(group_id, direction, members)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => self.record_row_error(e, task),
        }
    }

    async fn in_scope(&self, object: &LocalObject) -> SyncResult<bool> {
        Ok(match object {
            LocalObject::User(user) => {
                self.provider
                    .user_in_scope(user, self.directory.as_ref())
                    .await?
            }
            LocalObject::Group(group) => self.provider.group_in_scope(group),
        })
    }

    /// Apply the row-level propagation policy: benign outcomes and
    /// row-level failures become messages; only fatal errors unwind.
    fn record_row_error(&self, error: SyncError, task: &mut SyncTask) -> SyncResult<()> {
        match error {
            e if e.is_fatal() => Err(e),
            SyncError::SkipObject => {
                debug!("Object skipped by property mapping");
                Ok(())
            }
            e @ SyncError::DryRun { .. } => {
                task.add_message(e.to_string());
                Ok(())
            }
            e => {
                warn!(error = %e, "Incremental sync failed for object");
                task.add_message(e.to_string());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ChangeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDispatcher")
            .field("provider", &self.provider.name)
            .finish_non_exhaustive()
    }
}
