//! Postgres-backed store implementations (feature `postgres`).
//!
//! Connections and task records are plain tables written with raw
//! `sqlx` queries; the provider-keyed sync lock is a Postgres advisory
//! lock, which gives non-blocking try-acquire semantics across engine
//! instances sharing the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use warden_core::EntityKind;

use crate::connection::{Connection, ConnectionStore, NewConnection};
use crate::error::{StoreError, StoreResult};
use crate::lock::SyncLock;
use crate::task::{SyncTask, TaskKind, TaskStatus, TaskStore};

/// Advisory lock namespace for provider sync locks.
const SYNC_LOCK_NAMESPACE: i32 = 73_001;

/// Create the engine's tables if they do not exist yet.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS warden_connections (
            id UUID PRIMARY KEY,
            provider_id UUID NOT NULL,
            kind TEXT NOT NULL,
            local_id UUID NOT NULL,
            external_id TEXT NOT NULL,
            attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (provider_id, kind, local_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS warden_sync_tasks (
            id UUID PRIMARY KEY,
            provider_id UUID NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            messages JSONB NOT NULL DEFAULT '[]'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn kind_to_str(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "user",
        EntityKind::Group => "group",
    }
}

fn kind_from_str(s: &str) -> StoreResult<EntityKind> {
    match s {
        "user" => Ok(EntityKind::User),
        "group" => Ok(EntityKind::Group),
        other => Err(StoreError::backend(format!("unknown entity kind '{other}'"))),
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct ConnectionRow {
    id: Uuid,
    provider_id: Uuid,
    kind: String,
    local_id: Uuid,
    external_id: String,
    attributes: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConnectionRow {
    fn into_connection(self) -> StoreResult<Connection> {
        Ok(Connection {
            id: self.id,
            provider_id: self.provider_id,
            kind: kind_from_str(&self.kind)?,
            local_id: self.local_id,
            external_id: self.external_id,
            attributes: self.attributes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Connection store over `warden_connections`.
#[derive(Debug, Clone)]
pub struct PgConnectionStore {
    pool: PgPool,
}

impl PgConnectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn get(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_id: Uuid,
    ) -> StoreResult<Option<Connection>> {
        let row: Option<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT * FROM warden_connections
            WHERE provider_id = $1 AND kind = $2 AND local_id = $3
            "#,
        )
        .bind(provider_id)
        .bind(kind_to_str(kind))
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConnectionRow::into_connection).transpose()
    }

    async fn get_many(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_ids: &[Uuid],
    ) -> StoreResult<Vec<Connection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT * FROM warden_connections
            WHERE provider_id = $1 AND kind = $2 AND local_id = ANY($3)
            ORDER BY local_id
            "#,
        )
        .bind(provider_id)
        .bind(kind_to_str(kind))
        .bind(local_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(ConnectionRow::into_connection)
            .collect()
    }

    async fn link(&self, new: NewConnection) -> StoreResult<Connection> {
        // INSERT ... ON CONFLICT DO NOTHING, then re-fetch on conflict,
        // so repeated linkers observe the original row.
        let inserted: Option<ConnectionRow> = sqlx::query_as(
            r#"
            INSERT INTO warden_connections
                (id, provider_id, kind, local_id, external_id, attributes)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (provider_id, kind, local_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.provider_id)
        .bind(kind_to_str(new.kind))
        .bind(new.local_id)
        .bind(&new.external_id)
        .bind(&new.attributes)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return row.into_connection();
        }

        let existing: ConnectionRow = sqlx::query_as(
            r#"
            SELECT * FROM warden_connections
            WHERE provider_id = $1 AND kind = $2 AND local_id = $3
            "#,
        )
        .bind(new.provider_id)
        .bind(kind_to_str(new.kind))
        .bind(new.local_id)
        .fetch_one(&self.pool)
        .await?;

        existing.into_connection()
    }

    async fn update_snapshot(
        &self,
        connection_id: Uuid,
        attributes: serde_json::Value,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE warden_connections
            SET attributes = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(connection_id)
        .bind(&attributes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("connection {connection_id}")));
        }
        Ok(())
    }

    async fn unlink(
        &self,
        provider_id: Uuid,
        kind: EntityKind,
        local_id: Uuid,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM warden_connections
            WHERE provider_id = $1 AND kind = $2 AND local_id = $3
            "#,
        )
        .bind(provider_id)
        .bind(kind_to_str(kind))
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    provider_id: Uuid,
    kind: String,
    status: String,
    messages: serde_json::Value,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

fn task_kind_to_str(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::FullSync => "full_sync",
        TaskKind::SyncObject => "sync_object",
        TaskKind::SyncMembership => "sync_membership",
        TaskKind::Discover => "discover",
    }
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Successful => "successful",
        TaskStatus::Warning => "warning",
        TaskStatus::Error => "error",
    }
}

impl TaskRow {
    fn into_task(self) -> StoreResult<SyncTask> {
        let kind = match self.kind.as_str() {
            "full_sync" => TaskKind::FullSync,
            "sync_object" => TaskKind::SyncObject,
            "sync_membership" => TaskKind::SyncMembership,
            "discover" => TaskKind::Discover,
            other => {
                return Err(StoreError::backend(format!("unknown task kind '{other}'")))
            }
        };
        let status = match self.status.as_str() {
            "pending" => TaskStatus::Pending,
            "running" => TaskStatus::Running,
            "successful" => TaskStatus::Successful,
            "warning" => TaskStatus::Warning,
            "error" => TaskStatus::Error,
            other => {
                return Err(StoreError::backend(format!(
                    "unknown task status '{other}'"
                )))
            }
        };
        let messages: Vec<String> = serde_json::from_value(self.messages)
            .map_err(|e| StoreError::backend_with_source("invalid task messages", e))?;

        Ok(SyncTask {
            id: self.id,
            provider_id: self.provider_id,
            kind,
            status,
            messages,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

/// Task store over `warden_sync_tasks`.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, task: &SyncTask) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO warden_sync_tasks
                (id, provider_id, kind, status, messages, created_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(task.id)
        .bind(task.provider_id)
        .bind(task_kind_to_str(task.kind))
        .bind(task_status_to_str(task.status))
        .bind(serde_json::json!(task.messages))
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, task: &SyncTask) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE warden_sync_tasks
            SET status = $2, messages = $3, started_at = $4, finished_at = $5
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(task_status_to_str(task.status))
        .bind(serde_json::json!(task.messages))
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<SyncTask>> {
        let row: Option<TaskRow> =
            sqlx::query_as("SELECT * FROM warden_sync_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn last_finished(
        &self,
        provider_id: Uuid,
        kind: TaskKind,
    ) -> StoreResult<Option<SyncTask>> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT * FROM warden_sync_tasks
            WHERE provider_id = $1 AND kind = $2 AND finished_at IS NOT NULL
            ORDER BY finished_at DESC
            LIMIT 1
            "#,
        )
        .bind(provider_id)
        .bind(task_kind_to_str(kind))
        .fetch_optional(&self.pool)
        .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn purge_finished_before(
        &self,
        provider_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM warden_sync_tasks
            WHERE provider_id = $1 AND finished_at IS NOT NULL AND finished_at < $2
            "#,
        )
        .bind(provider_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Sync lock
// ---------------------------------------------------------------------------

/// Provider-keyed advisory lock.
///
/// Non-blocking by construction: `pg_try_advisory_lock` returns
/// immediately whether or not the lock was obtained.
#[derive(Debug, Clone)]
pub struct PgSyncLock {
    pool: PgPool,
}

impl PgSyncLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Derive a 32-bit lock key from the first 4 bytes of the provider
/// UUID.  The two-key advisory lock form takes int4 pairs.
fn provider_lock_key(provider_id: Uuid) -> i32 {
    let bytes = provider_id.as_bytes();
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[async_trait]
impl SyncLock for PgSyncLock {
    async fn try_acquire(&self, provider_id: Uuid) -> StoreResult<bool> {
        let key = provider_lock_key(provider_id);
        let result: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1, $2)")
            .bind(SYNC_LOCK_NAMESPACE)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

        debug!(
            provider_id = %provider_id,
            acquired = result.0,
            "Tried provider sync lock"
        );
        Ok(result.0)
    }

    async fn release(&self, provider_id: Uuid) -> StoreResult<()> {
        let key = provider_lock_key(provider_id);
        let _: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1, $2)")
            .bind(SYNC_LOCK_NAMESPACE)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_held(&self, provider_id: Uuid) -> StoreResult<bool> {
        let key = provider_lock_key(provider_id);
        let result: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_locks
                WHERE locktype = 'advisory'
                  AND classid::int = $1
                  AND objid::int = $2
            )
            "#,
        )
        .bind(SYNC_LOCK_NAMESPACE)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_stable() {
        let id = Uuid::new_v4();
        assert_eq!(provider_lock_key(id), provider_lock_key(id));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [EntityKind::User, EntityKind::Group] {
            assert_eq!(kind_from_str(kind_to_str(kind)).unwrap(), kind);
        }
        assert!(kind_from_str("device").is_err());
    }
}
