//! Postgres (Diesel) implementation of `flow_core::store::TaskStore`.
//!
//! - Durable task boundary with parity to the in-memory test double used
//!   by `flow-core`'s own unit tests.
//! - `fetch_queued` is workspace-fair: it returns the oldest queued task
//!   per workspace before it returns any workspace's second-oldest, via
//!   a `row_number() OVER (PARTITION BY workspace_id ...)` window query
//!   (§4.6).
//! - All Diesel calls are synchronous; each is wrapped in
//!   `spawn_blocking` so `TaskStore`'s async contract holds without
//!   blocking the Tokio reactor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::sql_types::{BigInt, Text};
use flow_core::errors::OrchestratorError;
use flow_core::store::TaskStore;
use flow_domain::{Task, TaskKind, TaskPayload, TaskStatus};
use serde_json::Value;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{task_mirror_log, tasks};

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Abstracts connection checkout so tests can swap in a fake pool
/// without touching the `TaskStore` implementation itself.
pub trait ConnectionProvider: Send + Sync + Clone + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// `Queryable` backs DSL queries (`tasks::table.filter(...).first(...)`);
/// `QueryableByName` backs `fetch_queued`'s hand-written window-function
/// query, which Diesel's DSL has no ergonomic way to express.
#[derive(Queryable, QueryableByName, Debug)]
#[diesel(table_name = tasks)]
struct TaskRow {
    id: String,
    workspace_id: String,
    kind: String,
    status: String,
    payload: Value,
    result: Option<Value>,
    progress: f64,
    error_log: Option<String>,
    #[allow(dead_code)]
    parent_job_id: Option<String>,
    created_at: chrono::DateTime<Utc>,
    started_at: Option<chrono::DateTime<Utc>>,
    completed_at: Option<chrono::DateTime<Utc>>,
}

fn row_to_task(row: TaskRow) -> Result<Task, PersistenceError> {
    let kind = TaskKind::from_wire_id(&row.kind).map_err(|e| PersistenceError::Unknown(e.to_string()))?;
    let status = status_from_wire(&row.status)?;
    let payload: TaskPayload = serde_json::from_value(row.payload).map_err(|e| PersistenceError::Unknown(format!("payload deser: {e}")))?;
    Ok(Task {
        id: row.id,
        workspace_id: row.workspace_id,
        kind,
        status,
        payload,
        result: row.result,
        progress: row.progress,
        error_log: row.error_log,
        created_at: row.created_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}

fn status_wire(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn status_from_wire(s: &str) -> Result<TaskStatus, PersistenceError> {
    Ok(match s {
        "queued" => TaskStatus::Queued,
        "running" => TaskStatus::Running,
        "succeeded" => TaskStatus::Succeeded,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        other => return Err(PersistenceError::Unknown(format!("unknown task status: {other}"))),
    })
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTaskRow<'a> {
    id: &'a str,
    workspace_id: &'a str,
    kind: &'a str,
    status: &'a str,
    payload: Value,
}

pub struct PgTaskStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgTaskStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Inserts a brand-new `queued` task. Not part of `TaskStore` itself —
    /// task creation is owned by the external submission API (§6), not
    /// the engine — but every integration test needs a way to seed one.
    pub async fn create_task(&self, task: &Task) -> Result<(), OrchestratorError> {
        let provider = self.provider.clone();
        let payload = serde_json::to_value(&task.payload).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        let id = task.id.clone();
        let workspace_id = task.workspace_id.clone();
        let kind = task.kind.wire_id().to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            diesel::insert_into(tasks::table)
                .values(NewTaskRow { id: &id, workspace_id: &workspace_id, kind: &kind, status: "queued", payload })
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;
        Ok(())
    }
}

#[async_trait]
impl<P: ConnectionProvider> TaskStore for PgTaskStore<P> {
    async fn fetch_queued(&self, batch_size: usize) -> Result<Vec<Task>, OrchestratorError> {
        let provider = self.provider.clone();
        let rows: Vec<TaskRow> = tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            diesel::sql_query(
                "SELECT id, workspace_id, kind, status, payload, result, progress, error_log, \
                 parent_job_id, created_at, started_at, completed_at FROM ( \
                   SELECT *, row_number() OVER (PARTITION BY workspace_id ORDER BY created_at) AS rn \
                   FROM tasks WHERE status = 'queued' \
                 ) ranked ORDER BY rn, created_at LIMIT $1",
            )
            .bind::<BigInt, _>(batch_size as i64)
            .load::<TaskRow>(&mut conn)
            .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;

        rows.into_iter().map(|r| row_to_task(r).map_err(Into::into)).collect()
    }

    async fn mark_running(&self, task_id: &str) -> Result<bool, OrchestratorError> {
        let provider = self.provider.clone();
        let task_id = task_id.to_string();
        let updated: usize = tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            diesel::update(tasks::table.filter(tasks::id.eq(&task_id)).filter(tasks::status.eq("queued")))
                .set((tasks::status.eq("running"), tasks::started_at.eq(Utc::now())))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;
        Ok(updated > 0)
    }

    async fn revert_to_queued(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let provider = self.provider.clone();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            diesel::update(tasks::table.filter(tasks::id.eq(&task_id)))
                .set(tasks::status.eq("queued"))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;
        Ok(())
    }

    async fn mark_failed_before_submission(&self, task_id: &str, error_log: String) -> Result<(), OrchestratorError> {
        let provider = self.provider.clone();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            diesel::update(tasks::table.filter(tasks::id.eq(&task_id)))
                .set((tasks::status.eq("failed"), tasks::error_log.eq(error_log), tasks::completed_at.eq(Utc::now())))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;
        Ok(())
    }

    async fn set_parent_job_id(&self, task_id: &str, parent_job_id: &str) -> Result<(), OrchestratorError> {
        let provider = self.provider.clone();
        let task_id = task_id.to_string();
        let parent_job_id = parent_job_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            diesel::update(tasks::table.filter(tasks::id.eq(&task_id)))
                .set(tasks::parent_job_id.eq(parent_job_id))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;
        Ok(())
    }

    async fn set_progress(&self, task_id: &str, progress: f64) -> Result<(), OrchestratorError> {
        let provider = self.provider.clone();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            conn.build_transaction().read_write().run(|tx_conn| {
                diesel::update(tasks::table.filter(tasks::id.eq(&task_id)))
                    .set(tasks::progress.eq(progress))
                    .execute(tx_conn)?;
                diesel::sql_query("INSERT INTO task_mirror_log (task_id, progress) VALUES ($1, $2)")
                    .bind::<Text, _>(&task_id)
                    .bind::<diesel::sql_types::Double, _>(progress)
                    .execute(tx_conn)
                    .map(|_| ())
            })
            .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;
        Ok(())
    }

    async fn set_terminal(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error_log: Option<String>,
    ) -> Result<(), OrchestratorError> {
        #[derive(Debug)]
        enum Outcome {
            Written,
            AlreadyMatching,
            Conflict,
        }

        let provider = self.provider.clone();
        let task_id_owned = task_id.to_string();
        let status_wire_str = status_wire(status).to_string();
        let outcome: Outcome = tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            conn.build_transaction().read_write().run(|tx_conn| {
                let current: String =
                    tasks::table.filter(tasks::id.eq(&task_id_owned)).select(tasks::status).first(tx_conn)?;
                if current == status_wire_str {
                    return Ok(Outcome::AlreadyMatching);
                }
                let currently_terminal = matches!(current.as_str(), "succeeded" | "failed" | "cancelled");
                if currently_terminal {
                    return Ok(Outcome::Conflict);
                }
                diesel::update(tasks::table.filter(tasks::id.eq(&task_id_owned)))
                    .set((
                        tasks::status.eq(&status_wire_str),
                        tasks::result.eq(result),
                        tasks::error_log.eq(error_log),
                        tasks::completed_at.eq(Utc::now()),
                    ))
                    .execute(tx_conn)?;
                Ok(Outcome::Written)
            })
            .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;

        match outcome {
            Outcome::Written | Outcome::AlreadyMatching => Ok(()),
            Outcome::Conflict => Err(OrchestratorError::TerminalConflict(task_id.to_string())),
        }
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>, OrchestratorError> {
        let provider = self.provider.clone();
        let task_id = task_id.to_string();
        let row: Option<TaskRow> = tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            tasks::table
                .filter(tasks::id.eq(&task_id))
                .first::<TaskRow>(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;

        row.map(row_to_task).transpose().map_err(Into::into)
    }

    async fn get_by_parent_job_id(&self, parent_job_id: &str) -> Result<Option<Task>, OrchestratorError> {
        let provider = self.provider.clone();
        let parent_job_id = parent_job_id.to_string();
        let row: Option<TaskRow> = tokio::task::spawn_blocking(move || {
            let mut conn = provider.connection()?;
            tasks::table
                .filter(tasks::parent_job_id.eq(&parent_job_id))
                .first::<TaskRow>(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })
        .await
        .map_err(|e| OrchestratorError::Internal(format!("join error: {e}")))??;

        row.map(row_to_task).transpose().map_err(Into::into)
    }
}

/// Builds an r2d2 pool and runs pending migrations against it, per
/// §11.3. Mirrors the sizing clamp the teacher's own pool builder used.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let min_size = min_size.max(1);
    let max_size = max_size.max(1);
    let min_size = min_size.min(max_size);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(min_size))
        .max_size(max_size)
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

/// Convenience constructor used by `flow-infra`'s wiring code and tests.
pub fn task_store_from_env() -> Result<Arc<PgTaskStore<PoolProvider>>, PersistenceError> {
    let pool = build_dev_pool_from_env()?;
    Ok(Arc::new(PgTaskStore::new(PoolProvider { pool })))
}
