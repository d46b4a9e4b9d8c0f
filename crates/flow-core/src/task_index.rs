//! Shared `parent_job_id -> task_id` cache.
//!
//! The queue backend only ever hands `StepWorker`/`ParentOrchestrator` a
//! `parent_job_id` (`Job::parent_job_id`, `claim_ready_parent`'s return
//! value); recovering the task id they need for `TaskMirror` writes means
//! either keeping every submission in memory or asking the store. `TaskEnqueuer`
//! populates this cache as it submits flows; a process that claims a job
//! without having seen the enqueue (a worker restart, a second worker
//! process) falls back to `TaskStore::get_by_parent_job_id` and backfills
//! the cache from there.

use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::OrchestratorError;
use crate::store::TaskStore;

pub type TaskIndex = Arc<DashMap<String, String>>;

pub async fn resolve_task_id<S: TaskStore>(
    index: &TaskIndex,
    task_store: &S,
    parent_job_id: &str,
) -> Result<String, OrchestratorError> {
    if let Some(task_id) = index.get(parent_job_id) {
        return Ok(task_id.clone());
    }
    let task = task_store
        .get_by_parent_job_id(parent_job_id)
        .await?
        .ok_or_else(|| OrchestratorError::Internal(format!("no task found for parent job {parent_job_id}")))?;
    index.insert(parent_job_id.to_string(), task.id.clone());
    Ok(task.id)
}
