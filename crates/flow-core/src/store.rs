//! The task submission boundary (§6): the schema the engine consumes from
//! the external persistence store, expressed as a trait so `flow-store`'s
//! Postgres implementation and test doubles share one contract.

use async_trait::async_trait;
use flow_domain::{Task, TaskStatus};

use crate::errors::OrchestratorError;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Up to `batch_size` `queued` tasks, oldest first, workspace-fair
    /// (round-robin by `workspace_id`) per §4.6.
    async fn fetch_queued(&self, batch_size: usize) -> Result<Vec<Task>, OrchestratorError>;

    /// Conditional `queued -> running` transition; `Ok(false)` means the
    /// race was lost (another enqueuer already claimed it).
    async fn mark_running(&self, task_id: &str) -> Result<bool, OrchestratorError>;

    async fn revert_to_queued(&self, task_id: &str) -> Result<(), OrchestratorError>;

    async fn mark_failed_before_submission(&self, task_id: &str, error_log: String) -> Result<(), OrchestratorError>;

    async fn set_parent_job_id(&self, task_id: &str, parent_job_id: &str) -> Result<(), OrchestratorError>;

    /// Reverse lookup used by the worker and parent-orchestrator loops to
    /// recover a task id from the queue backend's `parent_job_id` (the
    /// only handle `QueueBackend::claim`/`claim_ready_parent` return).
    async fn get_by_parent_job_id(&self, parent_job_id: &str) -> Result<Option<Task>, OrchestratorError>;

    async fn set_progress(&self, task_id: &str, progress: f64) -> Result<(), OrchestratorError>;

    /// Idempotent on terminal status: a second call with an identical
    /// status is a no-op; a second call with a conflicting status must
    /// fail with `OrchestratorError::TerminalConflict`.
    async fn set_terminal(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error_log: Option<String>,
    ) -> Result<(), OrchestratorError>;

    async fn get(&self, task_id: &str) -> Result<Option<Task>, OrchestratorError>;
}
