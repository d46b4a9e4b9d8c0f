//! Task Mirror (C7): write-through layer reflecting step/task state into
//! the persistence store, with coalesced progress writes and idempotent
//! terminal-state writes (§4.7).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flow_domain::{StepResult, TaskStatus};

use crate::errors::OrchestratorError;
use crate::queue::QueueBackend;
use crate::store::TaskStore;

/// Overall progress is the rounded mean of per-step progress (§4.7, §8
/// point 7); the live indicator is the most recent child's own progress.
pub fn aggregate_progress(step_progresses: &[f64]) -> f64 {
    if step_progresses.is_empty() {
        return 0.0;
    }
    let sum: f64 = step_progresses.iter().map(|p| p.clamp(0.0, 100.0)).sum();
    let mean = sum / step_progresses.len() as f64;
    (mean * 100.0).round() / 100.0
}

pub struct TaskMirror<S: TaskStore + 'static> {
    store: Arc<S>,
    debounce_ms: u64,
    pending: DashMap<String, tokio::task::JoinHandle<()>>,
    last_progress: DashMap<String, f64>,
}

impl<S: TaskStore + 'static> TaskMirror<S> {
    pub fn new(store: Arc<S>, debounce_ms: u64) -> Self {
        Self { store, debounce_ms, pending: DashMap::new(), last_progress: DashMap::new() }
    }

    pub async fn set_running(&self, task_id: &str) -> Result<(), OrchestratorError> {
        if let Some(task) = self.store.get(task_id).await? {
            if task.status == TaskStatus::Running {
                return Ok(());
            }
        }
        retrying(|| self.store.mark_running(task_id)).await.map(|_| ())
    }

    /// Coalesced: if multiple updates arrive within `debounce_ms`, only the
    /// last is flushed; values are clamped and applied with `max(seen,
    /// incoming)` so out-of-order delivery never regresses progress.
    pub fn set_progress(self: &Arc<Self>, task_id: String, pct: f64) {
        let clamped = pct.clamp(0.0, 100.0);
        let merged = self
            .last_progress
            .entry(task_id.clone())
            .and_modify(|seen| *seen = seen.max(clamped))
            .or_insert(clamped)
            .to_owned();

        if let Some(prev) = self.pending.get(&task_id) {
            prev.abort();
        }
        let this = Arc::clone(self);
        let debounce = Duration::from_millis(self.debounce_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = retrying(|| this.store.set_progress(&task_id, merged)).await;
            this.pending.remove(&task_id);
        });
        self.pending.insert(task_id, handle);
    }

    pub async fn set_terminal(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error_log: Option<String>,
    ) -> Result<(), OrchestratorError> {
        match retrying(|| self.store.set_terminal(task_id, status, result.clone(), error_log.clone())).await {
            Ok(()) => Ok(()),
            Err(OrchestratorError::TerminalConflict(id)) => {
                // Aggregation conflict: log and leave the store as-is; the
                // backend's child-values remain authoritative (§7).
                tracing::warn!(task_id = %id, "terminal conflict, leaving store state unchanged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-derives a task's terminal state purely from the queue backend's
    /// child-values view and replays it idempotently (§12 supplement).
    pub async fn reconcile<Q: QueueBackend>(
        &self,
        task_id: &str,
        parent_job_id: &str,
        backend: &Q,
    ) -> Result<(), OrchestratorError> {
        let all = backend.get_all_children(parent_job_id).await?;
        if !all.values().all(|r| r.is_terminal()) {
            return Ok(());
        }
        let failed: Vec<&StepResult> = all.values().filter(|r| r.is_failure()).collect();
        if failed.is_empty() {
            let task_kind = self.store.get(task_id).await?.map(|t| t.kind);
            let result = crate::orchestrator::aggregate_success(task_kind, &all);
            self.store.set_progress(task_id, 100.0).await?;
            self.set_terminal(task_id, TaskStatus::Succeeded, Some(result), None).await
        } else {
            let error_log = failed.iter().filter_map(|r| r.error.clone()).collect::<Vec<_>>().join("; ");
            let partial = crate::orchestrator::aggregate_partial(&all);
            self.set_terminal(task_id, TaskStatus::Failed, Some(partial), Some(error_log)).await
        }
    }
}

async fn retrying<F, Fut, T>(mut f: F) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
{
    let max_attempts = crate::constants::TASK_MIRROR_MAX_RETRY_ATTEMPTS;
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(OrchestratorError::TerminalConflict(id)) => return Err(OrchestratorError::TerminalConflict(id)),
            Err(e) if attempt + 1 < max_attempts => {
                attempt += 1;
                let delay = (crate::constants::TASK_MIRROR_MAX_RETRY_DELAY_MS / max_attempts as u64) * attempt as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_progress_matches_scenario_6() {
        assert_eq!(aggregate_progress(&[100.0, 100.0, 40.0]), 80.0);
        assert_eq!(aggregate_progress(&[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(aggregate_progress(&[100.0, 100.0, 100.0]), 100.0);
    }
}
