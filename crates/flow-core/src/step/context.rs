use std::collections::HashMap;
use std::sync::Arc;

use flow_domain::StepKind;
use tokio::sync::mpsc::UnboundedSender;

/// Context a `StepHandler` is invoked with (§4.3). Provides the identifiers
/// needed for idempotent re-execution, a progress channel, and read-only
/// access to completed upstream outputs.
pub struct StepContext {
    pub job_id: String,
    pub task_id: String,
    pub workspace_id: String,
    pub attempt_number: u32,
    upstream_outputs: Arc<HashMap<StepKind, serde_json::Value>>,
    progress_tx: UnboundedSender<(String, f64)>,
}

impl StepContext {
    pub fn new(
        job_id: impl Into<String>,
        task_id: impl Into<String>,
        workspace_id: impl Into<String>,
        attempt_number: u32,
        upstream_outputs: HashMap<StepKind, serde_json::Value>,
        progress_tx: UnboundedSender<(String, f64)>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            task_id: task_id.into(),
            workspace_id: workspace_id.into(),
            attempt_number,
            upstream_outputs: Arc::new(upstream_outputs),
            progress_tx,
        }
    }

    /// Output of a completed upstream step, or `None` if it hasn't
    /// completed (or doesn't exist in this plan).
    pub fn upstream(&self, step_kind: StepKind) -> Option<&serde_json::Value> {
        self.upstream_outputs.get(&step_kind)
    }

    /// Streams a progress percentage, clamped to `[0, 100]`. Best-effort:
    /// a closed channel (worker already moved on) is silently dropped.
    pub fn progress(&self, pct: f64) {
        let clamped = pct.clamp(0.0, 100.0);
        let _ = self.progress_tx.send((self.job_id.clone(), clamped));
    }
}
