//! Parent Orchestrator (C4): a read-only aggregator over the backend's
//! child-values view. Never re-enqueues children, never mutates
//! `stepResults` (§4.4).

use std::collections::HashMap;
use std::sync::Arc;

use flow_domain::{StepKind, TaskKind, TaskStatus};
use tracing::{info, instrument};

use crate::errors::OrchestratorError;
use crate::mirror::TaskMirror;
use crate::queue::QueueBackend;
use crate::store::TaskStore;
use crate::task_index::{self, TaskIndex};

pub struct ParentOrchestrator<Q: QueueBackend, S: TaskStore + 'static> {
    backend: Arc<Q>,
    mirror: Arc<TaskMirror<S>>,
    task_store: Arc<S>,
    task_index: TaskIndex,
}

impl<Q: QueueBackend, S: TaskStore + 'static> ParentOrchestrator<Q, S> {
    pub fn new(backend: Arc<Q>, mirror: Arc<TaskMirror<S>>, task_store: Arc<S>, task_index: TaskIndex) -> Self {
        Self { backend, mirror, task_store, task_index }
    }

    /// Runs forever, waking once per ready parent job.
    pub async fn run(&self) -> Result<(), OrchestratorError> {
        loop {
            let parent_job_id = self.backend.claim_ready_parent().await?;
            let task_id = match task_index::resolve_task_id(&self.task_index, self.task_store.as_ref(), &parent_job_id).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(%parent_job_id, error = %e, "could not resolve task id for ready parent job");
                    continue;
                }
            };
            if let Err(e) = self.settle(&task_id, &parent_job_id).await {
                tracing::error!(%task_id, error = %e, "failed to settle parent job");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn settle(&self, task_id: &str, parent_job_id: &str) -> Result<(), OrchestratorError> {
        let all = self.backend.get_all_children(parent_job_id).await?;
        let failed: Vec<_> = all.values().filter(|r| r.is_failure()).collect();

        if failed.is_empty() {
            let task_kind = self.task_store.get(task_id).await?.map(|t| t.kind);
            let result = aggregate_success(task_kind, &all);
            // Force progress=100 on the store directly rather than through the
            // debounced side channel: that channel only coalesces toward the
            // max it has seen and isn't ordered against the terminal write.
            self.task_store.set_progress(task_id, 100.0).await?;
            info!(%task_id, "task succeeded");
            self.mirror.set_terminal(task_id, TaskStatus::Succeeded, Some(result), None).await?;
        } else {
            let error_log = failed.iter().filter_map(|r| r.error.clone()).collect::<Vec<_>>().join("; ");
            let partial = aggregate_partial(&all);
            info!(%task_id, error_log, "task failed");
            self.mirror.set_terminal(task_id, TaskStatus::Failed, Some(partial), Some(error_log)).await?;
        }
        Ok(())
    }
}

/// §4.4 step 4's "kind-specific aggregation": every kind gets the generic
/// `steps` map, and `PROCESS_UPLOAD`/`FULL_INGEST` additionally surface
/// `mediaId` at the top level, lifted out of `transcode:transcode`'s output
/// (per §8 scenario 1) since that's the only place the transcode handler
/// puts it. Shared with `TaskMirror::reconcile`, which re-derives the same
/// terminal state from the same child-values view.
pub(crate) fn aggregate_success(
    task_kind: Option<TaskKind>,
    all: &HashMap<flow_domain::StepKind, flow_domain::StepResult>,
) -> serde_json::Value {
    let steps: HashMap<&str, &serde_json::Value> =
        all.iter().filter_map(|(k, v)| v.output.as_ref().map(|o| (k.wire_id(), o))).collect();
    let mut result = serde_json::json!({ "steps": steps });

    if matches!(task_kind, Some(TaskKind::ProcessUpload) | Some(TaskKind::FullIngest)) {
        if let Some(media_id) = all.get(&StepKind::TranscodeTranscode).and_then(|r| r.output.as_ref()).and_then(|o| o.get("mediaId")) {
            result["mediaId"] = media_id.clone();
        }
    }

    result
}

pub(crate) fn aggregate_partial(all: &HashMap<flow_domain::StepKind, flow_domain::StepResult>) -> serde_json::Value {
    let steps: HashMap<&str, &serde_json::Value> =
        all.iter().filter(|(_, v)| v.is_completed()).filter_map(|(k, v)| v.output.as_ref().map(|o| (k.wire_id(), o))).collect();
    serde_json::json!({ "steps": steps, "partial": true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flow_domain::StepResult;

    fn completed(kind: StepKind, output: serde_json::Value) -> StepResult {
        StepResult::completed(kind, output, Utc::now())
    }

    #[test]
    fn process_upload_success_surfaces_media_id_at_top_level() {
        let mut all = HashMap::new();
        all.insert(StepKind::TranscodeProbe, completed(StepKind::TranscodeProbe, serde_json::json!({"durationSec": 10})));
        all.insert(
            StepKind::TranscodeTranscode,
            completed(StepKind::TranscodeTranscode, serde_json::json!({"path": "p", "mediaId": "media_abc"})),
        );

        let result = aggregate_success(Some(TaskKind::ProcessUpload), &all);
        assert_eq!(result["mediaId"], "media_abc");
        assert_eq!(result["steps"]["transcode:transcode"]["mediaId"], "media_abc");
    }

    #[test]
    fn full_ingest_success_also_surfaces_media_id() {
        let mut all = HashMap::new();
        all.insert(
            StepKind::TranscodeTranscode,
            completed(StepKind::TranscodeTranscode, serde_json::json!({"mediaId": "media_xyz"})),
        );
        let result = aggregate_success(Some(TaskKind::FullIngest), &all);
        assert_eq!(result["mediaId"], "media_xyz");
    }

    #[test]
    fn detect_labels_success_has_no_media_id() {
        let mut all = HashMap::new();
        all.insert(
            StepKind::LabelsUploadToGcs,
            completed(StepKind::LabelsUploadToGcs, serde_json::json!({"gcsUri": "gs://x"})),
        );
        let result = aggregate_success(Some(TaskKind::DetectLabels), &all);
        assert!(result.get("mediaId").is_none());
    }

    #[test]
    fn process_upload_without_a_transcode_step_has_no_media_id() {
        let mut all = HashMap::new();
        all.insert(StepKind::TranscodeProbe, completed(StepKind::TranscodeProbe, serde_json::json!({"durationSec": 10})));
        let result = aggregate_success(Some(TaskKind::ProcessUpload), &all);
        assert!(result.get("mediaId").is_none());
    }
}
