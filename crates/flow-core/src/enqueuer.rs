//! Task Enqueuer (C6): polls the persistence store for `queued` tasks,
//! builds the flow, submits it, and marks the task `running` (§4.6).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flow_domain::TaskKind;
use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::flow::build_flow;
use crate::policy::StepOptsRegistry;
use crate::queue::QueueBackend;
use crate::store::TaskStore;
use crate::task_index::TaskIndex;

pub struct TaskEnqueuer<Q: QueueBackend, S: TaskStore> {
    backend: Arc<Q>,
    store: Arc<S>,
    registry: StepOptsRegistry,
    poll_interval: Duration,
    batch_size: usize,
    task_index: TaskIndex,
}

impl<Q: QueueBackend, S: TaskStore> TaskEnqueuer<Q, S> {
    pub fn new(backend: Arc<Q>, store: Arc<S>, registry: StepOptsRegistry, poll_interval_ms: u64, batch_size: usize) -> Self {
        Self {
            backend,
            store,
            registry,
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size,
            task_index: Arc::new(DashMap::new()),
        }
    }

    /// The live `parent_job_id -> task_id` map this enqueuer populates as
    /// it submits flows. `StepWorker`/`ParentOrchestrator` need the same
    /// mapping (the queue backend only ever hands back a `parent_job_id`),
    /// so the root binary shares this `Arc` with both.
    pub fn task_index(&self) -> TaskIndex {
        Arc::clone(&self.task_index)
    }

    pub async fn run(&self) -> Result<(), OrchestratorError> {
        loop {
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "enqueuer poll failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn poll_once(&self) -> Result<usize, OrchestratorError> {
        let tasks = self.store.fetch_queued(self.batch_size).await?;
        let mut processed = 0;
        for task in tasks {
            let claimed = self.store.mark_running(&task.id).await?;
            if !claimed {
                continue;
            }
            processed += 1;
            match build_flow(&task, &self.registry) {
                Ok(plan) => match self.backend.submit_flow(plan).await {
                    Ok(parent_job_id) => {
                        self.store.set_parent_job_id(&task.id, &parent_job_id).await?;
                        self.task_index.insert(parent_job_id, task.id.clone());
                        info!(task_id = %task.id, kind = %task.kind, "submitted flow");
                    }
                    Err(OrchestratorError::BackendUnavailable(msg)) => {
                        warn!(task_id = %task.id, msg, "backend unavailable, reverting to queued");
                        self.store.revert_to_queued(&task.id).await?;
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    self.store.mark_failed_before_submission(&task.id, e.to_string()).await?;
                }
            }
        }
        Ok(processed)
    }
}

/// Structural sanity check used by tests and the CLI: every `TaskKind`
/// variant the engine knows about has a registered flow-definition.
pub const KNOWN_TASK_KINDS: [TaskKind; 4] =
    [TaskKind::ProcessUpload, TaskKind::DetectLabels, TaskKind::RenderTimeline, TaskKind::FullIngest];
