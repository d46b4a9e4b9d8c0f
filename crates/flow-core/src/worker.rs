//! Step Worker (C5): claims one step job, resolves inputs, invokes the
//! handler, and survives retry via the memoization fast-path (§4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flow_domain::{QueueName, StepResult, TaskStatus};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::errors::{classify_error, ErrorClass, OrchestratorError};
use crate::mirror::TaskMirror;
use crate::queue::{JobPayload, QueueBackend};
use crate::step::{StepContext, StepRegistry};
use crate::store::TaskStore;
use crate::task_index::{self, TaskIndex};

pub struct StepWorker<Q: QueueBackend, S: TaskStore + 'static> {
    backend: Arc<Q>,
    registry: StepRegistry,
    mirror: Arc<TaskMirror<S>>,
    task_store: Arc<S>,
    task_index: TaskIndex,
    stall_threshold: Duration,
}

impl<Q: QueueBackend, S: TaskStore + 'static> StepWorker<Q, S> {
    pub fn new(
        backend: Arc<Q>,
        registry: StepRegistry,
        mirror: Arc<TaskMirror<S>>,
        task_store: Arc<S>,
        task_index: TaskIndex,
        stall_threshold_ms: u64,
    ) -> Self {
        Self { backend, registry, mirror, task_store, task_index, stall_threshold: Duration::from_millis(stall_threshold_ms) }
    }

    /// Drains `queue` forever, one step job at a time.
    pub async fn run(&self, queue: QueueName) -> Result<(), OrchestratorError> {
        loop {
            let job = self.backend.claim(queue).await?;
            let task_id = match task_index::resolve_task_id(&self.task_index, self.task_store.as_ref(), &job.parent_job_id).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(parent_job_id = %job.parent_job_id, error = %e, "could not resolve task id for claimed job");
                    continue;
                }
            };
            if let Err(e) = self.run_step(&task_id, job).await {
                warn!(%task_id, error = %e, "step execution errored outside handler contract");
            }
        }
    }

    #[instrument(skip(self, job), fields(step_kind))]
    pub async fn run_step(&self, task_id: &str, job: crate::queue::Job) -> Result<(), OrchestratorError> {
        let (step_kind, data) = match job.payload {
            JobPayload::Step { step_kind, data } => (step_kind, data),
            JobPayload::Parent => return Ok(()),
        };
        tracing::Span::current().record("step_kind", step_kind.wire_id());

        // Cancellation boundary check (§5, §12 supplement).
        if let Some(task) = self.task_store.get(task_id).await? {
            if task.status == TaskStatus::Cancelled {
                return self.backend.ack(&job.job_id, serde_json::json!({ "cancelled": true })).await;
            }
        }

        // Retry fast-path: a previously completed result is memoized and
        // never re-invokes the handler.
        let completed = self.backend.get_children_values(&job.parent_job_id).await?;
        if let Some(existing) = completed.get(&step_kind) {
            info!(%task_id, "memoized fast-path, skipping handler invocation");
            return self.backend.ack(&job.job_id, existing.output.clone().unwrap_or(serde_json::Value::Null)).await;
        }

        let handler = self.registry.get(step_kind)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = StepContext::new(job.job_id.clone(), task_id.to_string(), String::new(), job.attempt, completed_to_outputs(&completed), tx);

        let mirror = Arc::clone(&self.mirror);
        let task_id_owned = task_id.to_string();
        let progress_forwarder = tokio::spawn(async move {
            while let Some((_, pct)) = rx.recv().await {
                mirror.set_progress(task_id_owned.clone(), pct);
            }
        });

        let stall_deadline = tokio::time::Instant::from_std(Instant::now() + self.stall_threshold);
        let outcome = tokio::select! {
            result = handler.handle(data, &ctx) => result,
            _ = tokio::time::sleep_until(stall_deadline) => {
                Err(OrchestratorError::HandlerTransient(format!("step {step_kind} stalled past threshold")))
            }
        };
        progress_forwarder.abort();

        match outcome {
            Ok(output) => self.backend.ack(&job.job_id, output).await,
            Err(e) => {
                let class = classify_error(&e);
                let permanent = matches!(class, ErrorClass::Permanent);
                self.backend.nack(&job.job_id, e.to_string(), permanent).await
            }
        }
    }
}

fn completed_to_outputs(
    completed: &HashMap<flow_domain::StepKind, StepResult>,
) -> HashMap<flow_domain::StepKind, serde_json::Value> {
    completed.iter().filter_map(|(k, v)| v.output.clone().map(|o| (*k, o))).collect()
}
