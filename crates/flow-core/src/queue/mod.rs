//! Queue Backend Adapter (C1): abstraction over a durable queue system
//! (§4.1). `flow-redis` supplies the production Redis-backed
//! implementation; `InMemoryQueueBackend` here is the reference
//! implementation used by tests and by the in-process demo binary.

mod memory;

pub use memory::InMemoryQueueBackend;

use std::collections::HashMap;

use async_trait::async_trait;
use flow_domain::{QueueName, StepKind, StepResult};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::flow::plan::FlowPlan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobPayload {
    Parent,
    Step { step_kind: StepKind, data: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub parent_job_id: String,
    pub queue: QueueName,
    pub payload: JobPayload,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// At-least-once delivery for step jobs; handlers must be idempotent for
/// `(job_id, attempt > 0)`. A job becomes ready iff every declared
/// dependency has reached `Completed`; a terminal `Failed` dependency
/// propagates as `FailedByCascade` to its dependents (§4.1).
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Atomically persists one parent job and N child jobs with their
    /// declared dependency edges; returns the parent job id.
    async fn submit_flow(&self, plan: FlowPlan) -> Result<String, OrchestratorError>;

    /// Blocking pull of the next ready job on `queue`.
    async fn claim(&self, queue: QueueName) -> Result<Job, OrchestratorError>;

    /// Blocks until a parent job is ready to wake (all children terminal).
    async fn claim_ready_parent(&self) -> Result<String, OrchestratorError>;

    async fn ack(&self, job_id: &str, result: serde_json::Value) -> Result<(), OrchestratorError>;

    /// `permanent = true` (handler-permanent error, §7) skips the retry
    /// schedule entirely: the step fails immediately and cascades.
    async fn nack(&self, job_id: &str, error: String, permanent: bool) -> Result<(), OrchestratorError>;

    /// Results of children whose final status is `Completed`; failed or
    /// in-flight children are absent.
    async fn get_children_values(
        &self,
        parent_job_id: &str,
    ) -> Result<HashMap<StepKind, StepResult>, OrchestratorError>;

    /// All child `StepResult`s regardless of status, used by the parent
    /// orchestrator to compute the failed set and by reconciliation.
    async fn get_all_children(&self, parent_job_id: &str) -> Result<HashMap<StepKind, StepResult>, OrchestratorError>;

    async fn update_progress(&self, job_id: &str, pct: f64) -> Result<(), OrchestratorError>;

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, OrchestratorError>;
}
