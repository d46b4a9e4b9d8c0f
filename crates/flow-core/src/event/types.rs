//! Event vocabulary and the `FlowEvent` envelope.
//!
//! Every mutation the orchestrator makes is first appended to an
//! `EventStore`; the `TaskMirror` and any in-process state are projections
//! replayed from this log, never the other way around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flow_domain::StepKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEventKind {
    /// First event of a task's flow: fixes the plan's definition hash and
    /// child count. Invariant: must be the first event of a `flow_id`.
    FlowInitialized { definition_hash: String, step_count: usize },
    StepStarted { step_kind: StepKind, attempt: u32 },
    StepFinished { step_kind: StepKind, output: serde_json::Value, fingerprint: String },
    StepFailed { step_kind: StepKind, error: String, fingerprint: String },
    /// A step reported incremental progress; not a state transition.
    StepProgress { step_kind: StepKind, pct: f64 },
    /// Terminal event for the task's flow.
    FlowCompleted { flow_fingerprint: String, succeeded: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    pub seq: u64,
    pub flow_id: Uuid,
    pub kind: FlowEventKind,
    pub ts: DateTime<Utc>,
}
