//! flow-core: the step-DAG execution engine.
//!
//! Components:
//! - `flow`: `FlowPlan`/`FlowBuilder`/validator (C2, C8) — `(Task) →
//!   FlowPlan`.
//! - `queue`: `QueueBackend` trait + in-memory reference implementation
//!   (C1).
//! - `step`: `StepHandler`/`StepRegistry`/`StepContext` (C3).
//! - `orchestrator`: `ParentOrchestrator` (C4).
//! - `worker`: `StepWorker` (C5).
//! - `enqueuer`: `TaskEnqueuer` (C6).
//! - `mirror`: `TaskMirror` (C7).
//! - `health`: `HealthAggregator` (C9).
//! - `event`: append-only event log backing replay/reconciliation.
//! - `hashing`: canonical JSON + content hash for internal fingerprinting.
//! - `errors`: the engine's error taxonomy (§7).
//! - `store`: `TaskStore`, the task submission boundary trait.

pub mod constants;
pub mod enqueuer;
pub mod errors;
pub mod event;
pub mod flow;
pub mod hashing;
pub mod health;
pub mod mirror;
pub mod orchestrator;
pub mod policy;
pub mod queue;
pub mod step;
pub mod store;
pub mod task_index;
pub mod worker;

pub use enqueuer::TaskEnqueuer;
pub use errors::{classify_error, ErrorClass, OrchestratorError};
pub use event::{EventStore, FlowEvent, FlowEventKind, InMemoryEventStore};
pub use flow::{build_flow, FlowBuilder, FlowPlan};
pub use health::{HealthAggregator, HealthReport, HealthStatus, LivenessProbe};
pub use mirror::TaskMirror;
pub use orchestrator::ParentOrchestrator;
pub use policy::StepOptsRegistry;
pub use queue::{InMemoryQueueBackend, Job, QueueBackend, QueueCounts};
pub use step::{StepContext, StepHandler, StepRegistry};
pub use store::TaskStore;
pub use task_index::{resolve_task_id, TaskIndex};
pub use worker::StepWorker;
