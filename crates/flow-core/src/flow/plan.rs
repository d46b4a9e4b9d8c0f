//! Typed algebraic description of a task's flow (§3, §4.8 — C8).

use std::collections::HashMap;

use flow_domain::{QueueName, StepKind, StepResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOpts {
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for StepOpts {
    fn default() -> Self {
        Self {
            attempts: crate::constants::DEFAULT_STEP_ATTEMPTS,
            backoff: BackoffPolicy { delay_ms: crate::constants::DEFAULT_BACKOFF_DELAY_MS },
        }
    }
}

/// One child node: a single step job with its declared dependency edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepNode {
    pub step_kind: StepKind,
    pub queue: QueueName,
    pub data: serde_json::Value,
    pub opts: StepOpts,
    pub depends_on: Vec<StepKind>,
}

/// The synthetic node aggregating children and reporting task completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentNode {
    pub task_id: String,
    pub workspace_id: String,
    pub step_results: HashMap<StepKind, StepResult>,
}

/// Ephemeral, engine-internal description of the DAG the engine executes
/// for one task.
///
/// Invariant: the dependency graph is a DAG; every `depends_on` entry
/// names another child in the same plan; the parent is implicitly
/// dependent on all children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPlan {
    pub parent: ParentNode,
    pub children: Vec<StepNode>,
}

impl FlowPlan {
    pub fn step(&self, kind: StepKind) -> Option<&StepNode> {
        self.children.iter().find(|c| c.step_kind == kind)
    }

    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.children.iter().map(|c| c.step_kind).collect()
    }
}
