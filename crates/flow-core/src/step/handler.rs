use async_trait::async_trait;

use crate::errors::OrchestratorError;
use crate::step::context::StepContext;

pub type StepOutcome = Result<serde_json::Value, OrchestratorError>;

/// A capability invoked by a `StepWorker` to execute one step job (§4.3).
///
/// Must be safe to invoke multiple times for the same logical step
/// (`attempt_number > 0`); where side effects exist, implementations
/// should use deterministic output naming (§6, `flow_adapters::naming`) so
/// re-execution overwrites rather than duplicates.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, input: serde_json::Value, ctx: &StepContext) -> StepOutcome;
}
