use std::collections::HashMap;
use std::sync::Arc;

use flow_domain::StepKind;

use crate::errors::OrchestratorError;
use crate::step::handler::StepHandler;

/// Static mapping `stepKind → StepHandler` (§4.3). Closed registry:
/// dispatching a plan that references an unregistered step kind is a
/// fatal, build-time error for the worker process.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, kind: StepKind, handler: Arc<dyn StepHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: StepKind) -> Result<Arc<dyn StepHandler>, OrchestratorError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnregisteredStepKind(kind.wire_id().to_string()))
    }

    /// Validates every step kind referenced by `plan` is registered; called
    /// once before a worker starts draining a plan's queues.
    pub fn assert_covers(&self, kinds: &[StepKind]) -> Result<(), OrchestratorError> {
        for kind in kinds {
            self.get(*kind)?;
        }
        Ok(())
    }
}
