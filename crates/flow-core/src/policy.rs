//! Centralized per-step-kind attempt/backoff overrides (§4.2: "opts.attempts
//! ... centralized in one registry"). Runtime backoff-delay computation and
//! progress-aggregation policy live in the separate `flow-policies` crate;
//! this registry only supplies the defaults a `FlowBuilder` bakes into a
//! plan at build time.

use std::collections::HashMap;

use flow_domain::StepKind;

use crate::flow::plan::StepOpts;

pub struct StepOptsRegistry {
    overrides: HashMap<StepKind, StepOpts>,
}

impl StepOptsRegistry {
    pub fn new() -> Self {
        Self { overrides: HashMap::new() }
    }

    pub fn with_override(mut self, kind: StepKind, opts: StepOpts) -> Self {
        self.overrides.insert(kind, opts);
        self
    }

    pub fn opts_for(&self, kind: StepKind) -> StepOpts {
        self.overrides.get(&kind).copied().unwrap_or_default()
    }
}

impl Default for StepOptsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
