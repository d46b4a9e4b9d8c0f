//! Pluggable decision policies for the orchestrator: how long to wait
//! before retrying a failed step, and how to roll many step progress
//! readings up into one task-level percentage.
//!
//! Mirrors the engine's own determinism requirement: a policy is a pure
//! function of its inputs, and every decision carries a `Rationale` so
//! the choice can be replayed and audited without re-running the policy.

use std::collections::HashMap;
use std::sync::Arc;

use flow_core::hashing::{hash_str, to_canonical_json};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Why a policy produced the value it did. `params_hash` lets two
/// decisions be compared for "same inputs, same answer" without diffing
/// the full parameter struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rationale {
    pub policy_id: String,
    pub params_hash: String,
    pub note: String,
}

fn params_hash(value: &serde_json::Value) -> String {
    hash_str(&to_canonical_json(value))
}

// ---------------------------------------------------------------------
// Backoff policies: attempt number -> delay before the next retry.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffParams {
    pub base_delay_ms: u64,
    pub multiplier: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffParams {
    fn default() -> Self {
        Self { base_delay_ms: 30_000, multiplier: 2, max_delay_ms: 60_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffDecision {
    pub delay_ms: u64,
    pub rationale: Rationale,
}

pub trait BackoffPolicy: Send + Sync {
    fn id(&self) -> &str;

    /// `attempt` is 1-based: the attempt number that just failed.
    fn delay_for(&self, attempt: u32, params: &BackoffParams) -> BackoffDecision;
}

/// `base_delay_ms * multiplier^(attempt-1)`, capped at `max_delay_ms`.
/// This is the policy the in-memory queue backend applies inline; kept
/// here too so other backends (and the CLI's `dry-run` inspector) can
/// reuse the exact same arithmetic instead of re-deriving it.
pub struct ExponentialBackoff;

impl BackoffPolicy for ExponentialBackoff {
    fn id(&self) -> &str {
        "exponential"
    }

    fn delay_for(&self, attempt: u32, params: &BackoffParams) -> BackoffDecision {
        let exp = attempt.saturating_sub(1);
        let raw = params.base_delay_ms.saturating_mul(params.multiplier.saturating_pow(exp));
        let delay_ms = raw.min(params.max_delay_ms);
        let hash = params_hash(&json!({ "policy": self.id(), "attempt": attempt, "params": params }));
        BackoffDecision {
            delay_ms,
            rationale: Rationale {
                policy_id: self.id().to_string(),
                params_hash: hash,
                note: format!("attempt {attempt} -> {delay_ms}ms"),
            },
        }
    }
}

/// Always the same delay, ignoring attempt number. Useful for handlers
/// whose transient failures (e.g. a fixed-size worker pool being busy)
/// don't get less likely over time.
pub struct FixedBackoff;

impl BackoffPolicy for FixedBackoff {
    fn id(&self) -> &str {
        "fixed"
    }

    fn delay_for(&self, attempt: u32, params: &BackoffParams) -> BackoffDecision {
        let delay_ms = params.base_delay_ms.min(params.max_delay_ms);
        let hash = params_hash(&json!({ "policy": self.id(), "attempt": attempt, "params": params }));
        BackoffDecision {
            delay_ms,
            rationale: Rationale {
                policy_id: self.id().to_string(),
                params_hash: hash,
                note: format!("fixed delay {delay_ms}ms"),
            },
        }
    }
}

// ---------------------------------------------------------------------
// Progress aggregation policies: per-step percentages -> one task-level
// percentage.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationDecision {
    pub value: f64,
    pub rationale: Rationale,
}

pub trait ProgressAggregationPolicy: Send + Sync {
    fn id(&self) -> &str;

    fn aggregate(&self, step_progresses: &[f64]) -> AggregationDecision;
}

/// `round(mean(progresses), 2)` clamped to `[0, 100]`. This is the
/// policy named by the engine's own default (`mirror::aggregate_progress`
/// implements the same formula); kept here as the pluggable form so a
/// deployment can swap in e.g. a weighted or min-based policy instead.
pub struct MeanAggregation;

impl ProgressAggregationPolicy for MeanAggregation {
    fn id(&self) -> &str {
        "mean"
    }

    fn aggregate(&self, step_progresses: &[f64]) -> AggregationDecision {
        let value = if step_progresses.is_empty() {
            0.0
        } else {
            let sum: f64 = step_progresses.iter().sum();
            (sum / step_progresses.len() as f64).clamp(0.0, 100.0)
        };
        let rounded = (value * 100.0).round() / 100.0;
        let hash = params_hash(&json!({ "policy": self.id(), "inputs": step_progresses }));
        AggregationDecision {
            value: rounded,
            rationale: Rationale {
                policy_id: self.id().to_string(),
                params_hash: hash,
                note: format!("mean of {} readings", step_progresses.len()),
            },
        }
    }
}

/// The slowest step gates the reported percentage. Conservative: a
/// flow isn't "80% done" while one branch is still at 40%.
pub struct MinAggregation;

impl ProgressAggregationPolicy for MinAggregation {
    fn id(&self) -> &str {
        "min"
    }

    fn aggregate(&self, step_progresses: &[f64]) -> AggregationDecision {
        let value = step_progresses.iter().cloned().fold(f64::INFINITY, f64::min);
        let value = if value.is_finite() { value.clamp(0.0, 100.0) } else { 0.0 };
        let hash = params_hash(&json!({ "policy": self.id(), "inputs": step_progresses }));
        AggregationDecision {
            value,
            rationale: Rationale {
                policy_id: self.id().to_string(),
                params_hash: hash,
                note: format!("min of {} readings", step_progresses.len()),
            },
        }
    }
}

// ---------------------------------------------------------------------
// Registries: string policy id -> implementation, mirroring the
// "pick by name, fall back to a sane default" shape used elsewhere in
// the engine (e.g. `StepOptsRegistry`).
// ---------------------------------------------------------------------

pub struct BackoffPolicyRegistry {
    policies: HashMap<String, Arc<dyn BackoffPolicy>>,
    default_id: String,
}

impl BackoffPolicyRegistry {
    pub fn new() -> Self {
        let mut policies: HashMap<String, Arc<dyn BackoffPolicy>> = HashMap::new();
        policies.insert("exponential".to_string(), Arc::new(ExponentialBackoff));
        policies.insert("fixed".to_string(), Arc::new(FixedBackoff));
        Self { policies, default_id: "exponential".to_string() }
    }

    pub fn register(&mut self, id: impl Into<String>, policy: Arc<dyn BackoffPolicy>) {
        self.policies.insert(id.into(), policy);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn BackoffPolicy>> {
        self.policies.get(id).cloned()
    }

    pub fn default_policy(&self) -> Arc<dyn BackoffPolicy> {
        self.policies.get(&self.default_id).cloned().expect("default backoff policy always registered")
    }
}

impl Default for BackoffPolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AggregationPolicyRegistry {
    policies: HashMap<String, Arc<dyn ProgressAggregationPolicy>>,
    default_id: String,
}

impl AggregationPolicyRegistry {
    pub fn new() -> Self {
        let mut policies: HashMap<String, Arc<dyn ProgressAggregationPolicy>> = HashMap::new();
        policies.insert("mean".to_string(), Arc::new(MeanAggregation));
        policies.insert("min".to_string(), Arc::new(MinAggregation));
        Self { policies, default_id: "mean".to_string() }
    }

    pub fn register(&mut self, id: impl Into<String>, policy: Arc<dyn ProgressAggregationPolicy>) {
        self.policies.insert(id.into(), policy);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProgressAggregationPolicy>> {
        self.policies.get(id).cloned()
    }

    pub fn default_policy(&self) -> Arc<dyn ProgressAggregationPolicy> {
        self.policies.get(&self.default_id).cloned().expect("default aggregation policy always registered")
    }
}

impl Default for AggregationPolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = ExponentialBackoff;
        let params = BackoffParams::default();
        assert_eq!(policy.delay_for(1, &params).delay_ms, 30_000);
        assert_eq!(policy.delay_for(2, &params).delay_ms, 60_000);
        assert_eq!(policy.delay_for(3, &params).delay_ms, 60_000);
    }

    #[test]
    fn mean_aggregation_matches_spec_scenario() {
        let policy = MeanAggregation;
        assert_eq!(policy.aggregate(&[100.0, 100.0, 40.0]).value, 80.0);
        assert_eq!(policy.aggregate(&[0.0, 0.0, 0.0]).value, 0.0);
        assert_eq!(policy.aggregate(&[100.0, 100.0, 100.0]).value, 100.0);
    }

    #[test]
    fn registries_expose_a_default() {
        let backoff = BackoffPolicyRegistry::new();
        assert_eq!(backoff.default_policy().id(), "exponential");
        assert!(backoff.get("fixed").is_some());
        assert!(backoff.get("nonexistent").is_none());

        let agg = AggregationPolicyRegistry::new();
        assert_eq!(agg.default_policy().id(), "mean");
    }
}
