use flow_core::errors::OrchestratorError;
use serde_json::Value;

/// Filename formula version folded into every deterministic name (§6); a
/// future encoder change bumps this rather than silently reusing names.
pub const PROCESSOR_VERSION: &str = "v1";

/// Pulls a required string field out of a step's input, classified as a
/// handler-permanent error (§7) when absent — malformed step input is not
/// retryable.
pub fn require_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, OrchestratorError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| OrchestratorError::HandlerPermanent(format!("missing or non-string field `{key}`")))
}

pub fn require_u64(input: &Value, key: &str) -> Result<u64, OrchestratorError> {
    input
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| OrchestratorError::HandlerPermanent(format!("missing or non-numeric field `{key}`")))
}
