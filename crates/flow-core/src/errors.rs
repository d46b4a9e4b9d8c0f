//! Error taxonomy for the engine (§7). `OrchestratorError` is the single
//! error type crossing crate boundaries inside the workspace; `ErrorClass`
//! is the retry-policy axis every caller actually branches on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("store put failed: {0}")]
    StorePutFailed(String),
    #[error("storage io error: {0}")]
    StorageIo(String),
    #[error("handler transient error: {0}")]
    HandlerTransient(String),
    #[error("handler permanent error: {0}")]
    HandlerPermanent(String),
    #[error("unknown task kind: {0}")]
    UnknownTaskKind(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("malformed plan: {0}")]
    MalformedPlan(String),
    #[error("unregistered step kind: {0}")]
    UnregisteredStepKind(String),
    #[error("terminal conflict on task {0}")]
    TerminalConflict(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// The axis every retry/escalation decision actually branches on. See
/// spec §7: transient infra and handler-transient errors share a policy;
/// plan-build and handler-permanent errors are both fatal-but-different
/// (one never reaches the queue, the other cascades from inside it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    Validation,
    Internal,
}

pub fn classify_error(err: &OrchestratorError) -> ErrorClass {
    match err {
        OrchestratorError::BackendUnavailable(_)
        | OrchestratorError::StorePutFailed(_)
        | OrchestratorError::StorageIo(_)
        | OrchestratorError::HandlerTransient(_) => ErrorClass::Transient,
        OrchestratorError::HandlerPermanent(_) => ErrorClass::Permanent,
        OrchestratorError::UnknownTaskKind(_)
        | OrchestratorError::MalformedPayload(_)
        | OrchestratorError::MalformedPlan(_)
        | OrchestratorError::UnregisteredStepKind(_) => ErrorClass::Validation,
        OrchestratorError::TerminalConflict(_) | OrchestratorError::Internal(_) => ErrorClass::Internal,
    }
}

impl From<flow_domain::DomainError> for OrchestratorError {
    fn from(e: flow_domain::DomainError) -> Self {
        match e {
            flow_domain::DomainError::UnknownTaskKind(s) => OrchestratorError::UnknownTaskKind(s),
            flow_domain::DomainError::MalformedPayload(s) => OrchestratorError::MalformedPayload(s),
            other => OrchestratorError::MalformedPayload(other.to_string()),
        }
    }
}
