//! Error taxonomy for the remediation engine.

use thiserror::Error;
use uuid::Uuid;

use crate::types::{ActionStatus, ActionType, Platform};

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or out-of-range request; rejected before any ledger write
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Service is not present in the target registry
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// An action for this (service, action type) key is already in flight
    #[error("Action already in flight for {service} ({action_type})")]
    Conflict {
        service: String,
        action_type: ActionType,
    },

    /// The action is not valid for the target platform
    #[error("{action_type} is not supported on {platform}")]
    Unsupported {
        action_type: ActionType,
        platform: Platform,
    },

    /// Ledger-level failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Errors from the action ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The single-flight key is held by a non-terminal record
    #[error("Lock held for {service} ({action_type})")]
    KeyHeld {
        service: String,
        action_type: ActionType,
    },

    /// No record exists for the given id
    #[error("No action record with id {0}")]
    NotFound(Uuid),

    /// Status is monotonic; the requested transition would reverse it
    #[error("Illegal transition {from} -> {to} for action {action_id}")]
    IllegalTransition {
        action_id: Uuid,
        from: ActionStatus,
        to: ActionStatus,
    },
}

/// Errors from target executors. Absorbed into the action record's terminal
/// state after retries; never surfaced as a request failure.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The orchestration backend could not be reached
    #[error("Target unreachable: {0}")]
    Unreachable(String),

    /// The operation exceeded its timeout
    #[error("Execution timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The orchestration API rejected the operation
    #[error("Backend API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// The operation is not supported by this backend
    #[error("Operation not supported by this backend")]
    Unsupported,

    /// Kubernetes client error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
