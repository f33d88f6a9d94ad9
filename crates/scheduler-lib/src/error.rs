//! Error types for the scheduler library
//!
//! "Not ready" is never an error: estimators and labellers return `None`
//! when their preconditions are not met. Errors are reserved for invalid
//! input, subprocess faults and broken structural invariants.

use crate::trace::FieldCategory;
use thiserror::Error;

/// Invalid access to or construction of a trace record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceError {
    #[error("unknown trace field `{0}`")]
    UnknownField(String),

    #[error("trace field `{0}` is not set")]
    Undefined(String),

    #[error("trace field `{field}` is a {actual} field, not {requested}")]
    WrongCategory {
        field: String,
        actual: FieldCategory,
        requested: FieldCategory,
    },

    #[error("invalid value for trace field `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Failures inside a node speed estimator
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// A structural check failed; only the current computation is abandoned
    #[error("ratio invariant violated at ({row}, {col}): {detail}")]
    InvariantViolation {
        row: usize,
        col: usize,
        detail: String,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("estimator subprocess failed: {message}")]
    Subprocess { message: String, stderr: String },

    #[error("estimator session is faulted")]
    Faulted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Top-level error for engine operations
#[derive(Debug, Error)]
pub enum TaremaError {
    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Estimator(#[from] EstimatorError),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaremaError>;
