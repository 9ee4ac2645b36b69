// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tagged error surface for all public pipeline operations.
//!
//! Every error renders with a stable machine-readable [`code`](PipelineError::code),
//! a human message, and whatever context the variant carries. Errors are returned,
//! never raised; panics inside supervised tasks are caught at task boundaries and
//! surface as [`PipelineError::Internal`].

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Inputs violate a documented precondition (missing ids, malformed
    /// reference, unknown job type, unknown worker name).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("job queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("rate limit exceeded for session {session_id}")]
    RateLimited { session_id: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("operation cancelled")]
    Cancelled,

    /// Opaque wrapper around an external collaborator failure, carrying the
    /// operation context it occurred under.
    #[error("{operation} adapter call failed: {message}")]
    Adapter { operation: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable code for this error kind. The thin CLI collaborator maps these
    /// to exit codes; audit events and logs carry them verbatim.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION",
            PipelineError::NotFound { .. } => "NOT_FOUND",
            PipelineError::AlreadyExists { .. } => "ALREADY_EXISTS",
            PipelineError::InvalidState(_) => "INVALID_STATE",
            PipelineError::QueueFull { .. } => "QUEUE_FULL",
            PipelineError::RateLimited { .. } => "RATE_LIMITED",
            PipelineError::PermissionDenied(_) => "PERMISSION_DENIED",
            PipelineError::SecurityViolation(_) => "SECURITY_VIOLATION",
            PipelineError::Timeout { .. } => "TIMEOUT",
            PipelineError::Cancelled => "CANCELLED",
            PipelineError::Adapter { .. } => "ADAPTER_FAILURE",
            PipelineError::Internal(_) => "INTERNAL",
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        PipelineError::NotFound { kind, id: id.into() }
    }

    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        PipelineError::AlreadyExists { kind, id: id.into() }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        PipelineError::Timeout { what: what.into(), after }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
