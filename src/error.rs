//! Error taxonomy shared by every core component.
//!
//! The orchestrator and pipeline need to *match* on error kind to decide
//! retry/propagation behavior, so the core never uses a bare `anyhow::Error`
//! internally. The CLI and daemon layers still use `anyhow` for glue code;
//! `SyncError` converts into it automatically via `std::error::Error`.

use std::fmt;

/// A single error kind from the taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Config shape/constraint violation. Fatal for the whole run.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Timeout, 5xx, connection reset. Retried with backoff before becoming
    /// this variant (i.e. this is the terminal state after retries exhaust).
    #[error("transient network error: {0}")]
    Transient(String),

    /// 429 or documented quota exhaustion. `reset_at`, when the response
    /// carried rate-limit headers, is consumed by `resilience::with_retry`
    /// to sleep until the reset instant instead of backing off.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        reset_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// 401/403 unrelated to branch protection.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A push was rejected because the target branch is protected. Not a
    /// true failure — callers convert this into the PR-creation flow.
    #[error("branch protected: {0}")]
    BranchProtected(String),

    /// A group was skipped because an upstream dependency failed.
    #[error("skipped: upstream dependency {0} failed")]
    DependencySkipped(String),

    /// Template or content-transform error isolated to one file.
    #[error("transform failed for {path}: {reason}")]
    Transform { path: String, reason: String },

    /// The operation was cancelled via the shared cancellation context.
    #[error("cancelled")]
    Cancelled,

    /// A panic inside a per-target task, caught at the task boundary.
    #[error("panic: {0}")]
    Panic(String),

    /// Any I/O failure not otherwise classified (git process spawn, fs
    /// operations on the workspace, etc).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the retry policy in `resilience` should retry this error:
    /// applied to transient/rate-limit kinds; not applied to transform,
    /// validation, or most 4xx responses.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::RateLimited { .. })
    }

    /// The rate-limit reset instant, if this is a `RateLimited` error that
    /// carried one.
    pub fn rate_limit_reset(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            SyncError::RateLimited { reset_at, .. } => *reset_at,
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Transient(_) => ErrorKind::Transient,
            SyncError::RateLimited { .. } => ErrorKind::RateLimited,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::BranchProtected(_) => ErrorKind::BranchProtected,
            SyncError::DependencySkipped(_) => ErrorKind::DependencySkipped,
            SyncError::Transform { .. } => ErrorKind::Transform,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Panic(_) => ErrorKind::Panic,
            SyncError::Io(_) => ErrorKind::Transient,
        }
    }
}

/// The bare kind, without the associated message — useful for logging and
/// for tests that assert "this failed for the right reason" without string
/// matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Transient,
    RateLimited,
    Auth,
    BranchProtected,
    DependencySkipped,
    Transform,
    Cancelled,
    Panic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Auth => "auth",
            ErrorKind::BranchProtected => "branch_protected",
            ErrorKind::DependencySkipped => "dependency_skipped",
            ErrorKind::Transform => "transform",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Panic => "panic",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
