//! Error types for the provisioning engine.
//!
//! Declaration errors (`Cycle`, `DuplicateResource`, `UnknownDependency`,
//! `UnknownKind`) are fatal and surface before any backend mutation.
//! Everything that happens while a resource is being converged is caught by
//! the executor and turned into a `Failed` status with an [`ErrorKind`] in the
//! run report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::Status;

/// Categories of provider errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Throttling, connection resets, 5xx (transient, retryable)
    Transient,
    /// Backend object does not exist
    NotFound,
    /// Backend object already exists (create should treat as success)
    AlreadyExists,
    /// Backend refused the request (validation, quota, permissions)
    Rejected,
    /// The call did not complete in time; outcome unknown
    Timeout,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Transient backend error",
            Self::NotFound => "Backend object not found",
            Self::AlreadyExists => "Backend object already exists",
            Self::Rejected => "Request rejected by backend",
            Self::Timeout => "Operation timed out",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors a provider may return from a backend call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient failure, safe to retry
    #[error("transient error: {message}")]
    Transient { message: String },

    /// Backend object does not exist
    #[error("not found: {backend_id}")]
    NotFound { backend_id: String },

    /// Backend object already exists
    #[error("already exists: {backend_id}")]
    AlreadyExists { backend_id: String },

    /// The backend refused the request
    #[error("rejected: {message}")]
    Rejected { message: String },

    /// The call did not finish within the operation timeout
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: Operation, secs: u64 },

    /// IO error talking to the backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed payload from the backend
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Self::Rejected { .. } => ErrorCategory::Rejected,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Errors from a state store backend.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to access state file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {} is corrupt: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state store lock poisoned")]
    Poisoned,
}

/// Backend operation names, used in logs, timeouts and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Locate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Locate => "locate",
        };
        f.write_str(s)
    }
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The depends-on relation contains a cycle
    #[error("dependency cycle: {}", members.join(" -> "))]
    Cycle { members: Vec<String> },

    /// Two declarations share an id
    #[error("resource '{id}' is declared more than once")]
    DuplicateResource { id: String },

    /// A declaration depends on an id that is not declared
    #[error("resource '{id}' depends on undeclared resource '{dependency}'")]
    UnknownDependency { id: String, dependency: String },

    /// A `--target` names a resource that is not declared
    #[error("target '{id}' is not a declared resource")]
    UnknownTarget { id: String },

    /// No provider is registered for a declaration's kind
    #[error("resource '{id}' has kind '{kind}' but no provider is registered for it")]
    UnknownKind { id: String, kind: String },

    /// A provider for this kind is already registered
    #[error("a provider for kind '{kind}' is already registered")]
    DuplicateProvider { kind: String },

    /// A lifecycle edge outside the state machine was requested
    #[error("resource '{id}' cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: Status, to: Status },

    /// A provider call failed after retries
    #[error("{operation} of '{id}' failed: {source}")]
    Provider {
        id: String,
        operation: Operation,
        #[source]
        source: ProviderError,
    },

    /// A dependency (or, on teardown, a dependent) did not converge
    #[error("resource '{id}' skipped: '{blocker}' did not converge")]
    DependencyFailed { id: String, blocker: String },

    /// The outcome of a call is unknown and a reconciling read could not confirm it
    #[error("{operation} of '{id}' timed out and could not be confirmed")]
    Timeout { id: String, operation: Operation },

    /// The run was cancelled before this resource was dispatched
    #[error("resource '{id}' was not started: run cancelled")]
    Cancelled { id: String },

    /// State store failure
    #[error(transparent)]
    State(#[from] StateError),

    /// Could not build the worker pool
    #[error("failed to create worker pool: {0}")]
    ThreadPool(String),
}

impl Error {
    /// Classify for the run report
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cycle { .. } => ErrorKind::Cycle,
            Self::DuplicateResource { .. }
            | Self::UnknownDependency { .. }
            | Self::UnknownTarget { .. } => ErrorKind::Declaration,
            Self::UnknownKind { .. } | Self::DuplicateProvider { .. } => ErrorKind::UnknownKind,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Provider { source, .. } => match source.category() {
                ErrorCategory::Timeout => ErrorKind::Timeout,
                _ => ErrorKind::Adapter,
            },
            Self::DependencyFailed { .. } => ErrorKind::DependencyFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::State(_) => ErrorKind::StateStore,
            Self::ThreadPool(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error classification carried in run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cycle,
    Declaration,
    UnknownKind,
    Adapter,
    DependencyFailed,
    StateStore,
    Timeout,
    Cancelled,
    InvalidTransition,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cycle => "cycle",
            Self::Declaration => "declaration",
            Self::UnknownKind => "unknown_kind",
            Self::Adapter => "adapter",
            Self::DependencyFailed => "dependency_failed",
            Self::StateStore => "state_store",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidTransition => "invalid_transition",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
