//! Error types used by the jobvisor runtime, jobs and tasks.
//!
//! This module defines the error enums shared across the crate:
//!
//! - [`RuntimeError`]: errors raised by the run-loop control surface itself.
//! - [`TaskError`]: errors raised by a unit of work (a task or a whole job).
//! - [`StorageError`]: failures reported by the storage collaborator.
//! - [`FetchError`]: failures reported by the network collaborator.
//! - [`SnapshotError`]: checkpoint (de)serialization failures.
//! - [`ConfigError`]: invalid environment configuration.
//!
//! The runtime-facing types provide `as_label` for logging, mirroring the
//! labels used in emitted events.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;

use crate::core::RunLoopState;

/// # Errors produced by the run-loop control surface.
///
/// `start()` and `stop()` are only valid from specific states; calling them
/// elsewhere returns [`RuntimeError::InvalidTransition`] and leaves the state
/// untouched.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The requested operation is not permitted from the current state.
    #[error("cannot {op} while {state}")]
    InvalidTransition {
        /// Operation that was attempted (`start` or `stop`).
        op: &'static str,
        /// State the run-loop was in when the call was made.
        state: RunLoopState,
    },

    /// The service behind a handle has gone away.
    #[error("service channel closed")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use jobvisor::{RunLoopState, RuntimeError};
    ///
    /// let err = RuntimeError::InvalidTransition { op: "start", state: RunLoopState::Running };
    /// assert_eq!(err.as_label(), "runtime_invalid_transition");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InvalidTransition { .. } => "runtime_invalid_transition",
            RuntimeError::Closed => "runtime_closed",
        }
    }
}

/// # Errors produced by a unit of work.
///
/// Two families matter to callers:
/// - [`TaskError::Authentication`]: the browser session is not logged in; the
///   operator has to sign in out-of-band and start again.
/// - everything else: an upstream or domain failure. Any unexpected failure is
///   treated the same way at the boundary that catches it.
///
/// Nothing in the runtime retries on any of these.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The browser session is not authenticated.
    #[error("not authenticated: {reason}")]
    Authentication {
        /// Where the site redirected to, or why the check failed.
        reason: String,
    },

    /// Upstream answered with a non-success status.
    #[error("upstream returned {status} for {url}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Requested resource.
        url: String,
    },

    /// Upstream content could not be parsed or lacked required fields.
    #[error("malformed content: {error}")]
    Malformed {
        /// What was missing or unparseable.
        error: String,
    },

    /// Generic task failure.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The task tag is not registered; raised when the stub is run.
    #[error("unknown task type {tag:?}")]
    UnknownTask {
        /// Tag found in the request or checkpoint.
        tag: String,
    },

    /// Storage collaborator failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Network collaborator failure.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use jobvisor::TaskError;
    ///
    /// let err = TaskError::Upstream { status: 502, url: "https://example.com".into() };
    /// assert_eq!(err.as_label(), "task_upstream");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Authentication { .. } => "task_authentication",
            TaskError::Upstream { .. } => "task_upstream",
            TaskError::Malformed { .. } => "task_malformed",
            TaskError::Fail { .. } => "task_failed",
            TaskError::UnknownTask { .. } => "task_unknown",
            TaskError::Storage(_) => "task_storage",
            TaskError::Fetch(_) => "task_fetch",
        }
    }

    /// True if the error asks the operator to log in again.
    pub fn is_authentication(&self) -> bool {
        matches!(self, TaskError::Authentication { .. })
    }

    /// Shorthand for [`TaskError::Malformed`].
    pub fn malformed(error: impl Into<String>) -> Self {
        TaskError::Malformed {
            error: error.into(),
        }
    }
}

/// # Errors reported by the storage collaborator.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The scope was used while not open.
    #[error("storage scope {scope:?} is not open")]
    Closed {
        /// Scope name.
        scope: String,
    },

    /// Backend-specific failure.
    #[error("storage backend error: {error}")]
    Backend {
        /// Backend message.
        error: String,
    },
}

/// # Errors reported by the network collaborator.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request never produced a response.
    #[error("transport error: {error}")]
    Transport {
        /// Transport message.
        error: String,
    },

    /// The request was abandoned before dispatch.
    #[error("request cancelled")]
    Cancelled,
}

/// # Checkpoint (de)serialization failures.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The snapshot JSON did not match the expected shape.
    #[error("invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// # Invalid environment configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    /// Environment variable name.
    pub var: &'static str,
    /// Raw value found.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs a unit of work, turning a panic into [`TaskError::Fail`].
pub(crate) async fn catch_panic<F>(work: F) -> Result<(), TaskError>
where
    F: Future<Output = Result<(), TaskError>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Fail {
            error: format!("panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}
