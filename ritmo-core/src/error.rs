//! Error types for the ritmo loop kernel.
//!
//! Configuration and protocol failures are structured `thiserror` variants.
//! Errors raised by user code (the step computation or a callback) travel
//! through [`LoopError::User`] untouched so callers can downcast them.

use crate::driver::LoopStatus;
use crate::elapsed::{Elapsed, Unit};
use crate::history::History;

/// Boxed error returned by user step functions and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from malformed periods, schedules, or configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Empty period for {context}: at least one of steps, samples or time must be set")]
    EmptyPeriod { context: String },

    #[error("Period unit '{unit}' must be greater than zero")]
    ZeroPeriod { unit: Unit },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors from callbacks that break the dispatch contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackProtocolError {
    #[error("Callback '{callback}' returned logs with an empty category name")]
    EmptyCategory { callback: String },

    #[error("Callback '{callback}' returned an empty metric name in category '{category}'")]
    EmptyMetricName { callback: String, category: String },
}

/// Everything that can abort a loop run.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("Callback protocol error: {0}")]
    Protocol(#[from] CallbackProtocolError),

    /// Error raised by the step computation or a callback, propagated verbatim.
    #[error(transparent)]
    User(BoxError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: LoopStatus, to: LoopStatus },
}

impl LoopError {
    /// Wrap an error raised by user code.
    pub fn user(err: impl Into<BoxError>) -> Self {
        Self::User(err.into())
    }

    /// Borrow the user error, if this is one.
    pub fn as_user(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            LoopError::User(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// A failed run: the error plus everything committed before it happened.
#[derive(Debug, thiserror::Error)]
#[error("Loop failed after {} commits at step {}: {error}", .history.len(), .elapsed.steps)]
pub struct LoopFailure {
    #[source]
    pub error: LoopError,
    /// History committed up to (not including) the failing iteration.
    pub history: History,
    /// Progress snapshot of the failing iteration.
    pub elapsed: Elapsed,
}

impl LoopFailure {
    pub fn into_error(self) -> LoopError {
        self.error
    }
}

/// A type alias for results using [`LoopError`].
pub type Result<T> = std::result::Result<T, LoopError>;
