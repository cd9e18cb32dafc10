//! Error types for the keyed object pool

use std::time::Duration;
use thiserror::Error;

/// Failure reported by an [`ObjectLifecycleFactory`](crate::ObjectLifecycleFactory).
///
/// A factory that gives up on a slow connect should report it through
/// [`FactoryError::timeout`] so callers can tell it apart from a hard failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FactoryError {
    message: String,
    timed_out: bool,
}

impl FactoryError {
    /// Create a factory error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create a factory error for an operation that exceeded its deadline
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self {
            message: format!("{operation} timed out after {after:?}"),
            timed_out: true,
        }
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure was a timeout
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

impl From<std::io::Error> for FactoryError {
    fn from(err: std::io::Error) -> Self {
        Self {
            timed_out: err.kind() == std::io::ErrorKind::TimedOut,
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Sub-pool for key {key} is exhausted ({max} objects in use or idle)")]
    Exhausted { key: String, max: usize },

    #[error("Factory failed: {0}")]
    Factory(#[from] FactoryError),

    #[error("Object returned to key {key} was not borrowed from it")]
    InvalidReturn { key: String },

    #[error("Pool has been destroyed")]
    Destroyed,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Idle reaper requires a running Tokio runtime")]
    RuntimeUnavailable,

    #[error("Metrics export failed: {0}")]
    Metrics(String),
}

impl PoolError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Exhaustion and factory failures are transient. Protocol violations,
    /// destroyed pools and bad configuration are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. } | PoolError::Factory(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
