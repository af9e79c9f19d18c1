//! Caller-side error type.
//!
//! `WorkerError` is what callers of the [`WorkerManager`](crate::WorkerManager)
//! see. Failures inside the worker never cross the channel as Rust errors:
//! the dispatcher turns them into error envelopes, and the manager surfaces
//! those as [`WorkerError::Command`] carrying the envelope's message.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the caller-side error type.
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// No response arrived within the caller's timeout.
    #[error("command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The worker reported a failed start or never reported at all.
    #[error("worker startup failed: {0}")]
    WorkerStartupFailed(String),

    #[error("worker is not running")]
    WorkerNotRunning,

    /// The worker answered with an error envelope.
    #[error("command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// A response payload did not have the expected shape.
    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    /// Whether this error is a caller-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerError::Timeout { .. })
    }
}

impl From<figment::Error> for WorkerError {
    fn from(err: figment::Error) -> Self {
        WorkerError::Config(err.to_string())
    }
}
