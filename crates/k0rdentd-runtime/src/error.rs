//! Runtime and readiness error types

use std::time::Duration;
use thiserror::Error;

/// Readiness wait failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("timeout waiting for {description} after {timeout:?}")]
    Timeout {
        description: String,
        timeout: Duration,
    },

    #[error("cancelled while waiting for {description}")]
    Cancelled { description: String },
}

/// k0s runtime lifecycle errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("k0s binary not found in PATH")]
    BinaryNotFound,

    #[error("k0s runtime did not become ready: {0}")]
    NotReady(#[from] WaitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
