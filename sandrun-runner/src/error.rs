//! Errors raised by the sandbox façade
//!
//! Only requests that can never run are raised. Everything that goes wrong
//! while a well-formed request runs (install failures, pod errors, timeouts)
//! is carried in the returned `ExecutionResult` instead.

use sandrun_core::domain::request::RequestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// Request failed validation
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// Engine cannot start with the given configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}
