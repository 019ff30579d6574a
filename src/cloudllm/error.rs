//! Core error taxonomy.
//!
//! Every public operation in the coordination runtime returns a [`CoreError`] rather than
//! letting an exception escape the API boundary. Parsers and tool executors never propagate
//! these directly to a caller that would abort; they fold them into empty results or
//! `ToolResult::failure` values instead (see [`crate::cloudllm::task_parser`] and
//! [`crate::cloudllm::text_tool_executor`]).

use std::error::Error;
use std::fmt;

/// Tagged error values propagated by the coordination store, agent tools, orchestrator,
/// and LLM executor facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A referenced entity (agent, task, subscription) does not exist.
    NotFound(String),
    /// An illegal status transition or a missing prerequisite was attempted.
    InvalidState(String),
    /// A path escape or other unauthorized operation was attempted.
    AccessDenied(String),
    /// A required field was missing or the input could not be parsed.
    BadInput(String),
    /// A built-in provider is disabled, or a registered provider returned nothing.
    ProviderUnavailable(String),
    /// The upstream LLM or HTTP call failed.
    UpstreamError(String),
    /// Cooperative cancellation was observed before completion.
    Cancelled(String),
    /// A workspace agent loop exceeded its iteration budget.
    MaxIterations(String),
}

impl CoreError {
    /// Short machine-readable tag identifying this error's category, e.g. `"NOT_FOUND"`.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::InvalidState(_) => "INVALID_STATE",
            CoreError::AccessDenied(_) => "ACCESS_DENIED",
            CoreError::BadInput(_) => "BAD_INPUT",
            CoreError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            CoreError::UpstreamError(_) => "UPSTREAM_ERROR",
            CoreError::Cancelled(_) => "CANCELLED",
            CoreError::MaxIterations(_) => "MAX_ITERATIONS",
        }
    }

    fn message(&self) -> &str {
        match self {
            CoreError::NotFound(m)
            | CoreError::InvalidState(m)
            | CoreError::AccessDenied(m)
            | CoreError::BadInput(m)
            | CoreError::ProviderUnavailable(m)
            | CoreError::UpstreamError(m)
            | CoreError::Cancelled(m)
            | CoreError::MaxIterations(m) => m,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl Error for CoreError {}

/// Convenience alias used throughout the coordination runtime.
pub type CoreResult<T> = Result<T, CoreError>;
