//! Typed errors for the orchestration engine.
//!
//! Application plumbing (config, database, CLI) uses `anyhow`; the engine
//! surface uses these enums so callers can match on recovery policy.

use std::time::Duration;
use thiserror::Error;

/// Registry-level failures.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// A failed call to a model provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network, timeout, rate limit or server-side failure. Worth retrying.
    #[error("transient provider failure: {0}")]
    Retryable(String),

    /// Authentication, malformed request or unparseable response.
    #[error("provider rejected request: {0}")]
    NonRetryable(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::Retryable(format!("no response within {}s", after.as_secs_f64()))
    }
}

/// Last error seen from one provider in the chain.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub attempts: u32,
    pub error: ProviderError,
}

#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("all providers exhausted ({})", describe_failures(.0))]
    AllProvidersExhausted(Vec<ProviderFailure>),

    #[error("cancelled")]
    Cancelled,
}

fn describe_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "empty provider chain".into();
    }
    failures
        .iter()
        .map(|f| format!("{} after {} attempt(s): {}", f.provider, f.attempts, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Hard failure of a turn. The conversation up to this point is preserved.
#[derive(Debug, Error)]
pub enum TurnExecutionError {
    #[error(transparent)]
    ProvidersExhausted(ResilienceError),

    #[error("turn cancelled")]
    Cancelled,
}

impl From<ResilienceError> for TurnExecutionError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::Cancelled => Self::Cancelled,
            other => Self::ProvidersExhausted(other),
        }
    }
}

impl TurnExecutionError {
    /// The only text a user ever sees for a hard failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ProvidersExhausted(_) => {
                "Diagnostics are temporarily unavailable. Please try again in a moment."
            }
            Self::Cancelled => "The diagnostic turn was cancelled.",
        }
    }
}
