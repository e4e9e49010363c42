//! Retry within a provider, fall back across providers.
//!
//! Transient failures are retried on the same provider with exponential
//! backoff; anything else, or an exhausted retry budget, moves to the next
//! provider in the chain.

use crate::error::{ProviderError, ProviderFailure, ResilienceError};
use crate::events::EventEmitter;
use crate::inference::{ChatProvider, ChatRequest};
use crate::types::InferenceResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded retry policy for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// A successful call and where it came from.
#[derive(Debug, Clone)]
pub struct ResilientResponse {
    pub response: InferenceResponse,
    pub provider: String,
    pub model: String,
    /// Served by a provider other than the first in the chain.
    pub is_fallback: bool,
    /// Attempts made on the serving provider.
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ResilientExecutor {
    policy: RetryPolicy,
}

impl ResilientExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Walk `chain` until one provider answers.
    pub async fn call_with_resilience(
        &self,
        request: &ChatRequest<'_>,
        chain: &[Arc<dyn ChatProvider>],
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ResilientResponse, ResilienceError> {
        let mut failures: Vec<ProviderFailure> = Vec::new();

        for (index, provider) in chain.iter().enumerate() {
            let (attempts, error) = match self.try_provider(provider.as_ref(), request, cancel).await {
                Ok((response, attempts)) => {
                    return Ok(ResilientResponse {
                        response,
                        provider: provider.id().to_string(),
                        model: provider.model().to_string(),
                        is_fallback: index > 0,
                        attempts,
                    })
                }
                Err(Attempt::Cancelled) => return Err(ResilienceError::Cancelled),
                Err(Attempt::Failed { attempts, error }) => (attempts, error),
            };

            let next = chain.get(index + 1).map(|p| p.id());
            warn!(
                "Provider {} failed after {} attempt(s): {}",
                provider.id(),
                attempts,
                error
            );
            events.fallback(provider.id(), next, &error.to_string());
            failures.push(ProviderFailure {
                provider: provider.id().to_string(),
                attempts,
                error,
            });
        }

        Err(ResilienceError::AllProvidersExhausted(failures))
    }

    async fn try_provider(
        &self,
        provider: &dyn ChatProvider,
        request: &ChatRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(InferenceResponse, u32), Attempt> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let timeout = provider.timeout();
            let call = tokio::time::timeout(timeout, provider.chat(request));

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Attempt::Cancelled),
                outcome = call => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::timed_out(timeout)),
                },
            };

            let error = match result {
                Ok(response) if is_empty(&response) => {
                    ProviderError::NonRetryable("empty response: no text and no tool calls".into())
                }
                Ok(response) => return Ok((response, attempt)),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(Attempt::Failed {
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.policy.backoff(attempt);
            debug!(
                "Retrying {} in {:?} (attempt {}/{}): {}",
                provider.id(),
                delay,
                attempt + 1,
                max_attempts,
                error
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Attempt::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn is_empty(response: &InferenceResponse) -> bool {
    response.tool_calls.is_empty()
        && response.content.as_deref().map_or(true, |c| c.trim().is_empty())
}

enum Attempt {
    Cancelled,
    Failed { attempts: u32, error: ProviderError },
}
