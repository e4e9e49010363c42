//! Model providers: clients, selection, connectivity, and resilient calls.

pub mod client;
pub mod connectivity;
pub mod resilience;
pub mod selector;

pub use client::{estimate_cost, OpenAiCompatibleClient};
pub use connectivity::{ConnectivityCheck, HttpConnectivityProbe, StaticConnectivity};
pub use resilience::{ResilientExecutor, ResilientResponse, RetryPolicy};
pub use selector::{
    provider_chain, select, ProviderRouter, ProviderSettings, ProviderSlot, RemoteProvider, TurnPlan,
};

use crate::error::ProviderError;
use crate::tools::ToolSchema;
use crate::types::{ChatMessage, InferenceResponse, ToolChoice};
use async_trait::async_trait;
use std::time::Duration;

/// One model request, independent of the provider serving it.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSchema],
    pub tool_choice: ToolChoice,
    pub max_tokens: u32,
}

/// A backend capable of producing model completions.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider id (e.g. "openai", "ollama").
    fn id(&self) -> &str;

    fn model(&self) -> &str;

    /// Upper bound on a single call, enforced by the executor.
    fn timeout(&self) -> Duration;

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<InferenceResponse, ProviderError>;
}
