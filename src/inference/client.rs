//! OpenAI-compatible chat completions client.
//!
//! Serves both remote providers and the local runtime (Ollama, llama.cpp
//! server and LM Studio expose the same `/v1/chat/completions` endpoint).

use crate::error::ProviderError;
use crate::inference::{ChatProvider, ChatRequest};
use crate::types::*;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Chat client for one provider/model pair.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    http: reqwest::Client,
}

// -- OpenAI-compatible request/response types --------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<MessagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolPayload<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToolPayload<'a> {
    r#type: &'a str,
    function: FunctionPayload<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionPayload<'a> {
    name: &'a str,
    description: &'a str,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCallPayload {
    id: String,
    r#type: String,
    function: FunctionCallPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCallPayload {
    name: String,
    /// JSON-encoded string per the OpenAI format; some local runtimes send
    /// an object instead.
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallPayload>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Pricing per 1M tokens (prompt, completion) in USD.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-sonnet-4", 3.00, 15.00),
    ("gemini-2.0-flash", 0.10, 0.40),
];

impl OpenAiCompatibleClient {
    pub fn new(
        id: &str,
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.to_string(),
            timeout,
            http: reqwest::Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/chat/completions", self.base_url)
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }

    fn build_request<'a>(&'a self, request: &'a ChatRequest<'_>) -> CompletionRequest<'a> {
        let messages = request.messages.iter().map(message_payload).collect();

        let tools: Option<Vec<ToolPayload>> = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| ToolPayload {
                        r#type: "function",
                        function: FunctionPayload {
                            name: &t.name,
                            description: &t.description,
                            parameters: t.json_schema(),
                        },
                    })
                    .collect(),
            )
        };

        let tool_choice = tools.as_ref().map(|_| match request.tool_choice {
            ToolChoice::Required => "required",
            ToolChoice::Auto => "auto",
        });

        CompletionRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice,
            max_tokens: request.max_tokens,
            temperature: 0.2,
        }
    }
}

fn message_payload(m: &ChatMessage) -> MessagePayload {
    let tool_calls = (!m.tool_calls.is_empty()).then(|| {
        m.tool_calls
            .iter()
            .map(|tc| ToolCallPayload {
                id: tc.id.clone(),
                r#type: "function".into(),
                function: FunctionCallPayload {
                    name: tc.name.clone(),
                    arguments: serde_json::Value::String(
                        serde_json::Value::Object(tc.arguments.clone()).to_string(),
                    ),
                },
            })
            .collect()
    });
    let content = if m.content.is_empty() && tool_calls.is_some() {
        None
    } else {
        Some(m.content.clone())
    };
    MessagePayload {
        role: m.role.to_string(),
        content,
        tool_calls,
        tool_call_id: m.tool_call_id.clone(),
    }
}

/// Map a non-success HTTP status onto the retry taxonomy.
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status, body.chars().take(500).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ProviderError::Retryable(message)
    } else {
        ProviderError::NonRetryable(message)
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Retryable(err.to_string())
    } else {
        ProviderError::NonRetryable(err.to_string())
    }
}

/// Arguments arrive as a JSON-encoded string (OpenAI) or an object (Ollama).
///
/// Anything that is not an object is kept verbatim under
/// `UNPARSED_ARGUMENTS` so the failed call can quote it back to the model.
fn parse_arguments(tool: &str, raw: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let raw = match raw {
        serde_json::Value::Object(map) => return map,
        serde_json::Value::Null => return serde_json::Map::new(),
        serde_json::Value::String(s) if s.trim().is_empty() => return serde_json::Map::new(),
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(&s) {
            Ok(serde_json::Value::Object(map)) => return map,
            Ok(_) => s,
            Err(e) => {
                warn!("Arguments for {} are not valid JSON ({}): {}", tool, e, s);
                s
            }
        },
        other => other.to_string(),
    };
    let mut args = serde_json::Map::new();
    args.insert(UNPARSED_ARGUMENTS.into(), serde_json::Value::String(raw));
    args
}

fn into_inference_response(body: CompletionResponse) -> Result<InferenceResponse, ProviderError> {
    let Some(choice) = body.choices.into_iter().next() else {
        return Err(ProviderError::NonRetryable("response carried no choices".into()));
    };

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(i, tc)| ToolCall {
            id: if tc.id.is_empty() { format!("call_{i}") } else { tc.id },
            arguments: parse_arguments(&tc.function.name, tc.function.arguments),
            name: tc.function.name,
        })
        .collect();

    let usage = body
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(InferenceResponse {
        content: choice.message.content.filter(|c| !c.trim().is_empty()),
        tool_calls,
        usage,
    })
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<InferenceResponse, ProviderError> {
        let payload = self.build_request(request);
        debug!("Inference request to {}/{}", self.id, self.model);

        let mut builder = self.http.post(self.completions_url()).json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: CompletionResponse = resp.json().await.map_err(|e| {
            ProviderError::NonRetryable(format!("Failed to parse inference response: {e}"))
        })?;

        into_inference_response(body)
    }
}

/// Estimate the USD cost of a token usage for a given model.
///
/// Unknown models (including local ones) are free.
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let Some((prompt_rate, completion_rate)) = MODEL_PRICING
        .iter()
        .find(|(name, _, _)| model.contains(name))
        .map(|(_, p, c)| (*p, *c))
    else {
        return 0.0;
    };

    let prompt_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * prompt_rate;
    let completion_cost = (usage.completion_tokens as f64 / 1_000_000.0) * completion_rate;
    prompt_cost + completion_cost
}
