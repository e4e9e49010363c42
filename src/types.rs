//! Shared types used across the troubleshooting engine.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A chat message in the multi-turn conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Tool calls requested by the assistant in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Tool` messages: the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Ordered conversation for one session.
///
/// Owned by the session and lent mutably to the tool-calling loop for the
/// duration of a single turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the assistant has spoken at least once in this session.
    pub fn has_assistant_turn(&self) -> bool {
        self.messages.iter().any(|m| m.role == ChatRole::Assistant)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

// ---------------------------------------------------------------------------
// Tool calls and results
// ---------------------------------------------------------------------------

/// Argument key holding the raw text when the model sent arguments that
/// are not a JSON object. The registry refuses such calls.
pub const UNPARSED_ARGUMENTS: &str = "__unparsed_arguments";

/// A tool call request from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Loosely-typed argument mapping; normalized by the registry.
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Ladder verdict derived from a probe's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeVerdict {
    Pass,
    Fail,
    Undetermined,
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    /// The probe output (`success`, `data`, `error`, `suggestions`).
    pub payload: serde_json::Value,
    pub summary: String,
    pub elapsed_ms: u64,
    /// Ladder layer this result speaks for, if any.
    pub layer: Option<u8>,
    pub verdict: ProbeVerdict,
}

impl ToolResult {
    /// A failed result that never reached a handler.
    pub fn failed(call: &ToolCall, summary: impl Into<String>, elapsed_ms: u64) -> Self {
        let summary = summary.into();
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            payload: serde_json::json!({
                "success": false,
                "data": {},
                "error": summary,
                "suggestions": [],
            }),
            summary,
            elapsed_ms,
            layer: None,
            verdict: ProbeVerdict::Undetermined,
        }
    }

    /// Content handed back to the model as the tool message.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(&self.payload).unwrap_or_else(|_| self.summary.clone())
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Whether the provider must call a tool on this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Required,
    Auto,
}

/// Response from inference including potential tool calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// Token usage from an inference call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Provider selected to serve a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderChoice {
    pub provider: String,
    pub model: String,
    pub is_fallback: bool,
}

// ---------------------------------------------------------------------------
// Turn outcome
// ---------------------------------------------------------------------------

/// Everything a completed turn produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Final answer; `None` when the iteration cap hit with no text at all.
    pub answer: Option<String>,
    pub tool_calls_made: usize,
    pub tool_history: Vec<ToolResult>,
    pub usage: TokenUsage,
    pub cost_estimate_usd: f64,
    /// Provider that served the last model call.
    pub provider: String,
    pub model: String,
    pub used_fallback: bool,
    pub cap_hit: bool,
    pub iterations: u32,
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Inbound chat message from the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Summary of one tool call, as shown to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub success: bool,
    pub summary: String,
    pub duration_ms: u64,
}

/// Outbound reply to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub response: String,
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub conversation_id: String,
}
