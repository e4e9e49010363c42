//! Configuration schema for troubleshooter.toml.

use crate::inference::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TroubleshooterConfig {
    /// Human-readable assistant name.
    pub name: String,

    /// Provider responses with tool calls allowed per turn.
    pub max_iterations: u32,

    /// Default bound on a probe invocation, when the catalog sets none.
    pub tool_timeout_secs: u64,

    /// Conversation messages sent with each model request.
    pub history_window: usize,

    /// Maximum tokens per model response.
    pub max_tokens_per_turn: u32,

    /// Extra instructions appended to the system prompt.
    pub operator_notes: String,

    /// Path to the probe catalog (YAML). Built-in catalog if missing.
    pub probes_file: String,

    /// Directory holding probe scripts; substituted for `{probes_dir}`.
    pub probes_dir: String,

    /// Path to the analytics SQLite database.
    pub db_path: String,

    /// Log level (debug, info, warn, error).
    pub log_level: String,

    pub connectivity: ConnectivityConfig,

    pub retry: RetryConfig,

    /// Remote providers, highest priority first.
    pub providers: Vec<ProviderConfig>,

    /// The always-available local provider.
    pub local: LocalProviderConfig,
}

impl Default for TroubleshooterConfig {
    fn default() -> Self {
        Self {
            name: "troubleshooter".into(),
            max_iterations: 10,
            tool_timeout_secs: 30,
            history_window: 40,
            max_tokens_per_turn: 2048,
            operator_notes: String::new(),
            probes_file: "~/.troubleshooter/probes.yml".into(),
            probes_dir: "~/.troubleshooter/probes".into(),
            db_path: "~/.troubleshooter/analytics.db".into(),
            log_level: "info".into(),
            connectivity: ConnectivityConfig::default(),
            retry: RetryConfig::default(),
            providers: vec![
                ProviderConfig {
                    id: "openai".into(),
                    base_url: "https://api.openai.com".into(),
                    model: "gpt-4o-mini".into(),
                    api_key: String::new(),
                    api_key_env: "OPENAI_API_KEY".into(),
                    timeout_secs: 60,
                },
                ProviderConfig {
                    id: "anthropic".into(),
                    base_url: "https://api.anthropic.com/v1".into(),
                    model: "claude-3-5-haiku-latest".into(),
                    api_key: String::new(),
                    api_key_env: "ANTHROPIC_API_KEY".into(),
                    timeout_secs: 60,
                },
            ],
            local: LocalProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Endpoint hit once per turn to decide online vs offline.
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            url: "https://www.google.com/generate_204".into(),
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

/// A remote OpenAI-compatible provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,
    pub model: String,
    /// Inline key. Prefer `api_key_env`.
    pub api_key: String,
    /// Environment variable holding the key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            base_url: String::new(),
            model: String::new(),
            api_key: String::new(),
            api_key_env: String::new(),
            timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    /// Inline key first, then the environment. Empty values count as absent.
    pub fn resolve_credential(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_string());
        }
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub id: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            id: "ollama".into(),
            base_url: "http://localhost:11434".into(),
            model: "llama3.1:8b".into(),
            timeout_secs: 120,
        }
    }
}

impl LocalProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl TroubleshooterConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved database path.
    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.db_path)
    }

    /// Resolved probe catalog path.
    pub fn resolved_probes_file(&self) -> String {
        self.resolve_path(&self.probes_file)
    }

    /// Resolved probe script directory.
    pub fn resolved_probes_dir(&self) -> String {
        self.resolve_path(&self.probes_dir)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn operator_notes(&self) -> Option<&str> {
        Some(self.operator_notes.as_str()).filter(|n| !n.trim().is_empty())
    }
}
