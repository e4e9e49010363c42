pub mod catalog;
pub mod probe;
pub mod probe_scripts;
pub mod traits;

pub use catalog::{ProbeCatalog, ProbeSpec};
pub use probe::ScriptProbe;
pub use traits::{
    ParamType, ParameterSchema, ProbeOutput, ToolDefinition, ToolHandler, ToolParameter,
    ToolSchema,
};

use crate::error::ToolError;
use crate::events::EventEmitter;
use crate::types::{ProbeVerdict, ToolCall, ToolResult, UNPARSED_ARGUMENTS};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default bound on a single handler invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Data fields consulted, in order, when a probe omits its own verdict.
const VERDICT_FIELDS: &[&str] = &["connected", "reachable", "working"];

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of diagnostic tools.
///
/// Built once at startup and then shared read-only, so lookups need no
/// synchronization.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
    default_timeout: Duration,
    events: EventEmitter,
}

impl ToolRegistry {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            events,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Names must be unique.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        if self.tools.contains_key(&definition.name) {
            return Err(ToolError::DuplicateTool(definition.name));
        }
        debug!("Registered tool: {}", definition.name);
        self.order.push(definition.name.clone());
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Provider-facing schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition.schema())
            .collect()
    }

    /// Execute a call, reporting timing to the registry's own emitter.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        self.execute_with(call, &self.events).await
    }

    /// Execute a call, reporting timing to `events`.
    ///
    /// Only an unknown tool name is an error; handler failures and timeouts
    /// come back as a failed `ToolResult`.
    pub async fn execute_with(
        &self,
        call: &ToolCall,
        events: &EventEmitter,
    ) -> Result<ToolResult, ToolError> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!("Provider requested unknown tool: {}", call.name);
            events.tool(&call.name, 0, false, Some(format!("unknown tool: {}", call.name)));
            return Err(ToolError::UnknownTool(call.name.clone()));
        };

        let started = Instant::now();
        let args = normalize_arguments(&tool.definition, &call.arguments);

        let missing: Vec<&str> = tool
            .definition
            .parameters
            .iter()
            .filter(|p| p.required && !args.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect();

        let unparsed = call.arguments.get(UNPARSED_ARGUMENTS).and_then(Value::as_str);

        let result = if let Some(raw) = unparsed {
            let summary = format!("Arguments must be a JSON object, got: {raw}");
            let mut result = ToolResult::failed(call, summary, elapsed_ms(started));
            result.layer = tool.definition.layer;
            result
        } else if !missing.is_empty() {
            let summary = format!("Missing required argument(s): {}", missing.join(", "));
            let mut result = ToolResult::failed(call, summary, elapsed_ms(started));
            result.layer = tool.definition.layer;
            result
        } else {
            let timeout = tool.definition.timeout.unwrap_or(self.default_timeout);
            let outcome = tokio::time::timeout(timeout, tool.handler.invoke(&args)).await;
            let output = match outcome {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => ProbeOutput::failed(format!("{e:#}"), Value::Null),
                Err(_) => ProbeOutput::failed(
                    format!("{} timed out after {}s", call.name, timeout.as_secs()),
                    Value::Null,
                ),
            };
            build_result(call, &tool.definition, output, elapsed_ms(started))
        };

        if result.success {
            debug!("Tool {} succeeded in {}ms", call.name, result.elapsed_ms);
        } else {
            warn!("Tool {} failed: {}", call.name, result.summary);
        }

        let error = (!result.success).then(|| result.summary.clone());
        events.tool(&call.name, result.elapsed_ms, result.success, error);
        Ok(result)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Resolve aliases to canonical names and fill defaults.
///
/// Arguments the definition does not know about are kept as-is.
pub fn normalize_arguments(
    definition: &ToolDefinition,
    raw: &Map<String, Value>,
) -> Map<String, Value> {
    let mut args = raw.clone();

    for param in &definition.parameters {
        if !args.contains_key(&param.name) {
            let alias_hit = param.aliases.iter().find(|a| args.contains_key(a.as_str()));
            if let Some(alias) = alias_hit.cloned() {
                if let Some(value) = args.remove(&alias) {
                    args.insert(param.name.clone(), value);
                }
            }
        }

        if !args.contains_key(&param.name) {
            if let Some(default) = &param.default {
                args.insert(param.name.clone(), default.clone());
            }
        }
    }

    args
}

/// Probe `success` wins; when absent, the first boolean verdict field in
/// `data` decides.
pub fn resolve_verdict(output: &ProbeOutput) -> ProbeVerdict {
    let flag = output.success.or_else(|| {
        VERDICT_FIELDS
            .iter()
            .find_map(|field| output.data.get(*field).and_then(Value::as_bool))
    });
    match flag {
        Some(true) => ProbeVerdict::Pass,
        Some(false) => ProbeVerdict::Fail,
        None => ProbeVerdict::Undetermined,
    }
}

fn build_result(
    call: &ToolCall,
    definition: &ToolDefinition,
    output: ProbeOutput,
    elapsed_ms: u64,
) -> ToolResult {
    let verdict = resolve_verdict(&output);
    let success = match verdict {
        ProbeVerdict::Pass => true,
        ProbeVerdict::Fail => false,
        ProbeVerdict::Undetermined => output.error.is_none(),
    };

    let layer = output
        .data
        .get("layer")
        .and_then(Value::as_u64)
        .and_then(|l| u8::try_from(l).ok())
        .or(definition.layer);

    let summary = match (&output.error, success) {
        (Some(err), _) => err.clone(),
        (None, true) => format!("{} completed", call.name),
        (None, false) => format!("{} reported a failure", call.name),
    };

    ToolResult {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        success,
        payload: serde_json::to_value(&output).unwrap_or(Value::Null),
        summary,
        elapsed_ms,
        layer,
        verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the arguments it receives and replies with a canned output.
    struct EchoHandler {
        seen: Mutex<Vec<Map<String, Value>>>,
        reply: ProbeOutput,
    }

    impl EchoHandler {
        fn new(reply: ProbeOutput) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                reply,
            })
        }
    }

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<ProbeOutput> {
            self.seen.lock().unwrap().push(args.clone());
            Ok(self.reply.clone())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn invoke(&self, _args: &Map<String, Value>) -> anyhow::Result<ProbeOutput> {
            Err(anyhow!("permission denied"))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl ToolHandler for SlowHandler {
        async fn invoke(&self, _args: &Map<String, Value>) -> anyhow::Result<ProbeOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ProbeOutput::ok(json!({})))
        }
    }

    fn ping_definition() -> ToolDefinition {
        ToolDefinition::new("ping_address", "Ping a host")
            .param(
                ToolParameter::required("host", ParamType::String, "Host")
                    .with_aliases(&["target", "address"]),
            )
            .param(ToolParameter::optional("count", ParamType::Integer, "Count", json!(4)))
            .layer(5)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry
            .register(ping_definition(), EchoHandler::new(ProbeOutput::ok(json!({}))))
            .unwrap();
        let err = registry
            .register(ping_definition(), EchoHandler::new(ProbeOutput::ok(json!({}))))
            .unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool(name) if name == "ping_address"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_and_still_emits() {
        let sink = Arc::new(MemorySink::new());
        let registry = ToolRegistry::new(EventEmitter::new().with_sink(sink.clone()));
        let err = registry.execute(&call("format_disk", json!({}))).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
        assert_eq!(sink.tool_events().len(), 1);
        assert!(!sink.tool_events()[0].success);
    }

    #[tokio::test]
    async fn required_only_call_gets_defaults_filled() {
        let handler = EchoHandler::new(ProbeOutput::ok(json!({"reachable": true})));
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry.register(ping_definition(), handler.clone()).unwrap();

        let result = registry
            .execute(&call("ping_address", json!({"host": "1.1.1.1"})))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.layer, Some(5));
        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen[0]["host"], "1.1.1.1");
        assert_eq!(seen[0]["count"], 4);
    }

    #[tokio::test]
    async fn aliases_resolve_and_extras_survive() {
        let handler = EchoHandler::new(ProbeOutput::ok(json!({})));
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry.register(ping_definition(), handler.clone()).unwrap();

        registry
            .execute(&call(
                "ping_address",
                json!({"target": "8.8.8.8", "count": 2, "verbose": true}),
            ))
            .await
            .unwrap();

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen[0]["host"], "8.8.8.8");
        assert!(seen[0].get("target").is_none());
        assert_eq!(seen[0]["count"], 2);
        assert_eq!(seen[0]["verbose"], true);
    }

    #[tokio::test]
    async fn missing_required_argument_fails_without_invoking() {
        let handler = EchoHandler::new(ProbeOutput::ok(json!({})));
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry.register(ping_definition(), handler.clone()).unwrap();

        let result = registry.execute(&call("ping_address", json!({}))).await.unwrap();
        assert!(!result.success);
        assert!(result.summary.contains("host"));
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_arguments_are_quoted_back() {
        let handler = EchoHandler::new(ProbeOutput::ok(json!({})));
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry.register(ping_definition(), handler.clone()).unwrap();

        let result = registry
            .execute(&call("ping_address", json!({UNPARSED_ARGUMENTS: "{host: 1.1.1.1"})))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.summary.contains("{host: 1.1.1.1"));
        assert!(!result.summary.contains("Missing required"));
        assert_eq!(result.verdict, ProbeVerdict::Undetermined);
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let sink = Arc::new(MemorySink::new());
        let mut registry = ToolRegistry::new(EventEmitter::new().with_sink(sink.clone()));
        registry
            .register(
                ToolDefinition::new("check_adapter_status", "Adapter").layer(1),
                Arc::new(FailingHandler),
            )
            .unwrap();

        let result = registry
            .execute(&call("check_adapter_status", json!({})))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.summary, "permission denied");
        assert_eq!(result.verdict, ProbeVerdict::Fail);
        assert_eq!(result.layer, Some(1));
        assert_eq!(sink.tool_events()[0].error.as_deref(), Some("permission denied"));
    }

    #[tokio::test]
    async fn handler_timeout_becomes_failed_result() {
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry
            .register(
                ToolDefinition::new("ping_gateway", "Gateway").timeout(Duration::from_millis(20)),
                Arc::new(SlowHandler),
            )
            .unwrap();

        let result = registry.execute(&call("ping_gateway", json!({}))).await.unwrap();
        assert!(!result.success);
        assert!(result.summary.contains("timed out"));
    }

    #[test]
    fn probe_success_wins_over_data_fields() {
        let output = ProbeOutput {
            success: Some(true),
            data: json!({"connected": false}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        assert_eq!(resolve_verdict(&output), ProbeVerdict::Pass);
    }

    #[test]
    fn data_fields_decide_when_success_absent() {
        let output = ProbeOutput {
            success: None,
            data: json!({"reachable": false}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        assert_eq!(resolve_verdict(&output), ProbeVerdict::Fail);

        let empty = ProbeOutput::default();
        assert_eq!(resolve_verdict(&empty), ProbeVerdict::Undetermined);
    }

    #[tokio::test]
    async fn data_layer_overrides_definition_layer() {
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry
            .register(
                ToolDefinition::new("network_summary", "Summary").layer(3),
                EchoHandler::new(ProbeOutput::ok(json!({"layer": 2}))),
            )
            .unwrap();
        let result = registry
            .execute(&call("network_summary", json!({})))
            .await
            .unwrap();
        assert_eq!(result.layer, Some(2));
    }

    #[test]
    fn schemas_keep_registration_order() {
        let mut registry = ToolRegistry::new(EventEmitter::new());
        for name in ["check_adapter_status", "get_ip_config", "ping_gateway"] {
            registry
                .register(
                    ToolDefinition::new(name, name),
                    EchoHandler::new(ProbeOutput::ok(json!({}))),
                )
                .unwrap();
        }
        let names: Vec<String> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["check_adapter_status", "get_ip_config", "ping_gateway"]);
    }
}
