//! Tool-calling loop: Think → Act → Observe, bounded per turn.
//!
//! One call to `run_turn`:
//! 1. Plans the provider chain once for the turn
//! 2. Calls the model with the tool catalog
//! 3. Dispatches requested tools sequentially, feeding results to the ladder
//! 4. Repeats until the model answers in plain text or the cap is hit

use crate::agent::{context, system_prompt};
use crate::error::TurnExecutionError;
use crate::events::{EventEmitter, TurnEvent};
use crate::inference::{estimate_cost, ChatRequest, ProviderRouter, ResilientExecutor};
use crate::ladder::{LadderCorrelator, Layer, Transition};
use crate::tools::ToolRegistry;
use crate::types::*;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-turn limits.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Provider responses carrying tool calls allowed in one turn.
    pub max_iterations: u32,
    pub max_tokens: u32,
    /// Conversation messages sent with each request.
    pub history_window: usize,
    pub operator_notes: Option<String>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tokens: 2048,
            history_window: 40,
            operator_notes: None,
        }
    }
}

enum LoopState {
    AwaitingProvider,
    ExecutingTools(Vec<ToolCall>),
    Done { answer: Option<String>, cap_hit: bool },
    Aborted(TurnExecutionError),
}

/// Bookkeeping accumulated over one turn.
struct TurnProgress {
    iterations: u32,
    tool_history: Vec<ToolResult>,
    usage: TokenUsage,
    cost: f64,
    provider: String,
    model: String,
    used_fallback: bool,
    partial_answer: Option<String>,
}

impl TurnProgress {
    fn turn_event(&self, cap_hit: bool, failed: bool) -> TurnEvent {
        TurnEvent {
            session_id: None,
            provider: self.provider.clone(),
            model: self.model.clone(),
            is_fallback: self.used_fallback,
            tool_calls_made: self.tool_history.len(),
            tokens_used: (self.usage.total_tokens > 0).then_some(self.usage.total_tokens),
            cap_hit,
            failed,
        }
    }
}

pub struct ToolCallingLoop {
    registry: Arc<ToolRegistry>,
    router: Arc<ProviderRouter>,
    executor: ResilientExecutor,
    settings: LoopSettings,
}

impl ToolCallingLoop {
    pub fn new(
        registry: Arc<ToolRegistry>,
        router: Arc<ProviderRouter>,
        executor: ResilientExecutor,
        settings: LoopSettings,
    ) -> Self {
        Self {
            registry,
            router,
            executor,
            settings,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run one turn over `conversation`, which must already end with the
    /// user's message.
    ///
    /// Assistant and tool messages are appended as they happen, so a hard
    /// failure leaves everything up to that point in place.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        ladder: &mut LadderCorrelator,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, TurnExecutionError> {
        let started = Instant::now();
        let plan = self.router.plan().await;
        let tools = self.registry.schemas();
        let force_tool = !conversation.has_assistant_turn();

        let mut progress = TurnProgress {
            iterations: 0,
            tool_history: Vec::new(),
            usage: TokenUsage::default(),
            cost: 0.0,
            provider: plan.choice.provider.clone(),
            model: plan.choice.model.clone(),
            used_fallback: plan.choice.is_fallback,
            partial_answer: None,
        };

        let mut state = LoopState::AwaitingProvider;
        let (answer, cap_hit) = loop {
            state = match state {
                LoopState::AwaitingProvider => {
                    if progress.iterations >= self.settings.max_iterations {
                        warn!(
                            "Iteration cap ({}) reached; returning partial answer",
                            self.settings.max_iterations
                        );
                        LoopState::Done {
                            answer: progress.partial_answer.clone(),
                            cap_hit: true,
                        }
                    } else {
                        let tool_choice = if progress.iterations == 0 && force_tool && !tools.is_empty() {
                            ToolChoice::Required
                        } else {
                            ToolChoice::Auto
                        };
                        let prompt = system_prompt::build_system_prompt(
                            ladder,
                            self.settings.operator_notes.as_deref(),
                        );
                        let messages =
                            context::build_messages(&prompt, conversation, self.settings.history_window);
                        let request = ChatRequest {
                            messages: &messages,
                            tools: &tools,
                            tool_choice,
                            max_tokens: self.settings.max_tokens,
                        };

                        match self
                            .executor
                            .call_with_resilience(&request, &plan.chain, events, cancel)
                            .await
                        {
                            Ok(served) => {
                                progress.usage.add(&served.response.usage);
                                progress.cost += estimate_cost(&served.model, &served.response.usage);
                                progress.used_fallback |= served.is_fallback;
                                progress.provider = served.provider;
                                progress.model = served.model;
                                self.absorb_response(served.response, conversation, &mut progress)
                            }
                            Err(e) => LoopState::Aborted(e.into()),
                        }
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    match self
                        .dispatch_tools(&calls, conversation, ladder, events, cancel, &mut progress)
                        .await
                    {
                        Ok(()) => {
                            progress.iterations += 1;
                            LoopState::AwaitingProvider
                        }
                        Err(e) => LoopState::Aborted(e),
                    }
                }
                LoopState::Done { answer, cap_hit } => break (answer, cap_hit),
                LoopState::Aborted(err) => {
                    warn!("Turn aborted after {} iteration(s): {}", progress.iterations, err);
                    if !matches!(err, TurnExecutionError::Cancelled) {
                        events.turn(progress.turn_event(false, true));
                    }
                    return Err(err);
                }
            };
        };

        let tool_calls_made = progress.tool_history.len();
        events.turn(progress.turn_event(cap_hit, false));
        info!(
            "Turn finished in {:?}: {} tool call(s), {} iteration(s), provider {}",
            started.elapsed(),
            tool_calls_made,
            progress.iterations,
            progress.provider
        );

        Ok(ExecutionResult {
            answer,
            tool_calls_made,
            tool_history: progress.tool_history,
            usage: progress.usage,
            cost_estimate_usd: progress.cost,
            provider: progress.provider,
            model: progress.model,
            used_fallback: progress.used_fallback,
            cap_hit,
            iterations: progress.iterations,
        })
    }

    /// Record the model's reply and decide what happens next.
    fn absorb_response(
        &self,
        response: InferenceResponse,
        conversation: &mut Conversation,
        progress: &mut TurnProgress,
    ) -> LoopState {
        let text = response.content.filter(|c| !c.trim().is_empty());

        if response.tool_calls.is_empty() {
            conversation.push(ChatMessage::assistant(text.clone().unwrap_or_default(), Vec::new()));
            return LoopState::Done {
                answer: text.or_else(|| progress.partial_answer.clone()),
                cap_hit: false,
            };
        }

        if let Some(ref t) = text {
            debug!("Model reasoning: {}", t.chars().take(200).collect::<String>());
            progress.partial_answer = Some(t.clone());
        }
        conversation.push(ChatMessage::assistant(
            text.unwrap_or_default(),
            response.tool_calls.clone(),
        ));
        LoopState::ExecutingTools(response.tool_calls)
    }

    /// Execute `calls` in order. On cancellation the remaining calls are
    /// answered with a cancellation notice so the conversation stays valid,
    /// and the ladder is left as it was before the interrupted probe. The
    /// same rollback applies to a result with an undetermined verdict.
    async fn dispatch_tools(
        &self,
        calls: &[ToolCall],
        conversation: &mut Conversation,
        ladder: &mut LadderCorrelator,
        events: &EventEmitter,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> Result<(), TurnExecutionError> {
        for (index, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                close_unanswered(&calls[index..], conversation);
                return Err(TurnExecutionError::Cancelled);
            }

            info!("Tool: {}({})", call.name, serde_json::Value::Object(call.arguments.clone()));

            let before = ladder.clone();
            if let Some(layer) = self
                .registry
                .get(&call.name)
                .and_then(|d| d.layer)
                .and_then(Layer::from_id)
            {
                ladder.mark_testing(layer);
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.registry.execute_with(call, events) => Some(r),
            };

            let result = match outcome {
                None => {
                    *ladder = before;
                    close_unanswered(&calls[index..], conversation);
                    return Err(TurnExecutionError::Cancelled);
                }
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    let available: Vec<String> =
                        self.registry.schemas().into_iter().map(|s| s.name).collect();
                    ToolResult::failed(
                        call,
                        format!("{e}. Available tools: {}", available.join(", ")),
                        started.elapsed().as_millis() as u64,
                    )
                }
            };

            // An undetermined result says nothing about the layer.
            if result.verdict == ProbeVerdict::Undetermined {
                *ladder = before;
            }

            match ladder.observe(&result) {
                Transition::Failed { layer, skipped } => {
                    info!("Layer {} ({}) failed; {} layer(s) skipped", layer.id(), layer, skipped)
                }
                Transition::Ignored => debug!("Ladder already concluded; {} ignored", call.name),
                _ => {}
            }

            conversation.push(ChatMessage::tool(&call.id, result.to_message_content()));
            progress.tool_history.push(result);
        }
        Ok(())
    }
}

fn close_unanswered(calls: &[ToolCall], conversation: &mut Conversation) {
    for call in calls {
        let notice = serde_json::json!({
            "success": false,
            "data": {},
            "error": "cancelled before completion",
            "suggestions": [],
        });
        conversation.push(ChatMessage::tool(&call.id, notice.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::events::MemorySink;
    use crate::inference::{ChatProvider, RemoteProvider, RetryPolicy, StaticConnectivity};
    use crate::ladder::LayerStatus;
    use crate::tools::{ParamType, ProbeOutput, ToolDefinition, ToolHandler, ToolParameter};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted responses and records the tool choice of each call.
    struct ScriptedProvider {
        id: &'static str,
        script: Mutex<VecDeque<Result<InferenceResponse, ProviderError>>>,
        repeat_tool: Option<&'static str>,
        choices: Mutex<Vec<ToolChoice>>,
    }

    impl ScriptedProvider {
        fn new(id: &'static str, script: Vec<Result<InferenceResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                id,
                script: Mutex::new(script.into()),
                repeat_tool: None,
                choices: Mutex::new(Vec::new()),
            })
        }

        /// Requests `tool` on every call, forever.
        fn looping(id: &'static str, tool: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                script: Mutex::new(VecDeque::new()),
                repeat_tool: Some(tool),
                choices: Mutex::new(Vec::new()),
            })
        }

        fn choices(&self) -> Vec<ToolChoice> {
            self.choices.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn id(&self) -> &str {
            self.id
        }
        fn model(&self) -> &str {
            "test-model"
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(2)
        }
        async fn chat(&self, request: &ChatRequest<'_>) -> Result<InferenceResponse, ProviderError> {
            self.choices.lock().unwrap().push(request.tool_choice);
            if let Some(tool) = self.repeat_tool {
                let n = self.choices.lock().unwrap().len();
                return Ok(tool_calls(&format!("thinking {n}"), &[tool]));
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text("done")))
        }
    }

    struct FixedProbe(ProbeOutput);

    #[async_trait]
    impl ToolHandler for FixedProbe {
        async fn invoke(&self, _args: &Map<String, Value>) -> anyhow::Result<ProbeOutput> {
            Ok(self.0.clone())
        }
    }

    /// Hangs long enough to be cancelled; counts invocations.
    #[derive(Default)]
    struct HangingTool {
        invocations: AtomicU32,
    }

    #[async_trait]
    impl ToolHandler for HangingTool {
        async fn invoke(&self, _args: &Map<String, Value>) -> anyhow::Result<ProbeOutput> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ProbeOutput::ok(json!({})))
        }
    }

    fn text(content: &str) -> InferenceResponse {
        InferenceResponse {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }
    }

    fn tool_calls(content: &str, names: &[&str]) -> InferenceResponse {
        InferenceResponse {
            content: Some(content.into()),
            tool_calls: names
                .iter()
                .enumerate()
                .map(|(i, name)| ToolCall {
                    id: format!("call_{name}_{i}"),
                    name: name.to_string(),
                    arguments: Map::new(),
                })
                .collect(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }
    }

    fn registry(outputs: &[(&str, u8, ProbeOutput)]) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new(EventEmitter::new());
        for (name, layer, output) in outputs {
            registry
                .register(
                    ToolDefinition::new(*name, *name).layer(*layer),
                    Arc::new(FixedProbe(output.clone())),
                )
                .unwrap();
        }
        Arc::new(registry)
    }

    fn engine(registry: Arc<ToolRegistry>, provider: Arc<ScriptedProvider>, max_iterations: u32) -> ToolCallingLoop {
        let router = ProviderRouter::new(
            Vec::<RemoteProvider>::new(),
            provider,
            Arc::new(StaticConnectivity(false)),
        );
        ToolCallingLoop::new(
            registry,
            Arc::new(router),
            ResilientExecutor::new(RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            }),
            LoopSettings {
                max_iterations,
                ..Default::default()
            },
        )
    }

    fn user_turn(message: &str) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.push(ChatMessage::user(message));
        conversation
    }

    #[tokio::test]
    async fn adapter_failure_stops_the_ladder() {
        let registry = registry(&[(
            "check_adapter_status",
            1,
            ProbeOutput::failed("adapter disabled", json!({"enabled": false})),
        )]);
        let provider = ScriptedProvider::new(
            "ollama",
            vec![
                Ok(tool_calls("", &["check_adapter_status"])),
                Ok(text("Your Wi-Fi adapter is disabled. Turn it on.")),
            ],
        );
        let engine = engine(registry, provider, 10);
        let mut conversation = user_turn("my internet is not working");
        let mut ladder = LadderCorrelator::new();

        let result = engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.tool_calls_made, 1);
        assert!(!result.cap_hit);
        assert!(result.answer.unwrap().contains("disabled"));
        assert_eq!(ladder.status(Layer::Physical), LayerStatus::Fail);
        for layer in [Layer::Link, Layer::Network, Layer::Resolution, Layer::Application] {
            assert_eq!(ladder.status(layer), LayerStatus::Skipped);
        }
        // user, assistant(tool call), tool, assistant(answer)
        assert_eq!(conversation.len(), 4);
        assert_eq!(conversation.messages()[2].role, ChatRole::Tool);
    }

    #[tokio::test]
    async fn all_layers_pass_in_order() {
        let names = [
            "check_adapter_status",
            "get_ip_config",
            "ping_gateway",
            "test_dns_resolution",
            "test_connectivity",
        ];
        let outputs: Vec<(&str, u8, ProbeOutput)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (*n, (i + 1) as u8, ProbeOutput::ok(json!({}))))
            .collect();
        let provider = ScriptedProvider::new(
            "ollama",
            vec![
                Ok(tool_calls("", &names[..2])),
                Ok(tool_calls("", &names[2..])),
                Ok(text("Everything checks out.")),
            ],
        );
        let engine = engine(registry(&outputs), provider, 10);
        let mut conversation = user_turn("is my network ok?");
        let mut ladder = LadderCorrelator::new();

        let result = engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.tool_calls_made, 5);
        assert_eq!(result.iterations, 2);
        assert!(Layer::ALL.iter().all(|l| ladder.status(*l) == LayerStatus::Pass));
        assert!(ladder.is_concluded());
        assert_eq!(result.usage.total_tokens, 45);
    }

    #[tokio::test]
    async fn iteration_cap_returns_partial_answer() {
        let provider = ScriptedProvider::looping("ollama", "ping_gateway");
        let engine = engine(
            registry(&[("ping_gateway", 3, ProbeOutput::ok(json!({})))]),
            provider.clone(),
            3,
        );
        let sink = Arc::new(MemorySink::new());
        let events = EventEmitter::new().with_sink(sink.clone());
        let mut conversation = user_turn("check again");
        let mut ladder = LadderCorrelator::new();

        let result = engine
            .run_turn(&mut conversation, &mut ladder, &events, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.cap_hit);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.tool_calls_made, 3);
        assert_eq!(provider.choices().len(), 3);
        assert_eq!(result.answer.as_deref(), Some("thinking 3"));
        let turns = sink.turn_events();
        assert_eq!(turns.len(), 1);
        assert!(turns[0].cap_hit);
    }

    #[tokio::test]
    async fn tool_is_required_only_on_first_call_of_a_fresh_conversation() {
        let provider = ScriptedProvider::new(
            "ollama",
            vec![Ok(tool_calls("", &["ping_gateway"])), Ok(text("Gateway answers."))],
        );
        let engine = engine(
            registry(&[("ping_gateway", 3, ProbeOutput::ok(json!({})))]),
            provider.clone(),
            10,
        );
        let mut conversation = user_turn("is the router up?");
        let mut ladder = LadderCorrelator::new();
        engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.choices(), [ToolChoice::Required, ToolChoice::Auto]);

        // Second turn of the same session: the assistant has spoken already.
        conversation.push(ChatMessage::user("thanks, and DNS?"));
        engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.choices()[2], ToolChoice::Auto);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_back_to_the_model() {
        let provider = ScriptedProvider::new(
            "ollama",
            vec![Ok(tool_calls("", &["format_disk"])), Ok(text("Sorry, I can't do that."))],
        );
        let engine = engine(
            registry(&[("ping_gateway", 3, ProbeOutput::ok(json!({})))]),
            provider,
            10,
        );
        let mut conversation = user_turn("wipe it");
        let mut ladder = LadderCorrelator::new();
        let result = engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.tool_history.len(), 1);
        assert!(!result.tool_history[0].success);
        assert!(result.tool_history[0].summary.contains("ping_gateway"));
        assert!(!ladder.is_started());
    }

    #[tokio::test]
    async fn exhausted_providers_keep_the_user_message() {
        let provider = ScriptedProvider::new(
            "ollama",
            vec![Err(ProviderError::NonRetryable("model not found".into()))],
        );
        let engine = engine(registry(&[]), provider, 10);
        let mut conversation = user_turn("hello?");
        let mut ladder = LadderCorrelator::new();

        let err = engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TurnExecutionError::ProvidersExhausted(_)));
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0].content, "hello?");
    }

    #[tokio::test]
    async fn cancelled_turn_issues_no_tool_calls() {
        let provider = ScriptedProvider::new("ollama", vec![Ok(tool_calls("", &["ping_gateway"]))]);
        let engine = engine(
            registry(&[("ping_gateway", 3, ProbeOutput::ok(json!({})))]),
            provider,
            10,
        );
        let sink = Arc::new(MemorySink::new());
        let events = EventEmitter::new().with_sink(sink.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut conversation = user_turn("check");
        let mut ladder = LadderCorrelator::new();

        let err = engine
            .run_turn(&mut conversation, &mut ladder, &events, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TurnExecutionError::Cancelled));
        assert!(sink.tool_events().is_empty());
        assert!(sink.turn_events().is_empty());
        assert!(!ladder.is_started());
    }

    #[tokio::test]
    async fn cancelling_mid_tool_rolls_back_and_closes_remaining_calls() {
        let hanging = Arc::new(HangingTool::default());
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry
            .register(ToolDefinition::new("get_ip_config", "Addressing").layer(2), hanging.clone())
            .unwrap();
        let provider = ScriptedProvider::new(
            "ollama",
            vec![Ok(tool_calls("", &["get_ip_config", "get_ip_config"]))],
        );
        let engine = engine(Arc::new(registry), provider, 10);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let mut conversation = user_turn("do I have an address?");
        let mut ladder = LadderCorrelator::new();

        let err = engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TurnExecutionError::Cancelled));
        assert_eq!(hanging.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(ladder.status(Layer::Link), LayerStatus::Pending);
        assert_eq!(ladder.current(), None);

        // user, assistant(two calls), two cancellation notices
        let messages = conversation.messages();
        assert_eq!(messages.len(), 4);
        for (message, id) in messages[2..].iter().zip(["call_get_ip_config_0", "call_get_ip_config_1"]) {
            assert_eq!(message.role, ChatRole::Tool);
            assert_eq!(message.tool_call_id.as_deref(), Some(id));
            assert!(message.content.contains("cancelled before completion"));
        }
    }

    #[tokio::test]
    async fn rejected_arguments_leave_the_layer_untested() {
        let mut registry = ToolRegistry::new(EventEmitter::new());
        registry
            .register(
                ToolDefinition::new("ping_gateway", "Gateway")
                    .param(ToolParameter::required("gateway", ParamType::String, "Gateway address"))
                    .layer(3),
                Arc::new(FixedProbe(ProbeOutput::ok(json!({})))),
            )
            .unwrap();
        let provider = ScriptedProvider::new(
            "ollama",
            vec![Ok(tool_calls("", &["ping_gateway"])), Ok(text("I need the gateway address."))],
        );
        let engine = engine(Arc::new(registry), provider, 10);
        let mut conversation = user_turn("is the router up?");
        let mut ladder = LadderCorrelator::new();

        let result = engine
            .run_turn(&mut conversation, &mut ladder, &EventEmitter::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.tool_history[0].success);
        assert_eq!(ladder.status(Layer::Network), LayerStatus::Pending);
        assert_eq!(ladder.current(), None);
        assert!(!ladder.is_started());
    }

    #[tokio::test]
    async fn exhausted_turn_is_recorded_as_failed() {
        let provider = ScriptedProvider::new(
            "ollama",
            vec![
                Ok(tool_calls("", &["ping_gateway"])),
                Err(ProviderError::NonRetryable("model unloaded".into())),
            ],
        );
        let engine = engine(
            registry(&[("ping_gateway", 3, ProbeOutput::ok(json!({})))]),
            provider,
            10,
        );
        let sink = Arc::new(MemorySink::new());
        let events = EventEmitter::new().with_sink(sink.clone());
        let mut conversation = user_turn("check the gateway");
        let mut ladder = LadderCorrelator::new();

        engine
            .run_turn(&mut conversation, &mut ladder, &events, &CancellationToken::new())
            .await
            .unwrap_err();

        let turns = sink.turn_events();
        assert_eq!(turns.len(), 1);
        assert!(turns[0].failed);
        assert!(!turns[0].cap_hit);
        assert_eq!(turns[0].provider, "ollama");
        assert_eq!(turns[0].tool_calls_made, 1);
    }
}
