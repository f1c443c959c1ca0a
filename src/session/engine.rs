//! The session execution engine (§4.1): drives exactly one user turn through
//! `assemble-context → stream → accumulate → dispatch tools → commit →
//! route channels`.
//!
//! Grounded on the teacher's `agent/loop_.rs::AgentLoop` — same shape of
//! "stateless loop over a caller-owned history", same tool-execution/
//! event-emission split — generalized to this spec's richer contract:
//! streaming (the teacher calls a non-streaming `complete()` in a plain
//! iteration loop), capability-aware dispatch strategy, atomic transcript
//! commit, and channel routing, none of which the teacher's single-channel,
//! tag-parsed-only loop has.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::agents::AgentRegistry;
use crate::capability::{CapabilityTable, ModelCapability};
use crate::channels::{self, Channel, ChannelMessage, ChannelMetadata, ChannelStorage};
use crate::error::EngineError;
use crate::event_bus::{AppEvent, EventBus};
use crate::model_client::{
    accumulate_stream, AccumulatedResponse, ChatCompletionRequest, ModelClient, ToolOffer, WireMessage,
};
use crate::prompt::PromptOptimizer;
use crate::tools::{ToolRegistry, ToolSetRegistry};

use super::transcript::{Message, ToolCallDescriptor};
use super::Session;

/// Per-call overrides accepted by [`SessionEngine::process`] (§4.1
/// "Operation `process`").
#[derive(Debug, Clone, Default)]
pub struct TurnOverrides {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<Value>,
    /// Restricts the agent's resolved tool set to this subset, when present.
    pub tool_filter: Option<Vec<String>>,
    /// Bounds the whole turn: stream + tool execution + retries.
    pub timeout: Option<Duration>,
}

/// The successful result of one turn (§4.1: "Result: either
/// `{assistant_text?, reasoning?, tool_calls?, finish_reason}` or a typed
/// error").
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub assistant_text: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDescriptor>,
    pub finish_reason: Option<String>,
}

/// The dispatch strategy for a completed stream's accumulated tool calls,
/// derived from the model-capability record and call count (§4.1 dispatch
/// strategy table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    NoOp,
    Single,
    Parallel,
    Sequential,
    CapabilityViolation,
}

impl DispatchStrategy {
    /// | num calls | multi_tool | parallel_tools | Strategy |
    /// the table additionally bounds call count by `max_tools_per_turn`,
    /// which subsumes the documented `multi_tool=false` row (that
    /// configuration is conventionally `max_tools_per_turn=1`).
    pub fn determine(capability: &ModelCapability, call_count: usize) -> Self {
        match call_count {
            0 => DispatchStrategy::NoOp,
            1 => DispatchStrategy::Single,
            _ if !capability.multi_tool || call_count > capability.max_tools_per_turn => {
                DispatchStrategy::CapabilityViolation
            }
            _ if capability.parallel_tools => DispatchStrategy::Parallel,
            _ => DispatchStrategy::Sequential,
        }
    }
}

/// Exponential-ish turn-level retry backoff for empty responses: 1s, 2s, 3s
/// (§4.1 step 6), distinct from the model client's own per-request retry
/// (§11).
fn empty_response_backoff(attempt: u32) -> Duration {
    Duration::from_secs(attempt as u64)
}

/// Minimal JSON-Schema-shaped validation: object-type check plus presence
/// of `required` keys. §6 asks for schema validation before execution; a
/// full JSON-Schema implementation is out of scope for a tool-args check
/// this narrow, so only the two properties every schema in this spec's
/// examples actually relies on are enforced.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !arguments.is_object() {
        return Err("arguments must be a JSON object".to_string());
    }
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let obj = arguments.as_object();
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if !obj.is_some_and(|o| o.contains_key(key)) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }
    Ok(())
}

fn to_wire(message: &Message) -> WireMessage {
    match message {
        Message::User { content, .. } => WireMessage::user(content.clone()),
        Message::System { content, .. } => WireMessage::system(content.clone()),
        Message::Assistant { content, .. } => WireMessage::assistant(content.clone().unwrap_or_default()),
        Message::Tool { tool_call_id, content, .. } => WireMessage::tool(tool_call_id.clone(), content.clone()),
    }
}

/// Drives one user turn at a time; stateless across calls (§4.1: "advance
/// one session by exactly one user turn"). Holds shared handles to every
/// subsystem named in §2's dependency order — the session engine is the
/// single integrator.
pub struct SessionEngine {
    model_client: Arc<dyn ModelClient>,
    tool_registry: Arc<ToolRegistry>,
    tool_set_registry: Arc<ToolSetRegistry>,
    agent_registry: Arc<AgentRegistry>,
    capability_table: Arc<CapabilityTable>,
    prompt_optimizer: Arc<PromptOptimizer>,
    channel_storage: Arc<ChannelStorage>,
    event_bus: Arc<dyn EventBus>,
    default_model_id: String,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model_client: Arc<dyn ModelClient>,
        tool_registry: Arc<ToolRegistry>,
        tool_set_registry: Arc<ToolSetRegistry>,
        agent_registry: Arc<AgentRegistry>,
        capability_table: Arc<CapabilityTable>,
        prompt_optimizer: Arc<PromptOptimizer>,
        channel_storage: Arc<ChannelStorage>,
        event_bus: Arc<dyn EventBus>,
        default_model_id: impl Into<String>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            model_client,
            tool_registry,
            tool_set_registry,
            agent_registry,
            capability_table,
            prompt_optimizer,
            channel_storage,
            event_bus,
            default_model_id: default_model_id.into(),
            shutdown_rx,
        }
    }

    /// Advance `session` by one user turn (§4.1 `process`).
    pub async fn process(
        &self,
        session: &mut Session,
        user_text: &str,
        overrides: TurnOverrides,
    ) -> Result<TurnOutcome, EngineError> {
        session.turn_count += 1;
        let _ = self.event_bus.publish(AppEvent::StreamOpened {
            session_id: session.id.clone(),
        });

        let result = match overrides.timeout {
            Some(duration) => match tokio::time::timeout(duration, self.run_turn(session, user_text, &overrides)).await {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Timeout),
            },
            None => self.run_turn(session, user_text, &overrides).await,
        };

        match &result {
            Ok(_) => {
                let _ = self.event_bus.publish(AppEvent::StreamClosed {
                    session_id: session.id.clone(),
                    committed: true,
                });
            }
            Err(e) => {
                let _ = self.event_bus.publish(AppEvent::StreamError {
                    session_id: session.id.clone(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                let _ = self.event_bus.publish(AppEvent::StreamClosed {
                    session_id: session.id.clone(),
                    committed: false,
                });
            }
        }

        result
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        user_text: &str,
        overrides: &TurnOverrides,
    ) -> Result<TurnOutcome, EngineError> {
        // Step 1: working history. The transcript only ever holds typed
        // `Message`s, so there is nothing to coerce here — the defensive
        // raw-string coercion (`Message::coerce_raw_string`) exists for
        // callers ingesting loosely-typed history before it reaches a
        // `Transcript` at all.
        let history: Vec<Message> = session.transcript.as_slice().to_vec();

        let agent = self
            .agent_registry
            .get(&session.agent_id)
            .ok_or_else(|| EngineError::ConfigMissing(format!("unknown agent: {}", session.agent_id)))?
            .clone();

        // Step 2: resolve tool visibility.
        let mut effective_tools = crate::tools::tools_for_agent(
            &self.tool_set_registry,
            &self.tool_registry,
            &agent.tool_sets,
            &agent.allow_tools,
            &agent.deny_tools,
            &[],
        )
        .map_err(EngineError::Internal)?;
        if let Some(filter) = &overrides.tool_filter {
            let filter: std::collections::HashSet<String> = filter.iter().cloned().collect();
            effective_tools.retain(|name| filter.contains(name));
        }

        let model_id = agent
            .model_override
            .as_ref()
            .and_then(|o| o.model_id.clone())
            .unwrap_or_else(|| self.default_model_id.clone());
        let capability = self.capability_table.lookup(&model_id).clone();

        // Step 3: rewrite the user text for the model, without touching
        // what gets stored in the transcript.
        let rewritten_text = self.prompt_optimizer.optimize(user_text, &capability, Some(&agent.id));

        let mut wire_messages: Vec<WireMessage> = history.iter().map(to_wire).collect();
        wire_messages.push(WireMessage::user(rewritten_text));

        let tool_offers: Vec<ToolOffer> = effective_tools
            .iter()
            .filter_map(|name| self.tool_registry.spec(name))
            .map(|spec| ToolOffer {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters_schema.clone(),
            })
            .collect();

        let mut request = ChatCompletionRequest::new(model_id, wire_messages);
        if !tool_offers.is_empty() {
            request = request.with_tools(tool_offers);
        }
        if let Some(schema) = &overrides.response_format {
            request = request.with_response_format(schema.clone());
        }
        if let Some(temperature) = overrides.temperature.or(agent.model_override.as_ref().and_then(|o| o.temperature)) {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = overrides.max_tokens.or(agent.model_override.as_ref().and_then(|o| o.max_tokens)) {
            request = request.with_max_tokens(max_tokens);
        }

        // Steps 4-6: stream, accumulate, retry empty responses.
        let accumulated = self.stream_with_retry(&request).await?;

        // Step 7: dispatch tool calls.
        let strategy = DispatchStrategy::determine(&capability, accumulated.tool_calls.len());
        let (tool_calls_for_message, tool_results, result_lines) =
            self.dispatch(&accumulated, strategy, &capability).await;

        let mut content_buffer = accumulated.content.clone().unwrap_or_default();
        if !result_lines.is_empty() {
            if !content_buffer.is_empty() {
                content_buffer.push('\n');
            }
            content_buffer.push_str(&result_lines.join("\n"));
        }

        let assistant_content = if content_buffer.is_empty() { None } else { Some(content_buffer) };

        // Step 8: commit atomically.
        let user_message = Message::user(user_text);
        let assistant_message = Message::assistant(assistant_content.clone(), accumulated.reasoning.clone(), tool_calls_for_message.clone());

        session
            .transcript
            .commit_turn(user_message, assistant_message, tool_results)
            .map_err(EngineError::Internal)?;

        // Step 9: route channels.
        self.route_channels(session, accumulated.content.as_deref().unwrap_or_default(), &accumulated.tool_calls);

        Ok(TurnOutcome {
            assistant_text: assistant_content,
            reasoning: accumulated.reasoning,
            tool_calls: tool_calls_for_message,
            finish_reason: accumulated.finish_reason,
        })
    }

    /// Steps 4-6: stream from the model, accumulate, retry up to 3 times on
    /// an empty `stop`-finished response with 1s/2s/3s backoff.
    async fn stream_with_retry(&self, request: &ChatCompletionRequest) -> Result<AccumulatedResponse, EngineError> {
        const MAX_RETRIES: u32 = 3;

        for attempt in 0..=MAX_RETRIES {
            if *self.shutdown_rx.borrow() {
                return Err(EngineError::Shutdown);
            }
            if attempt > 0 {
                tracing::warn!(attempt, "session engine: retrying empty model response");
                tokio::time::sleep(empty_response_backoff(attempt)).await;
            }

            let stream = self.model_client.stream(request.clone(), self.shutdown_rx.clone()).await?;
            let accumulated = accumulate_stream(stream).await?;

            let is_empty_stop = accumulated.finish_reason.as_deref() == Some("stop") && accumulated.is_empty();
            if !is_empty_stop {
                return Ok(accumulated);
            }
        }

        Err(EngineError::EmptyResponse)
    }

    /// Step 7: execute tool calls per the resolved [`DispatchStrategy`],
    /// returning `(tool_calls actually recorded on the assistant message,
    /// tool result transcript messages, human-readable result lines)`.
    async fn dispatch(
        &self,
        accumulated: &AccumulatedResponse,
        strategy: DispatchStrategy,
        capability: &ModelCapability,
    ) -> (Vec<ToolCallDescriptor>, Vec<Message>, Vec<String>) {
        match strategy {
            DispatchStrategy::NoOp => (Vec::new(), Vec::new(), Vec::new()),
            DispatchStrategy::CapabilityViolation => {
                let line = format!(
                    "🔧 Tool Error: capability violation — {} tool calls requested, max is {}",
                    accumulated.tool_calls.len(),
                    capability.max_tools_per_turn
                );
                (Vec::new(), Vec::new(), vec![line])
            }
            DispatchStrategy::Single => {
                let (line, message) = self.execute_tool_call(accumulated.tool_calls[0].clone()).await;
                (accumulated.tool_calls.clone(), vec![message], vec![line])
            }
            DispatchStrategy::Parallel => {
                let futures = accumulated.tool_calls.iter().cloned().map(|call| self.execute_tool_call(call));
                let results = futures::future::join_all(futures).await;
                let (lines, messages): (Vec<_>, Vec<_>) = results.into_iter().unzip();
                (accumulated.tool_calls.clone(), messages, lines)
            }
            DispatchStrategy::Sequential => {
                let mut lines = Vec::with_capacity(accumulated.tool_calls.len());
                let mut messages = Vec::with_capacity(accumulated.tool_calls.len());
                for call in &accumulated.tool_calls {
                    let (line, message) = self.execute_tool_call(call.clone()).await;
                    lines.push(line);
                    messages.push(message);
                }
                (accumulated.tool_calls.clone(), messages, lines)
            }
        }
    }

    /// Execute a single tool call, translating every failure mode (unknown
    /// tool, invalid arguments, execution error) into a captured result
    /// rather than a turn failure (§7).
    async fn execute_tool_call(&self, call: ToolCallDescriptor) -> (String, Message) {
        let Some(tool) = self.tool_registry.get(&call.name) else {
            let reason = format!("tool '{}' is not registered", call.name);
            let line = format!("🔧 Tool Error: {reason}");
            return (line, Message::tool(call.id, call.name, reason));
        };

        if let Err(reason) = validate_arguments(&tool.parameters_schema(), &call.arguments) {
            let line = format!("🔧 Tool Error: {}: {reason}", call.name);
            return (line, Message::tool(call.id, call.name, reason));
        }

        match tool.execute(call.arguments.clone()).await {
            Ok(result) if result.success => {
                let line = format!("✓ {}: {}", call.name, result.output);
                (line, Message::tool(call.id, call.name, result.output))
            }
            Ok(result) => {
                let line = format!("🔧 Tool Error: {}: {}", call.name, result.output);
                (line, Message::tool(call.id, call.name, result.output))
            }
            Err(reason) => {
                let line = format!("🔧 Tool Error: {}: {reason}", call.name);
                (line, Message::tool(call.id, call.name, reason))
            }
        }
    }

    /// Step 9: parse the raw model content into channel messages, sequence
    /// and store each, and forward visible ones to the notification sink.
    fn route_channels(&self, session: &Session, raw_content: &str, tool_calls: &[ToolCallDescriptor]) {
        self.channel_storage.clear_pending(&session.id);
        for routed in channels::route(raw_content) {
            let sequence = self.channel_storage.allocate_sequence(&session.id, routed.channel, false);
            let metadata = ChannelMetadata {
                sequence,
                timestamp: chrono::Utc::now(),
                agent_id: Some(session.agent_id.clone()),
                session_id: Some(session.id.clone()),
                tool_calls: if routed.channel == Channel::Commentary { tool_calls.to_vec() } else { Vec::new() },
                is_partial: false,
                custom: HashMap::new(),
            };
            let message = ChannelMessage {
                channel: routed.channel,
                content: routed.content,
                metadata,
            };
            self.channel_storage.append(&session.id, message.clone());
            if session.visibility.is_visible(routed.channel) {
                let _ = self.event_bus.publish(AppEvent::ChannelMessage {
                    channel: message.channel,
                    content: message.content,
                    metadata: message.metadata,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::agents::AgentDefinition;
    use crate::event_bus::TokioBroadcastBus;
    use crate::model_client::{CompletionResponse, StreamChunk, ToolCallPart};
    use crate::tools::{Tool, ToolResult, ToolSetDef, ToolSpec};

    /// A [`ModelClient`] that replays one scripted response per call,
    /// recording how many times `stream` was invoked so retry behavior is
    /// directly observable.
    struct ScriptedClient {
        responses: StdMutex<Vec<Vec<StreamChunk>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Vec<StreamChunk>>) -> Self {
            Self {
                responses: StdMutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream(
            &self,
            _request: ChatCompletionRequest,
            _shutdown: watch::Receiver<bool>,
        ) -> Result<crate::model_client::ChunkStream, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().expect("mock lock poisoned");
            let chunks = if responses.is_empty() { Vec::new() } else { responses.remove(0) };
            Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
        }

        async fn complete(&self, _request: ChatCompletionRequest) -> Result<CompletionResponse, EngineError> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn content_chunk(text: &str, finish: Option<&str>) -> StreamChunk {
        StreamChunk {
            delta_content: Some(text.to_string()),
            delta_reasoning: None,
            delta_tool_call_part: None,
            finish_reason: finish.map(str::to_string),
        }
    }

    fn empty_stop_chunk() -> StreamChunk {
        StreamChunk {
            delta_content: None,
            delta_reasoning: None,
            delta_tool_call_part: None,
            finish_reason: Some("stop".to_string()),
        }
    }

    fn tool_call_chunk(index: usize, id: &str, name: &str, arguments: &str, finish: Option<&str>) -> StreamChunk {
        StreamChunk {
            delta_content: None,
            delta_reasoning: None,
            delta_tool_call_part: Some(ToolCallPart {
                index,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments_fragment: Some(arguments.to_string()),
            }),
            finish_reason: finish.map(str::to_string),
        }
    }

    /// Always-succeeding tool echoing its `value` argument back.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "get_weather"
        }
        fn description(&self) -> &str {
            "look up the weather for a place"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "required": ["place"]})
        }
        async fn execute(&self, arguments: Value) -> Result<ToolResult, String> {
            let place = arguments.get("place").and_then(Value::as_str).unwrap_or("?");
            Ok(ToolResult::ok(format!("sunny in {place}")))
        }
    }

    struct Harness {
        engine: SessionEngine,
        session: Session,
    }

    fn build_harness(client: Arc<dyn ModelClient>, capability: ModelCapability) -> Harness {
        let mut tool_registry = ToolRegistry::new();
        tool_registry.register_spec(
            ToolSpec {
                name: "get_weather".to_string(),
                category: "general".to_string(),
                description: "look up the weather for a place".to_string(),
                parameters_schema: json!({"type": "object", "required": ["place"]}),
                tags: vec![],
            },
            Box::new(|| Arc::new(EchoTool)),
        );

        let mut tool_set_registry = ToolSetRegistry::new();
        tool_set_registry.define(ToolSetDef {
            name: "basic".to_string(),
            tools: vec!["get_weather".to_string()],
            tags_include: vec![],
            tags_deny: vec![],
            parents: vec![],
        });

        let agent_registry = AgentRegistry::load(vec![AgentDefinition {
            id: "a".to_string(),
            display_name: "Aria".to_string(),
            role: "Assistant".to_string(),
            context_tags: vec![],
            prompt_template_id: "default".to_string(),
            tool_sets: vec!["basic".to_string()],
            allow_tools: vec![],
            deny_tools: vec![],
            model_override: None,
        }]);

        let mut capability_table = CapabilityTable::new();
        capability_table.insert("test-model", capability);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = SessionEngine::new(
            client,
            Arc::new(tool_registry),
            Arc::new(tool_set_registry),
            Arc::new(agent_registry),
            Arc::new(capability_table),
            Arc::new(PromptOptimizer::new(4)),
            Arc::new(ChannelStorage::new()),
            Arc::new(TokioBroadcastBus::new()),
            "test-model",
            shutdown_rx,
        );

        let session = Session::new("s1", "a");
        Harness { engine, session }
    }

    // Scenario 1 (§8): single-tool, text-only reply.
    #[tokio::test]
    async fn single_tool_text_only_reply_commits_no_tool_messages() {
        let client = Arc::new(ScriptedClient::new(vec![vec![
            content_chunk("Hi!", None),
            content_chunk("", Some("stop")),
        ]]));
        let mut harness = build_harness(client, ModelCapability {
            multi_tool: false,
            parallel_tools: false,
            max_tools_per_turn: 1,
            structured_output: false,
            quirks: Default::default(),
        });

        let outcome = harness
            .engine
            .process(&mut harness.session, "Say hello.", TurnOverrides::default())
            .await
            .expect("turn should succeed");

        assert_eq!(outcome.assistant_text.as_deref(), Some("Hi!"));
        assert_eq!(harness.session.transcript.len(), 2, "user + assistant, no tool messages");
        assert!(harness.session.transcript.validate_tool_pairing().is_ok());
    }

    // Scenario 2 (§8): parallel tool calls on a multi-tool model.
    #[tokio::test]
    async fn parallel_tool_calls_append_results_in_call_order() {
        let client = Arc::new(ScriptedClient::new(vec![vec![
            tool_call_chunk(0, "call-1", "get_weather", r#"{"place":"NY"}"#, None),
            tool_call_chunk(1, "call-2", "get_weather", r#"{"place":"London"}"#, Some("tool_calls")),
        ]]));
        let mut harness = build_harness(client, ModelCapability {
            multi_tool: true,
            parallel_tools: true,
            max_tools_per_turn: 10,
            structured_output: false,
            quirks: Default::default(),
        });

        let outcome = harness
            .engine
            .process(&mut harness.session, "weather in NY and London", TurnOverrides::default())
            .await
            .expect("turn should succeed");

        assert_eq!(outcome.tool_calls.len(), 2);
        assert_eq!(harness.session.transcript.len(), 4, "user + assistant + 2 tool messages");
        assert!(harness.session.transcript.validate_tool_pairing().is_ok());

        let messages = harness.session.transcript.as_slice();
        let Message::Tool { tool_call_id: first_id, .. } = &messages[2] else {
            panic!("expected tool message at index 2");
        };
        let Message::Tool { tool_call_id: second_id, .. } = &messages[3] else {
            panic!("expected tool message at index 3");
        };
        assert_eq!(first_id, "call-1", "results must be in call-declaration order");
        assert_eq!(second_id, "call-2");
    }

    // Scenario 3 (§8): capability violation.
    #[tokio::test]
    async fn capability_violation_embeds_tool_error_and_commits_no_tool_messages() {
        let client = Arc::new(ScriptedClient::new(vec![vec![
            tool_call_chunk(0, "call-1", "get_weather", r#"{"place":"NY"}"#, None),
            tool_call_chunk(1, "call-2", "get_weather", r#"{"place":"London"}"#, Some("tool_calls")),
        ]]));
        let mut harness = build_harness(client, ModelCapability {
            multi_tool: false,
            parallel_tools: false,
            max_tools_per_turn: 1,
            structured_output: false,
            quirks: Default::default(),
        });

        let outcome = harness
            .engine
            .process(&mut harness.session, "weather in NY and London", TurnOverrides::default())
            .await
            .expect("turn should still commit");

        let text = outcome.assistant_text.expect("content buffer must carry the error line");
        assert!(text.contains("Tool Error"), "got: {text}");
        assert!(text.contains("max is 1"), "got: {text}");
        assert_eq!(harness.session.transcript.len(), 2, "no tool_calls were recorded, so no tool messages append");
    }

    // Scenario 4 (§8): empty-response retry.
    #[tokio::test(start_paused = true)]
    async fn empty_response_retries_three_times_then_fails_without_committing() {
        let client = Arc::new(ScriptedClient::new(vec![
            vec![empty_stop_chunk()],
            vec![empty_stop_chunk()],
            vec![empty_stop_chunk()],
            vec![empty_stop_chunk()],
        ]));
        let scripted = client.clone();
        let mut harness = build_harness(client, ModelCapability::default());

        let start = tokio::time::Instant::now();
        let result = harness
            .engine
            .process(&mut harness.session, "Say hello.", TurnOverrides::default())
            .await;

        assert!(matches!(result, Err(EngineError::EmptyResponse)));
        assert_eq!(harness.session.transcript.len(), 0, "nothing committed on empty_response");
        assert_eq!(scripted.call_count(), 4, "1 initial attempt + 3 retries");
        assert!(start.elapsed() >= Duration::from_secs(6), "backoff should sum to 1s + 2s + 3s");
    }

    #[tokio::test]
    async fn reasoning_only_response_is_not_treated_as_empty() {
        let client = Arc::new(ScriptedClient::new(vec![vec![StreamChunk {
            delta_content: None,
            delta_reasoning: Some("thinking it over".to_string()),
            delta_tool_call_part: None,
            finish_reason: Some("stop".to_string()),
        }]]));
        let scripted = client.clone();
        let mut harness = build_harness(client, ModelCapability::default());

        let outcome = harness
            .engine
            .process(&mut harness.session, "Say hello.", TurnOverrides::default())
            .await
            .expect("reasoning-only is not empty, so the turn should commit");

        assert_eq!(outcome.reasoning.as_deref(), Some("thinking it over"));
        assert_eq!(scripted.call_count(), 1, "no retry should have been triggered");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_aborts_the_turn_without_committing() {
        struct NeverRespondsClient;

        #[async_trait]
        impl ModelClient for NeverRespondsClient {
            async fn stream(
                &self,
                _request: ChatCompletionRequest,
                _shutdown: watch::Receiver<bool>,
            ) -> Result<crate::model_client::ChunkStream, EngineError> {
                Ok(Box::pin(stream::pending()))
            }
            async fn complete(&self, _request: ChatCompletionRequest) -> Result<CompletionResponse, EngineError> {
                unimplemented!("not exercised by this test")
            }
        }

        let mut harness = build_harness(Arc::new(NeverRespondsClient), ModelCapability::default());
        let overrides = TurnOverrides {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };

        let result = harness.engine.process(&mut harness.session, "Say hello.", overrides).await;

        assert!(matches!(result, Err(EngineError::Timeout)));
        assert_eq!(harness.session.transcript.len(), 0, "timeout must not commit anything");
    }

    #[tokio::test]
    async fn unknown_tool_is_captured_not_a_turn_failure() {
        let client = Arc::new(ScriptedClient::new(vec![vec![tool_call_chunk(
            0,
            "call-1",
            "does_not_exist",
            "{}",
            Some("tool_calls"),
        )]]));
        let mut harness = build_harness(client, ModelCapability {
            multi_tool: false,
            parallel_tools: false,
            max_tools_per_turn: 1,
            structured_output: false,
            quirks: Default::default(),
        });

        let outcome = harness
            .engine
            .process(&mut harness.session, "do the thing", TurnOverrides::default())
            .await
            .expect("unknown-tool is captured, not a turn error");

        assert_eq!(harness.session.transcript.len(), 3, "user + assistant + 1 tool-error message");
        let Message::Tool { content, .. } = &harness.session.transcript.as_slice()[2] else {
            panic!("expected a tool message");
        };
        assert!(content.contains("not registered"));
    }

    #[test]
    fn dispatch_strategy_table() {
        let multi = ModelCapability {
            multi_tool: true,
            parallel_tools: true,
            max_tools_per_turn: 5,
            structured_output: false,
            quirks: Default::default(),
        };
        let sequential = ModelCapability {
            parallel_tools: false,
            ..multi.clone()
        };
        let single = ModelCapability::default();

        assert_eq!(DispatchStrategy::determine(&multi, 0), DispatchStrategy::NoOp);
        assert_eq!(DispatchStrategy::determine(&multi, 1), DispatchStrategy::Single);
        assert_eq!(DispatchStrategy::determine(&multi, 2), DispatchStrategy::Parallel);
        assert_eq!(DispatchStrategy::determine(&sequential, 2), DispatchStrategy::Sequential);
        assert_eq!(DispatchStrategy::determine(&single, 2), DispatchStrategy::CapabilityViolation);
        assert_eq!(DispatchStrategy::determine(&multi, 6), DispatchStrategy::CapabilityViolation);
    }

    #[test]
    fn validate_arguments_checks_required_keys() {
        let schema = json!({"type": "object", "required": ["place"]});
        assert!(validate_arguments(&schema, &json!({"place": "NY"})).is_ok());
        assert!(validate_arguments(&schema, &json!({})).is_err());
        assert!(validate_arguments(&schema, &json!("not an object")).is_err());
    }
}
