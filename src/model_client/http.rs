//! OpenAI-compatible SSE streaming client (§4.6, §6 "Model-provider wire
//! protocol").
//!
//! Grounded on the teacher's `ai/providers/openrouter.rs`: same retry
//! policy, same three required headers, same `eventsource_stream` +
//! `bytes_stream()` pattern for turning the HTTP response into an async
//! sequence of SSE events. What changes is the wire shape (tool calls,
//! reasoning deltas, response_format — none of which the teacher's
//! text-only provider carries) and the error taxonomy (the teacher
//! collapses every failure into one `String`; this client classifies into
//! the kinds §4.6 documents).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::EngineError;

#[cfg(feature = "cache")]
use super::cache::ResponseCache;
use super::client::{ChunkStream, ModelClient, ModelClientConfig};
use super::types::{AccumulatedResponse, ChatCompletionRequest, CompletionResponse, StreamChunk, ToolCallPart};

const DONE_SENTINEL: &str = "[DONE]";

/// Exponential backoff `2^(attempt-1)` seconds, carried over verbatim from
/// the teacher's `execute_with_retry`.
fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(default)]
    index: usize,
    function: ApiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ApiFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChoice {
    delta: ApiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamResponse {
    choices: Vec<ApiStreamChoice>,
}

/// Production [`ModelClient`] talking to an OpenAI-compatible streaming
/// chat-completions endpoint.
pub struct HttpModelClient {
    client: Client,
    config: ModelClientConfig,
    #[cfg(feature = "cache")]
    cache: Option<ResponseCache>,
}

impl HttpModelClient {
    pub fn new(config: ModelClientConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            config,
            #[cfg(feature = "cache")]
            cache: None,
        })
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn request_builder(&self, request: &ChatCompletionRequest) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("HTTP-Referer", &self.config.http_referer)
            .header("X-Title", &self.config.title)
            .header("Content-Type", "application/json")
            .json(request)
    }

    /// Execute with retry: exponential backoff, retries 5xx and 429, fails
    /// fast on other 4xx. Classifies the terminal failure into the §4.6
    /// error taxonomy rather than a generic transport error.
    async fn execute_with_retry(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response, EngineError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_for(attempt)).await;
            }

            match self.request_builder(request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        let body = response.text().await.unwrap_or_default();
                        return Err(EngineError::Auth(body));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        tracing::warn!(attempt, "model client rate-limited, will retry if attempts remain");
                        last_error = Some(EngineError::RateLimit(format!("status {status}")));
                        continue;
                    }
                    if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(EngineError::Api(format!("status {status}: {body}")));
                    }
                    tracing::warn!(attempt, %status, "model client server error, will retry if attempts remain");
                    last_error = Some(EngineError::Api(format!("status {status}")));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    tracing::warn!(attempt, error = %e, "model client connection failure, will retry if attempts remain");
                    last_error = Some(EngineError::Connection(e.to_string()));
                }
                Err(e) => {
                    last_error = Some(EngineError::Api(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or(EngineError::Connection("request failed with no response".to_string())))
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn stream(
        &self,
        mut request: ChatCompletionRequest,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<ChunkStream, EngineError> {
        request.stream = true;
        let response = self.execute_with_retry(&request).await?;

        let byte_stream = response.bytes_stream();
        let event_stream = byte_stream.eventsource();

        // A running map of in-progress tool-call fragments keyed by index,
        // so a `name`-only chunk followed by an `arguments_fragment`-only
        // chunk for the same index still yields one coherent `ToolCallPart`
        // per chunk as required by the accumulator in §4.1 step 5. The HTTP
        // layer only needs to thread the index/id through; argument
        // concatenation itself happens in the session engine's accumulator.
        let stream = event_stream.filter_map(move |event| {
            let shutdown_fired = *shutdown.borrow();
            async move {
                if shutdown_fired {
                    return Some(Err(EngineError::Shutdown));
                }
                match event {
                    Ok(ev) if ev.data == DONE_SENTINEL => Some(Ok(StreamChunk {
                        finish_reason: Some("stop".to_string()),
                        ..Default::default()
                    })),
                    Ok(ev) => match serde_json::from_str::<ApiStreamResponse>(&ev.data) {
                        Ok(parsed) => {
                            let Some(choice) = parsed.choices.into_iter().next() else {
                                return None;
                            };
                            let tool_call_part = choice.delta.tool_calls.into_iter().next().map(|tc| ToolCallPart {
                                index: tc.index,
                                id: Some(tc.id),
                                name: tc.function.name,
                                arguments_fragment: tc.function.arguments,
                            });
                            Some(Ok(StreamChunk {
                                delta_content: choice.delta.content,
                                delta_reasoning: choice.delta.reasoning,
                                delta_tool_call_part: tool_call_part,
                                finish_reason: choice.finish_reason,
                            }))
                        }
                        Err(e) => Some(Err(EngineError::Api(format!("malformed stream chunk: {e}")))),
                    },
                    Err(e) => Some(Err(EngineError::Connection(e.to_string()))),
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn complete(&self, mut request: ChatCompletionRequest) -> Result<CompletionResponse, EngineError> {
        request.stream = false;

        #[cfg(feature = "cache")]
        let cache_key = request.cache_key();
        #[cfg(feature = "cache")]
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&cache_key) {
                return Ok(hit);
            }
        }

        let response = self.execute_with_retry(&request).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Api(format!("failed to parse completion response: {e}")))?;

        let parsed = parse_non_streaming_body(&body)?;

        #[cfg(feature = "cache")]
        if let Some(cache) = &self.cache {
            cache.put(cache_key, parsed.clone());
        }

        Ok(parsed)
    }
}

fn parse_non_streaming_body(body: &Value) -> Result<CompletionResponse, EngineError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| EngineError::Api("no choices in completion response".to_string()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| EngineError::Api("completion choice missing message".to_string()))?;

    let content = message.get("content").and_then(|c| c.as_str()).map(str::to_string);
    let reasoning = message.get("reasoning").and_then(|c| c.as_str()).map(str::to_string);
    let finish_reason = choice.get("finish_reason").and_then(|c| c.as_str()).map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let function = tc.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments_str = function.get("arguments")?.as_str()?;
                    let arguments: Value = serde_json::from_str(arguments_str).unwrap_or(Value::Null);
                    Some(crate::session::ToolCallDescriptor { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content,
        reasoning,
        tool_calls,
        finish_reason,
    })
}

/// Accumulate a full stream into an [`AccumulatedResponse`] — the bridge
/// between [`ChunkStream`] and §4.1 step 5's "accumulate three things in
/// parallel". Exposed here (rather than private to the session engine) so
/// any [`ModelClient`] implementation's stream can be consumed the same way.
pub async fn accumulate_stream(mut stream: ChunkStream) -> Result<AccumulatedResponse, EngineError> {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_fragments: HashMap<usize, (Option<String>, Option<String>, String)> = HashMap::new();
    let mut saw_content = false;
    let mut saw_reasoning = false;
    let mut finish_reason = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(delta) = chunk.delta_content {
            saw_content = true;
            content.push_str(&delta);
        }
        if let Some(delta) = chunk.delta_reasoning {
            saw_reasoning = true;
            reasoning.push_str(&delta);
        }
        if let Some(part) = chunk.delta_tool_call_part {
            let entry = tool_fragments.entry(part.index).or_insert((None, None, String::new()));
            if part.id.is_some() {
                entry.0 = part.id;
            }
            if part.name.is_some() {
                entry.1 = part.name;
            }
            if let Some(fragment) = part.arguments_fragment {
                entry.2.push_str(&fragment);
            }
        }
        if chunk.finish_reason.is_some() {
            finish_reason = chunk.finish_reason;
        }
    }

    let mut tool_calls: Vec<(usize, crate::session::ToolCallDescriptor)> = tool_fragments
        .into_iter()
        .filter_map(|(index, (id, name, arguments_json))| {
            let id = id?;
            let name = name?;
            let arguments = serde_json::from_str(&arguments_json).unwrap_or(Value::Null);
            Some((index, crate::session::ToolCallDescriptor { id, name, arguments }))
        })
        .collect();
    tool_calls.sort_by_key(|(index, _)| *index);

    Ok(AccumulatedResponse {
        content: saw_content.then_some(content),
        reasoning: saw_reasoning.then_some(reasoning),
        tool_calls: tool_calls.into_iter().map(|(_, call)| call).collect(),
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelClientConfig {
        ModelClientConfig {
            api_key: "test-key".into(),
            base_url: "https://example.invalid/v1".into(),
            http_referer: "https://example.invalid".into(),
            title: "meridian-hub".into(),
            default_model: "anthropic/claude-3.5-sonnet".into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    #[test]
    fn missing_api_key_is_config_missing() {
        let mut cfg = config();
        cfg.api_key.clear();
        let err = HttpModelClient::new(cfg).unwrap_err();
        assert!(matches!(err, EngineError::ConfigMissing(_)));
    }

    #[test]
    fn backoff_matches_documented_schedule() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(2), Duration::from_secs(2));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
    }

    #[test]
    fn parse_non_streaming_body_extracts_tool_calls() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"NY\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let parsed = parse_non_streaming_body(&body).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "get_weather");
        assert_eq!(parsed.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn accumulate_stream_merges_tool_call_fragments() {
        let chunks: Vec<Result<StreamChunk, EngineError>> = vec![
            Ok(StreamChunk {
                delta_tool_call_part: Some(ToolCallPart {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("get_weather".into()),
                    arguments_fragment: Some("{\"city\":".into()),
                }),
                ..Default::default()
            }),
            Ok(StreamChunk {
                delta_tool_call_part: Some(ToolCallPart {
                    index: 0,
                    id: None,
                    name: None,
                    arguments_fragment: Some("\"NY\"}".into()),
                }),
                ..Default::default()
            }),
            Ok(StreamChunk {
                finish_reason: Some("tool_calls".into()),
                ..Default::default()
            }),
        ];
        let stream: ChunkStream = Box::pin(futures::stream::iter(chunks));
        let accumulated = accumulate_stream(stream).await.unwrap();
        assert_eq!(accumulated.tool_calls.len(), 1);
        assert_eq!(accumulated.tool_calls[0].arguments, serde_json::json!({"city": "NY"}));
    }

    #[tokio::test]
    async fn accumulate_stream_treats_reasoning_only_as_nonempty() {
        let chunks: Vec<Result<StreamChunk, EngineError>> = vec![Ok(StreamChunk {
            delta_reasoning: Some("thinking...".into()),
            finish_reason: Some("stop".into()),
            ..Default::default()
        })];
        let stream: ChunkStream = Box::pin(futures::stream::iter(chunks));
        let accumulated = accumulate_stream(stream).await.unwrap();
        assert!(!accumulated.is_empty());
        assert!(accumulated.content.is_none());
    }
}
