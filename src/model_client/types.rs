//! Wire types for the model-service client (§4.6, §6 "Model-provider wire
//! protocol" / "Tool-call wire shape").

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::ToolCallDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the `messages` array sent to the provider. Distinct from
/// [`crate::session::Message`]: this is the wire shape, not the transcript
/// shape — the caller is responsible for projecting one into the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool definition advertised to the model, mirroring
/// [`crate::tools::ToolInfo`] but shaped for the wire (§6 "Tool-call wire
/// shape": `{id, function:{name, arguments:jsonString}}` describes the
/// model's *response*; this is the corresponding *offer*).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOffer {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// `{model, messages, tools?, response_format?, temperature?, max_tokens?,
/// stream: true}` (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolOffer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<WireMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            response_format: None,
            temperature: None,
            max_tokens: None,
            stream: true,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolOffer>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_response_format(mut self, schema: Value) -> Self {
        self.response_format = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// The key used for the non-streaming response cache (§4.6): canonical
    /// JSON serialization of `(model, messages, params, tools,
    /// response_format)`. `stream` is deliberately excluded — the cache only
    /// ever stores non-streaming responses, so it is constant across keys.
    pub fn cache_key(&self) -> String {
        let keyed = serde_json::json!({
            "model": self.model,
            "messages": self.messages,
            "tools": self.tools,
            "response_format": self.response_format,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        serde_json::to_string(&keyed).unwrap_or_default()
    }
}

/// One fragment of a streamed `tool_calls` delta, keyed by index so the
/// accumulator can reassemble vendor-specific partial fragments (§4.1 step
/// 5: "re-fragments vendor-specific partial `tool_calls` deltas into a
/// stable list keyed by call index/id").
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallPart {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Arguments arrive as a partial JSON string that must be concatenated
    /// across chunks before parsing.
    #[serde(default)]
    pub arguments_fragment: Option<String>,
}

/// One chunk of a streamed completion (§4.6 "Response contract").
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta_content: Option<String>,
    pub delta_reasoning: Option<String>,
    pub delta_tool_call_part: Option<ToolCallPart>,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn is_empty(&self) -> bool {
        self.delta_content.is_none() && self.delta_reasoning.is_none() && self.delta_tool_call_part.is_none()
    }
}

/// The accumulated result of one full stream consumption, before the
/// session engine decides what to do with it.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedResponse {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDescriptor>,
    pub finish_reason: Option<String>,
}

impl AccumulatedResponse {
    /// Per §4.1 step 6: "Reasoning-only responses are not empty" — only
    /// content, reasoning, *and* tool_calls being absent counts as empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.tool_calls.is_empty()
    }
}

/// Non-streaming completion response, used only by the optional cache path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDescriptor>,
    pub finish_reason: Option<String>,
}
