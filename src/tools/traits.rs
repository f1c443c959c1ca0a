//! The [`Tool`] capability contract and its supporting value types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Human-readable output, embedded verbatim into the `tool` transcript
    /// message and into the assistant's human-readable result summary.
    pub output: String,
    pub success: bool,
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Descriptor consumed by the registry *before* the tool is instantiated
/// (§4.2). Carries everything needed for name lookup, tag filtering, and
/// wire-level tool definitions without paying for construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub category: String,
    pub description: String,
    pub parameters_schema: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A capability the session engine can invoke, polymorphic over the set in
/// §3 ("Tool instance"). Implementations must be `Send + Sync` to live
/// behind the single shared `Arc<dyn Tool>` per name that the registry
/// maintains.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn category(&self) -> &str {
        "general"
    }
    fn tags(&self) -> &[String] {
        &[]
    }
    /// Free-form instructions injected into the agent's system prompt
    /// describing how/when to use this tool. Most tools can rely on
    /// `description` alone and leave this empty.
    fn ai_prompt_instructions(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, String>;
}

/// Summary of a registered tool suitable for inclusion in a model-client
/// `tools` array (wire shape, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
    pub category: String,
    pub tags: Vec<String>,
}

impl ToolInfo {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            schema: tool.parameters_schema(),
            category: tool.category().to_string(),
            tags: tool.tags().to_vec(),
        }
    }
}
