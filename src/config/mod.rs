//! Declarative config loading (SPEC_FULL §10 "Configuration").
//!
//! Agent definitions, tool sets, and the model-capability table already
//! derive `serde::{Serialize, Deserialize}`; this module is just the
//! YAML/TOML deserialization entry points so a caller isn't forced to wire
//! up `serde_yaml`/`toml` itself. Unknown keys are preserved rather than
//! rejected wherever the underlying type already carries an open map
//! (`AgentDefinition` has none beyond `model_override.extra`; `ModelCapability`
//! carries `quirks`) — per §9's "Reflection over agent config files"
//! redesign note.

use serde::Deserialize;
use thiserror::Error;

use crate::agents::AgentDefinition;
use crate::capability::ModelCapability;
use crate::tools::ToolSetDef;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

fn read_to_string(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })
}

/// A named capability table entry, the shape a YAML/TOML document actually
/// carries (`ModelCapability` itself has no `model_id` field — the table
/// maps id to capability, not the other way round).
#[derive(Debug, Deserialize)]
pub struct CapabilityEntry {
    pub model_id: String,
    #[serde(flatten)]
    pub capability: ModelCapability,
}

pub fn load_agents_yaml(source: &str) -> Result<Vec<AgentDefinition>, ConfigError> {
    Ok(serde_yaml::from_str(source)?)
}

pub fn load_agents_yaml_file(path: &str) -> Result<Vec<AgentDefinition>, ConfigError> {
    load_agents_yaml(&read_to_string(path)?)
}

pub fn load_tool_sets_yaml(source: &str) -> Result<Vec<ToolSetDef>, ConfigError> {
    Ok(serde_yaml::from_str(source)?)
}

pub fn load_tool_sets_yaml_file(path: &str) -> Result<Vec<ToolSetDef>, ConfigError> {
    load_tool_sets_yaml(&read_to_string(path)?)
}

pub fn load_capability_table_yaml(source: &str) -> Result<Vec<CapabilityEntry>, ConfigError> {
    Ok(serde_yaml::from_str(source)?)
}

pub fn load_capability_table_yaml_file(path: &str) -> Result<Vec<CapabilityEntry>, ConfigError> {
    load_capability_table_yaml(&read_to_string(path)?)
}

pub fn load_agents_toml(source: &str) -> Result<Vec<AgentDefinition>, ConfigError> {
    #[derive(Deserialize)]
    struct Wrapper {
        agent: Vec<AgentDefinition>,
    }
    let wrapper: Wrapper = toml::from_str(source)?;
    Ok(wrapper.agent)
}
