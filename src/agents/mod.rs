//! Declarative agent registry (§4.5): immutable agent definitions loaded
//! once at startup, plus alias-based name resolution for the mailbox and
//! session-start RPCs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-call generation overrides an agent definition may carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOverride {
    pub model_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// An immutable agent record, loaded at startup from declarative config and
/// never mutated afterward (§3 "Agent definition").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Canonical id — conventionally a single letter (`"a"`, `"b"`, `"d"`),
    /// but the registry itself does not enforce the convention.
    pub id: String,
    pub display_name: String,
    pub role: String,
    #[serde(default)]
    pub context_tags: Vec<String>,
    pub prompt_template_id: String,
    #[serde(default)]
    pub tool_sets: Vec<String>,
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub deny_tools: Vec<String>,
    #[serde(default)]
    pub model_override: Option<ModelOverride>,
}

/// Lowercase, trim, and collapse `" the "` to a single space — the
/// normalization `resolve_alias` applies before any lookup (§4.5).
fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace(" the ", " ")
}

/// Loader + alias resolver over a fixed set of [`AgentDefinition`]s.
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
    /// Built once at load time: every recognised spelling maps to a
    /// canonical id.
    aliases: HashMap<String, String>,
}

impl AgentRegistry {
    /// Load a fixed roster and build the alias table. For each agent this
    /// registers: the canonical id, the full display name, the first word
    /// of the display name, the role, and the `"agent <first-word>"` form.
    pub fn load(defs: Vec<AgentDefinition>) -> Self {
        let mut aliases = HashMap::new();
        let mut agents = HashMap::new();

        for def in defs {
            aliases.insert(normalize(&def.id), def.id.clone());
            aliases.insert(normalize(&def.display_name), def.id.clone());
            aliases.insert(normalize(&def.role), def.id.clone());
            if let Some(first) = def.display_name.split_whitespace().next() {
                aliases.insert(normalize(first), def.id.clone());
                aliases.insert(normalize(&format!("agent {first}")), def.id.clone());
            }
            agents.insert(def.id.clone(), def);
        }

        Self { agents, aliases }
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    pub fn list(&self) -> Vec<&AgentDefinition> {
        self.agents.values().collect()
    }

    /// Resolve a free-form name/alias to a canonical agent id.
    ///
    /// After normalization, tries an exact alias match, then progressively
    /// shorter whitespace-delimited prefixes (dropping trailing words), so
    /// `"agent debbie jones"` falls back to `"agent debbie"` and then
    /// `"agent"` before giving up.
    pub fn resolve_alias(&self, name: &str) -> Result<String, String> {
        let normalized = normalize(name);
        if let Some(id) = self.aliases.get(&normalized) {
            return Ok(id.clone());
        }

        let words: Vec<&str> = normalized.split_whitespace().collect();
        for len in (1..words.len()).rev() {
            let candidate = words[..len].join(" ");
            if let Some(id) = self.aliases.get(&candidate) {
                return Ok(id.clone());
            }
        }

        let mut valid_ids: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        valid_ids.sort_unstable();
        Err(format!(
            "unknown agent alias '{name}': valid ids are [{}]",
            valid_ids.join(", ")
        ))
    }
}
