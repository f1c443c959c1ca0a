//! Model-capability table (§3 "Model-capability record", §4.1 dispatch
//! strategy inputs). Pure lookup data; the actual dispatch-strategy decision
//! lives in [`crate::session::engine`], which consumes this table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-model descriptor governing tool-dispatch shape and structured-output
/// support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapability {
    pub multi_tool: bool,
    pub parallel_tools: bool,
    pub max_tools_per_turn: usize,
    pub structured_output: bool,
    #[serde(default)]
    pub quirks: HashMap<String, Value>,
}

impl Default for ModelCapability {
    /// The documented default for unrecognised models: conservative,
    /// single-tool-at-a-time behavior.
    fn default() -> Self {
        Self {
            multi_tool: false,
            parallel_tools: false,
            max_tools_per_turn: 1,
            structured_output: false,
            quirks: HashMap::new(),
        }
    }
}

/// Per-model-id capability lookup with exact → longest-prefix → default
/// fallback (§3).
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: HashMap<String, ModelCapability>,
    default: ModelCapability,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(default: ModelCapability) -> Self {
        Self {
            entries: HashMap::new(),
            default,
        }
    }

    pub fn insert(&mut self, model_id: impl Into<String>, capability: ModelCapability) {
        self.entries.insert(model_id.into(), capability);
    }

    /// Exact match first; failing that, repeatedly strip the trailing
    /// `-segment` (e.g. `vendor/family-variant-date` → `vendor/family-variant`
    /// → `vendor/family`) until a match is found or no `-` remains; failing
    /// that, the documented default.
    pub fn lookup(&self, model_id: &str) -> &ModelCapability {
        if let Some(exact) = self.entries.get(model_id) {
            return exact;
        }
        let mut candidate = model_id;
        while let Some(idx) = candidate.rfind('-') {
            candidate = &candidate[..idx];
            if let Some(found) = self.entries.get(candidate) {
                return found;
            }
        }
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(multi_tool: bool) -> ModelCapability {
        ModelCapability {
            multi_tool,
            parallel_tools: multi_tool,
            max_tools_per_turn: if multi_tool { 10 } else { 1 },
            structured_output: true,
            quirks: HashMap::new(),
        }
    }

    #[test]
    fn exact_match_wins() {
        let mut table = CapabilityTable::new();
        table.insert("vendor/family-variant-date", cap(true));
        let found = table.lookup("vendor/family-variant-date");
        assert!(found.multi_tool);
    }

    #[test]
    fn falls_back_to_longest_prefix() {
        let mut table = CapabilityTable::new();
        table.insert("vendor/family", cap(true));
        let found = table.lookup("vendor/family-variant-2024-01-01");
        assert!(found.multi_tool);
    }

    #[test]
    fn unknown_model_uses_default() {
        let table = CapabilityTable::new();
        let found = table.lookup("totally/unknown-model");
        assert!(!found.multi_tool);
        assert_eq!(found.max_tools_per_turn, 1);
    }
}
