//! Prompt-template rendering (SPEC_FULL §10 "Prompt templates").
//!
//! Grounded on the teacher's `prompts/loader.rs::TemplateRegistry`: a
//! `tera::Tera` instance holding raw templates registered by id, rendered
//! against a per-call context. The teacher's filesystem scan and
//! frontmatter parsing (templates live as markdown files with YAML
//! frontmatter under `~/.mesoclaw/prompts/`, hot-reloaded via `notify`) has
//! no counterpart here — configuration file formats are out of scope
//! (spec.md §1), so templates are registered programmatically or loaded
//! through [`crate::config`] alongside agent definitions, never watched.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use tera::Tera;
use thiserror::Error;

use crate::agents::AgentDefinition;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown prompt template: {0}")]
    NotFound(String),
    #[error("template registration failed: {0}")]
    Register(String),
    #[error("template render failed: {0}")]
    Render(String),
}

/// Holds every registered template and renders on demand. Cheap to
/// construct; one instance is shared process-wide the same way the tool
/// registry and mailbox are.
pub struct TemplateRegistry {
    tera: RwLock<Tera>,
    registered: RwLock<Vec<String>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            tera: RwLock::new(Tera::default()),
            registered: RwLock::new(Vec::new()),
        }
    }

    /// Register a template body under `id`. Re-registering an id overwrites
    /// the previous body.
    pub fn register(&self, id: &str, body: &str) -> Result<(), TemplateError> {
        let mut tera = self.tera.write().expect("template registry lock poisoned");
        tera.add_raw_template(id, body)
            .map_err(|e| TemplateError::Register(e.to_string()))?;
        let mut registered = self.registered.write().expect("template registry lock poisoned");
        if !registered.iter().any(|r| r == id) {
            registered.push(id.to_string());
        }
        Ok(())
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registered.read().expect("template registry lock poisoned").iter().any(|r| r == id)
    }

    /// Render `id` against a context built from the owning agent's
    /// definition plus the current turn's context-source tags.
    pub fn render_for_agent(
        &self,
        id: &str,
        agent: &AgentDefinition,
        extra: &HashMap<String, Value>,
    ) -> Result<String, TemplateError> {
        if !self.is_registered(id) {
            return Err(TemplateError::NotFound(id.to_string()));
        }

        let mut context = tera::Context::new();
        context.insert("agent_id", &agent.id);
        context.insert("display_name", &agent.display_name);
        context.insert("role", &agent.role);
        context.insert("context_tags", &agent.context_tags);
        for (key, value) in extra {
            context.insert(key, value);
        }

        let tera = self.tera.read().expect("template registry lock poisoned");
        tera.render(id, &context).map_err(|e| TemplateError::Render(e.to_string()))
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentDefinition {
        AgentDefinition {
            id: "d".into(),
            display_name: "Debbie".into(),
            role: "Documentation Writer".into(),
            context_tags: vec!["docs".into()],
            prompt_template_id: "docs".into(),
            tool_sets: vec![],
            allow_tools: vec![],
            deny_tools: vec![],
            model_override: None,
        }
    }

    #[test]
    fn renders_with_agent_fields() {
        let registry = TemplateRegistry::new();
        registry.register("docs", "You are {{ display_name }}, the {{ role }}.").unwrap();
        let rendered = registry.render_for_agent("docs", &agent(), &HashMap::new()).unwrap();
        assert_eq!(rendered, "You are Debbie, the Documentation Writer.");
    }

    #[test]
    fn unknown_template_errors() {
        let registry = TemplateRegistry::new();
        let err = registry.render_for_agent("ghost", &agent(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }

    #[test]
    fn extra_context_is_available_to_the_template() {
        let registry = TemplateRegistry::new();
        registry.register("greet", "Hello {{ user_name }}, from {{ display_name }}.").unwrap();
        let mut extra = HashMap::new();
        extra.insert("user_name".to_string(), Value::String("Alice".to_string()));
        let rendered = registry.render_for_agent("greet", &agent(), &extra).unwrap();
        assert_eq!(rendered, "Hello Alice, from Debbie.");
    }

    #[test]
    fn re_registering_an_id_overwrites_the_body() {
        let registry = TemplateRegistry::new();
        registry.register("x", "version one").unwrap();
        registry.register("x", "version two").unwrap();
        let rendered = registry.render_for_agent("x", &agent(), &HashMap::new()).unwrap();
        assert_eq!(rendered, "version two");
    }
}
