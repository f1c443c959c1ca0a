//! Named, inheriting tool sets (§4.2).
//!
//! A tool set scopes which tools an agent may see. Sets can extend other
//! sets; resolution computes the transitive closure of
//! `(tools ∪ tools-by-tag) − deny-tagged tools`. The inheritance graph must
//! be acyclic — cycles are caught at resolution time via DFS coloring, the
//! same technique the skill-inheritance resolver in the prompt/skills layer
//! uses for its `extends` chain.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::registry::ToolRegistry;

/// A named, possibly-inheriting collection of tools and tag filters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolSetDef {
    pub name: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tags_include: Vec<String>,
    #[serde(default)]
    pub tags_deny: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

/// The transitive closure of a resolved tool set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    pub tools: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Holds every declared [`ToolSetDef`] and resolves inheritance against a
/// [`ToolRegistry`].
#[derive(Default)]
pub struct ToolSetRegistry {
    sets: HashMap<String, ToolSetDef>,
}

impl ToolSetRegistry {
    pub fn new() -> Self {
        Self { sets: HashMap::new() }
    }

    pub fn define(&mut self, def: ToolSetDef) {
        self.sets.insert(def.name.clone(), def);
    }

    /// Resolve `name` to its full transitive tool closure.
    ///
    /// An unknown *parent* name is tolerated (warn, skip) per §4.2; an
    /// unknown *root* name (the set passed in directly) is an error, since
    /// the caller asked for something that does not exist at all.
    pub fn resolve(&self, name: &str, registry: &ToolRegistry) -> Result<ResolvedSet, String> {
        let Some(root) = self.sets.get(name) else {
            return Err(format!("unknown tool set: {name}"));
        };
        let mut colors: HashMap<String, Color> = HashMap::new();
        let mut resolved = ResolvedSet::default();
        self.resolve_into(root, registry, &mut colors, &mut resolved)?;
        Ok(resolved)
    }

    fn resolve_into(
        &self,
        set: &ToolSetDef,
        registry: &ToolRegistry,
        colors: &mut HashMap<String, Color>,
        acc: &mut ResolvedSet,
    ) -> Result<(), String> {
        match colors.get(&set.name) {
            Some(Color::Gray) => {
                return Err(format!("tool set inheritance cycle detected at '{}'", set.name));
            }
            Some(Color::Black) => return Ok(()),
            _ => {}
        }
        colors.insert(set.name.clone(), Color::Gray);

        for parent_name in &set.parents {
            let Some(parent) = self.sets.get(parent_name) else {
                tracing::warn!(
                    set = %set.name,
                    parent = %parent_name,
                    "resolve_set: unknown parent, skipping"
                );
                continue;
            };
            self.resolve_into(parent, registry, colors, acc)?;
        }

        for t in &set.tools {
            acc.tools.insert(t.clone());
        }

        if !set.tags_include.is_empty() {
            let criteria = super::registry::FilterCriteria {
                tags: set.tags_include.clone(),
                ..Default::default()
            };
            for spec in registry.filter(&criteria) {
                acc.tools.insert(spec.name.clone());
            }
        }

        if !set.tags_deny.is_empty() {
            let criteria = super::registry::FilterCriteria {
                tags: set.tags_deny.clone(),
                ..Default::default()
            };
            for spec in registry.filter(&criteria) {
                acc.tools.remove(&spec.name);
            }
        }

        colors.insert(set.name.clone(), Color::Black);
        Ok(())
    }
}

/// Compute the tools visible to an agent: `(sets ∪ allow) − deny`, with
/// deny-by-name taking precedence over allow-by-name, which in turn takes
/// precedence over the raw set/tag union; deny-tags additionally strip any
/// tool carrying a denied tag regardless of how it entered the union.
pub fn tools_for_agent(
    set_registry: &ToolSetRegistry,
    tool_registry: &ToolRegistry,
    sets: &[String],
    allow: &[String],
    deny: &[String],
    deny_tags: &[String],
) -> Result<HashSet<String>, String> {
    let mut union: HashSet<String> = HashSet::new();

    for set_name in sets {
        let resolved = set_registry.resolve(set_name, tool_registry)?;
        union.extend(resolved.tools);
    }
    for name in allow {
        union.insert(name.clone());
    }

    if !deny_tags.is_empty() {
        let criteria = super::registry::FilterCriteria {
            tags: deny_tags.to_vec(),
            ..Default::default()
        };
        for spec in tool_registry.filter(&criteria) {
            union.remove(&spec.name);
        }
    }

    for name in deny {
        union.remove(name);
    }

    Ok(union)
}
