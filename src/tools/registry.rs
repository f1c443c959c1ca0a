//! Tool registry: name lookup, lazy instantiation, and tag/category filters
//! (§4.2).
//!
//! A tool is only instantiated the first time it is requested by name; the
//! registry guarantees a single instance per name thereafter ("Registry
//! identity", §8). Registration of a [`ToolSpec`] is cheap and idempotent —
//! it happens at startup for every known tool, long before most of them are
//! ever instantiated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::Regex;

use super::traits::{Tool, ToolSpec};

/// Builds a [`Tool`] instance on demand. Boxed so the registry can hold a
/// heterogeneous set of constructors without generics leaking into callers.
pub type ToolFactory = Box<dyn Fn() -> Arc<dyn Tool> + Send + Sync>;

struct Entry {
    spec: ToolSpec,
    factory: ToolFactory,
}

/// Criteria for [`ToolRegistry::filter`]. All provided fields are ANDed
/// together; `tags` itself is OR'd (any matching tag qualifies).
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub name_pattern: Option<String>,
}

/// Central registry of tool descriptors and their lazily-instantiated
/// backing implementations.
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    instances: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Record a tool descriptor and its factory before first use. Idempotent
    /// per name: a second registration under the same name is ignored
    /// (first registration wins) and logged.
    pub fn register_spec(&mut self, spec: ToolSpec, factory: ToolFactory) {
        if self.entries.contains_key(&spec.name) {
            tracing::warn!(tool = %spec.name, "ignoring duplicate tool spec registration");
            return;
        }
        let name = spec.name.clone();
        self.entries.insert(name, Entry { spec, factory });
    }

    /// Instantiate a tool on first call, returning the cached instance on
    /// every subsequent call with the same name (reference-equal, §8).
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if let Some(existing) = self.instances.read().ok()?.get(name) {
            return Some(existing.clone());
        }

        let entry = self.entries.get(name)?;
        let mut instances = self.instances.write().ok()?;
        // Re-check under the write lock: another caller may have raced us.
        if let Some(existing) = instances.get(name) {
            return Some(existing.clone());
        }
        let instance = (entry.factory)();
        instances.insert(name.to_string(), instance.clone());
        Some(instance)
    }

    /// Force-instantiate the named tools, warming the cache. Unknown names
    /// are skipped with a warning rather than failing the whole call.
    pub fn preload_essentials(&self, names: &[&str]) {
        for name in names {
            if self.get(name).is_none() {
                tracing::warn!(tool = %name, "preload_essentials: unknown tool, skipping");
            }
        }
    }

    /// Remove a tool's cached instance and its spec, so a later `register_spec`
    /// + `get` starts fresh. Not part of the steady-state contract — used by
    /// tests and hot-reload tooling.
    pub fn unregister(&mut self, name: &str) {
        self.entries.remove(name);
        if let Ok(mut instances) = self.instances.write() {
            instances.remove(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.entries.get(name).map(|e| &e.spec)
    }

    pub fn specs(&self) -> Vec<&ToolSpec> {
        self.entries.values().map(|e| &e.spec).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filter registered tool specs by any tag (OR), category equality, or a
    /// regex name pattern. Does not force instantiation.
    pub fn filter(&self, criteria: &FilterCriteria) -> Vec<&ToolSpec> {
        let pattern = criteria
            .name_pattern
            .as_deref()
            .and_then(|p| Regex::new(p).ok());

        self.entries
            .values()
            .map(|e| &e.spec)
            .filter(|spec| {
                let tag_ok = criteria.tags.is_empty()
                    || criteria.tags.iter().any(|t| spec.tags.contains(t));
                let category_ok = criteria
                    .category
                    .as_ref()
                    .is_none_or(|c| &spec.category == c);
                let name_ok = pattern.as_ref().is_none_or(|re| re.is_match(&spec.name));
                tag_ok && category_ok && name_ok
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
