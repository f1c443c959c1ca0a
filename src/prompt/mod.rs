//! Prompt optimizer (§4.7): capability-aware rewrites of the user's text
//! before it is sent to the model. A pure function of its inputs — it never
//! touches the transcript.

use std::collections::HashMap;

use regex::Regex;

use crate::capability::ModelCapability;

/// Messages recognised as "just keep going" and exempted from every rewrite.
const CONTINUATION_PHRASES: &[&str] = &["continue", "ok", "okay", "keep going", "go on", "yes", "proceed"];

/// Which direction the optimizer rewrote in, also the key used to look up
/// agent-specific hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    MultiTool,
    SingleTool,
}

impl Strategy {
    fn as_str(&self) -> &'static str {
        match self {
            Strategy::MultiTool => "multi_tool",
            Strategy::SingleTool => "single_tool",
        }
    }
}

pub struct PromptOptimizer {
    /// Below this word count, a message is treated like a continuation and
    /// left untouched.
    word_threshold: usize,
    agent_hints: HashMap<(String, String), String>,
}

impl Default for PromptOptimizer {
    fn default() -> Self {
        Self {
            word_threshold: 4,
            agent_hints: HashMap::new(),
        }
    }
}

impl PromptOptimizer {
    pub fn new(word_threshold: usize) -> Self {
        Self {
            word_threshold,
            agent_hints: HashMap::new(),
        }
    }

    pub fn with_agent_hint(mut self, agent_id: impl Into<String>, strategy: Strategy, hint: impl Into<String>) -> Self {
        self.agent_hints.insert((agent_id.into(), strategy.as_str().to_string()), hint.into());
        self
    }

    fn is_continuation(text: &str) -> bool {
        let normalized = text.trim().trim_end_matches(['.', '!', '?']).to_lowercase();
        CONTINUATION_PHRASES.contains(&normalized.as_str())
    }

    fn is_short(&self, text: &str) -> bool {
        text.split_whitespace().count() < self.word_threshold
    }

    /// Rewrite `text` for `capability`, optionally appending an
    /// agent-specific hint. Returns the text unchanged (no hint appended
    /// either) for continuation messages and short messages.
    pub fn optimize(&self, text: &str, capability: &ModelCapability, agent_id: Option<&str>) -> String {
        if Self::is_continuation(text) || self.is_short(text) {
            return text.to_string();
        }

        let strategy = if capability.multi_tool {
            Strategy::MultiTool
        } else {
            Strategy::SingleTool
        };

        let mut rewritten = match strategy {
            Strategy::MultiTool => rewrite_to_parallel(text),
            Strategy::SingleTool => rewrite_to_sequential(text),
        };

        let rewrite_changed_little = rewritten == text;
        if rewrite_changed_little {
            let hint = match strategy {
                Strategy::MultiTool => " (Hint: independent steps can be executed simultaneously.)",
                Strategy::SingleTool => " (Hint: proceed one step at a time.)",
            };
            rewritten.push_str(hint);
        }

        if let Some(agent_id) = agent_id {
            if let Some(hint) = self.agent_hints.get(&(agent_id.to_string(), strategy.as_str().to_string())) {
                rewritten.push(' ');
                rewritten.push_str(hint);
            }
        }

        rewritten
    }
}

fn rewrite_to_parallel(text: &str) -> String {
    let first_then = Regex::new(r"(?i)first (.+?) then (.+)").expect("static pattern");
    let rewritten = first_then.replace(text, "simultaneously $1 and $2").into_owned();
    let one_by_one = Regex::new(r"(?i)one by one").expect("static pattern");
    one_by_one.replace(&rewritten, "all at once").into_owned()
}

fn rewrite_to_sequential(text: &str) -> String {
    let simultaneously = Regex::new(r"(?i)simultaneously (.+?) and (.+)").expect("static pattern");
    let rewritten = simultaneously.replace(text, "first $1 then $2").into_owned();
    let all_at_once = Regex::new(r"(?i)all at once").expect("static pattern");
    all_at_once.replace(&rewritten, "one by one").into_owned()
}
