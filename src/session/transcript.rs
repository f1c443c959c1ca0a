//! The transcript: an append-only log of [`Message`]s owned exclusively by a
//! [`super::Session`].
//!
//! # Invariants
//! - Indices are contiguous and never mutated once appended (`§3 Session`).
//! - For any `assistant` message carrying `tool_calls`, every `tool_call_id`
//!   must appear exactly once as a subsequent `tool` message before the next
//!   `assistant`/`user` entry (`§3 Message`, tested by
//!   [`Transcript::validate_tool_pairing`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured tool invocation emitted by the model inside an `assistant`
/// message, per the wire shape in §6: `{id, function:{name, arguments}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDescriptor {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry in a session transcript.
///
/// Tagged variant per §3: `user | assistant | tool | system`. Every message
/// carries an ISO-8601 timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
        timestamp: DateTime<Utc>,
    },
    Assistant {
        content: Option<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCallDescriptor>,
        timestamp: DateTime<Utc>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    System {
        content: String,
        timestamp: DateTime<Utc>,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(
        content: Option<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCallDescriptor>,
    ) -> Self {
        Message::Assistant {
            content,
            reasoning,
            tool_calls,
            timestamp: Utc::now(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::User { timestamp, .. }
            | Message::Assistant { timestamp, .. }
            | Message::Tool { timestamp, .. }
            | Message::System { timestamp, .. } => *timestamp,
        }
    }

    /// Defensive coercion of a stray raw string into a `user` message,
    /// per step 1 of the session engine algorithm ("silently coerce ... and
    /// warn"). The transcript itself only ever holds [`Message`]; this helper
    /// exists for callers ingesting loosely-typed history (e.g. a replay
    /// driver feeding raw JSON).
    pub fn coerce_raw_string(raw: &str) -> Self {
        tracing::warn!(
            "coercing a raw string transcript entry into a user message: {raw:?} does not match any known role"
        );
        Message::user(raw)
    }
}

/// Append-only transcript for one session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Append a single message without any pairing validation. Used by the
    /// session engine's atomic-commit step, which appends a fully-formed
    /// batch (user, assistant, tool...) in one shot via [`Transcript::commit_turn`].
    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Atomically append a user message, its assistant reply, and the tool
    /// results that discharge the assistant's tool calls, in that order.
    ///
    /// Returns an error (appending nothing) if the tool messages don't
    /// exactly discharge the assistant's `tool_calls` in order — this is the
    /// sole enforcement point for the tool-call pairing invariant.
    pub fn commit_turn(
        &mut self,
        user: Message,
        assistant: Message,
        tool_results: Vec<Message>,
    ) -> Result<(), String> {
        let Message::Assistant { tool_calls, .. } = &assistant else {
            return Err("commit_turn: assistant slot must be an Assistant message".to_string());
        };

        if tool_calls.len() != tool_results.len() {
            return Err(format!(
                "commit_turn: {} tool_calls but {} tool results",
                tool_calls.len(),
                tool_results.len()
            ));
        }

        for (call, result) in tool_calls.iter().zip(tool_results.iter()) {
            match result {
                Message::Tool { tool_call_id, .. } if *tool_call_id == call.id => {}
                Message::Tool { tool_call_id, .. } => {
                    return Err(format!(
                        "commit_turn: tool result order mismatch, expected call id {} got {}",
                        call.id, tool_call_id
                    ));
                }
                _ => return Err("commit_turn: tool_results must all be Tool messages".to_string()),
            }
        }

        self.push(user);
        self.push(assistant);
        for t in tool_results {
            self.push(t);
        }
        Ok(())
    }

    /// Verify the tool-call pairing invariant holds over the whole transcript.
    /// Intended for tests and defensive assertions, not the hot path (the
    /// invariant is actually enforced per-turn by [`Transcript::commit_turn`]).
    pub fn validate_tool_pairing(&self) -> Result<(), String> {
        let mut iter = self.messages.iter().peekable();
        while let Some(msg) = iter.next() {
            let Message::Assistant { tool_calls, .. } = msg else {
                continue;
            };
            if tool_calls.is_empty() {
                continue;
            }
            for call in tool_calls {
                match iter.next() {
                    Some(Message::Tool { tool_call_id, .. }) if tool_call_id == &call.id => {}
                    other => {
                        return Err(format!(
                            "expected tool result for call {} next, found {other:?}",
                            call.id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
