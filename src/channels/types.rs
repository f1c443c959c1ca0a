//! Channel message shape (§3 "Channel message", §4.3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::ToolCallDescriptor;

/// One of the three semantic channels a turn's output is routed across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Private reasoning — hidden from the user by default.
    Analysis,
    /// Tool calls and structured notes.
    Commentary,
    /// User-facing final text.
    Final,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Analysis, Channel::Commentary, Channel::Final];
}

/// Free-form, per-message metadata carried alongside channel content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Monotonic per-session sequence number (§3 invariant).
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub tool_calls: Vec<ToolCallDescriptor>,
    /// `true` while this channel message is still being streamed; the
    /// closing, non-partial message carries the same sequence number as
    /// every partial that preceded it.
    pub is_partial: bool,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

/// One routed, sequenced message on a [`Channel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: Channel,
    pub content: String,
    pub metadata: ChannelMetadata,
}

/// Per-session preference for which channels reach the notification sink.
/// Storage itself is unaffected by visibility — it always retains all three
/// channels (§4.3 "Visibility").
#[derive(Debug, Clone, Copy)]
pub struct ChannelVisibility {
    pub show_commentary: bool,
    pub show_analysis: bool,
}

impl Default for ChannelVisibility {
    fn default() -> Self {
        Self {
            show_commentary: true,
            show_analysis: false,
        }
    }
}

impl ChannelVisibility {
    pub fn is_visible(&self, channel: Channel) -> bool {
        match channel {
            Channel::Analysis => self.show_analysis,
            Channel::Commentary => self.show_commentary,
            Channel::Final => true,
        }
    }
}
