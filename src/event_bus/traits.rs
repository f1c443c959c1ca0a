//! Notification payloads pushed to the excluded WebSocket adapter (§6
//! "Asynchronous notifications").

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::channels::{Channel, ChannelMetadata};

/// Every event the session engine (or its manager) may push toward an
/// external adapter. `ChannelMessage` is the steady-state payload; the rest
/// are transport-level stream lifecycle events (§6: "Additional
/// transport-level events (stream open/close, error) as opaque records").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// One routed, sequenced, visibility-filtered channel message.
    ChannelMessage {
        channel: Channel,
        content: String,
        metadata: ChannelMetadata,
    },
    /// A turn began streaming from the model.
    StreamOpened { session_id: String },
    /// A turn's stream ended, successfully or not; `committed` reflects
    /// whether the atomic commit step actually appended anything.
    StreamClosed { session_id: String, committed: bool },
    /// A turn failed with a non-tool error (§7); nothing was committed.
    StreamError {
        session_id: String,
        kind: String,
        message: String,
    },
}

/// Selects which event variants a subscriber is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ChannelMessage,
    StreamOpened,
    StreamClosed,
    StreamError,
    /// Matches every variant.
    All,
}

impl EventType {
    /// Returns true if this filter matches `event`.
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            Self::All => true,
            Self::ChannelMessage => matches!(event, AppEvent::ChannelMessage { .. }),
            Self::StreamOpened => matches!(event, AppEvent::StreamOpened { .. }),
            Self::StreamClosed => matches!(event, AppEvent::StreamClosed { .. }),
            Self::StreamError => matches!(event, AppEvent::StreamError { .. }),
        }
    }
}

/// A set of event types used for filtering subscriptions.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn new(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn matches(&self, event: &AppEvent) -> bool {
        self.event_types.iter().any(|t| t.matches(event))
    }
}

/// Central pub/sub bus for application events.
///
/// All returned `Receiver`s receive every published event; callers are
/// responsible for filtering if they subscribed via [`subscribe_filtered`].
pub trait EventBus: Send + Sync {
    /// Publish an event to all active subscribers.
    fn publish(&self, event: AppEvent) -> Result<(), String>;

    /// Subscribe to all events.
    fn subscribe(&self) -> broadcast::Receiver<AppEvent>;

    /// Subscribe to events, pre-scoped to the given filter.
    ///
    /// The returned receiver still carries all events; the filter is provided
    /// as documentation / future optimisation surface. Consumers should call
    /// [`EventFilter::matches`] to discard unwanted events.
    fn subscribe_filtered(&self, filter: EventFilter) -> broadcast::Receiver<AppEvent>;
}
