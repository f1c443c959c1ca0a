//! Session entity and execution engine.
//!
//! # Key types
//! - [`Session`] — transcript, current agent identity, channel visibility.
//! - [`engine::SessionEngine`] — drives one user turn (§4.1).
//! - [`manager::SessionManager`] — multiplexes many sessions over one process.

pub mod engine;
pub mod manager;
pub mod transcript;

pub use engine::{DispatchStrategy, SessionEngine, TurnOutcome, TurnOverrides};
pub use manager::SessionManager;
pub use transcript::{Message, ToolCallDescriptor, Transcript};

use crate::channels::ChannelVisibility;

/// A single interactive conversation. Identified by an opaque string id.
///
/// The session exclusively owns its [`Transcript`] (§3 Ownership) — no other
/// component is permitted to mutate it directly; all mutation happens
/// through [`engine::SessionEngine::process`]'s atomic commit step.
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub transcript: Transcript,
    pub visibility: ChannelVisibility,
    /// Monotonically increasing per-turn counter, bumped once per call to
    /// `process()`. Used only for diagnostics; channel sequencing is owned
    /// by the channel router (see `channels::storage`), not here — see
    /// DESIGN.md for why the two counters are kept separate.
    pub turn_count: u64,
}

impl Session {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            transcript: Transcript::new(),
            visibility: ChannelVisibility::default(),
            turn_count: 0,
        }
    }
}
