pub mod agents;
pub mod capability;
pub mod channels;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event_bus;
pub mod mailbox;
pub mod model_client;
pub mod prompt;
pub mod session;
pub mod templates;
pub mod tools;
pub mod workspace;

/// Convenience re-exports for the most commonly used traits and types
/// across the runtime.
///
/// ```rust
/// use meridian_hub::prelude::*;
/// ```
pub mod prelude {
    // Agent registry
    pub use crate::agents::{AgentDefinition, AgentRegistry, ModelOverride};

    // Model capability
    pub use crate::capability::{CapabilityTable, ModelCapability};

    // Channel routing and storage
    pub use crate::channels::{Channel, ChannelMessage, ChannelMetadata, ChannelStorage, ChannelVisibility};

    // Crate-wide error taxonomy
    pub use crate::error::{EngineError, EngineResult};

    // Event bus
    pub use crate::event_bus::{AppEvent, EventBus, TokioBroadcastBus};

    // Inter-agent mailbox
    pub use crate::mailbox::{Mailbox, MailboxEntry, NewMail, Priority};

    // Model client
    pub use crate::model_client::{ChatCompletionRequest, HttpModelClient, ModelClient};

    // Prompt optimizer
    pub use crate::prompt::PromptOptimizer;

    // Session engine and manager
    pub use crate::session::{Session, SessionEngine, SessionManager, Transcript, TurnOutcome, TurnOverrides};

    // Tool system
    pub use crate::tools::{Tool, ToolRegistry, ToolResult, ToolSetRegistry};

    // Path/workspace guard
    pub use crate::workspace::PathGuard;
}
