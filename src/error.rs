//! Crate-wide error taxonomy.
//!
//! Mirrors the disposition table from the design doc: non-tool failures
//! bubble up as an [`EngineError`] and abort the turn without committing
//! anything; tool-level failures are captured into the transcript instead
//! and never reach this type.

use thiserror::Error;

/// Errors surfaced by a single session turn.
///
/// Every variant here means "nothing was committed to the transcript" —
/// the one exception handled elsewhere is tool execution, which is
/// recovered locally by the session engine and never raised as an error.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("required configuration missing: {0}")]
    ConfigMissing(String),

    #[error("provider rejected credentials: {0}")]
    Auth(String),

    #[error("provider is rate-limiting requests: {0}")]
    RateLimit(String),

    #[error("transport failure or timeout: {0}")]
    Connection(String),

    #[error("malformed provider response: {0}")]
    Api(String),

    #[error("stream ended with no content, reasoning, or tool calls after retries")]
    EmptyResponse,

    #[error("turn exceeded its deadline")]
    Timeout,

    #[error("cooperative shutdown requested mid-stream")]
    Shutdown,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short machine-stable tag, e.g. for notification payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ConfigMissing(_) => "config_missing",
            EngineError::Auth(_) => "auth",
            EngineError::RateLimit(_) => "rate_limit",
            EngineError::Connection(_) => "connection",
            EngineError::Api(_) => "api",
            EngineError::EmptyResponse => "empty_response",
            EngineError::Timeout => "timeout",
            EngineError::Shutdown => "shutdown",
            EngineError::Internal(_) => "internal",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
