//! The [`ModelClient`] trait and shared construction config (§4.6).

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::EngineError;

use super::types::{ChatCompletionRequest, CompletionResponse, StreamChunk};

/// Construction-time settings common to every provider implementation.
/// Missing `api_key` or `default_model` is a [`EngineError::ConfigMissing`]
/// at construction time (§7: "required model/API settings absent ...
/// surfaced at construction; no turns accepted").
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub http_referer: String,
    pub title: String,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl ModelClientConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.api_key.trim().is_empty() {
            return Err(EngineError::ConfigMissing("api_key".to_string()));
        }
        if self.default_model.trim().is_empty() {
            return Err(EngineError::ConfigMissing("default_model".to_string()));
        }
        url::Url::parse(&self.base_url).map_err(|e| EngineError::ConfigMissing(format!("base_url: {e}")))?;
        Ok(())
    }
}

/// An asynchronous sequence of stream chunks, terminated by the provider's
/// `[DONE]` sentinel or an error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, EngineError>> + Send>>;

/// The contract the session engine depends on (§4.6 "Response contract").
///
/// `shutdown` is a cooperative signal: implementations must poll it between
/// chunks and return [`EngineError::Shutdown`] promptly once it fires,
/// rather than only checking it once up front (§5 "a process-wide
/// cooperative shutdown signal ... causes every in-flight stream consumer to
/// break out of its loop promptly").
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream(
        &self,
        request: ChatCompletionRequest,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<ChunkStream, EngineError>;

    /// Non-streaming completion, the only request shape the optional cache
    /// (§4.6) may gate.
    async fn complete(&self, request: ChatCompletionRequest) -> Result<CompletionResponse, EngineError>;
}
