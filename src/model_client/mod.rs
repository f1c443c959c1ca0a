//! Streaming chat-completion client (§4.6, §6).
//!
//! # Key types
//! - [`ModelClient`] — the trait the session engine depends on.
//! - [`http::HttpModelClient`] — the production implementation, an
//!   OpenAI-compatible SSE client grounded on the same shape as the
//!   teacher's OpenRouter provider.

#[cfg(feature = "cache")]
pub mod cache;
pub mod client;
pub mod http;
pub mod types;

#[cfg(feature = "cache")]
pub use cache::ResponseCache;
pub use client::{ChunkStream, ModelClient, ModelClientConfig};
pub use http::{accumulate_stream, HttpModelClient};
pub use types::{
    AccumulatedResponse, ChatCompletionRequest, CompletionResponse, MessageRole, StreamChunk, ToolCallPart,
    ToolOffer, WireMessage,
};
