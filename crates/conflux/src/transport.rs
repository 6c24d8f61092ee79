//! Transport adapter trait
//!
//! Defines the uniform call contract every backend client implements. A
//! transport owns backend-specific framing (endpoint paths, field names,
//! stream framing) and hands back plain text: the dispatch layer never sees
//! wire detail.

use crate::extractor::ReasoningExtractor;
use crate::types::*;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Ordered sequence of raw text fragments as the backend produced them.
/// Backend framing is already stripped; reasoning arrives either inline as
/// `<think>` markers or not at all.
pub type RawStream = Pin<Box<dyn Stream<Item = TransportResult<String>> + Send>>;

/// Per-backend client translating the uniform call contract into a specific
/// wire protocol.
///
/// Implementations must be cheap to call concurrently; one transport is
/// exclusively owned by one pathway and shared across that pathway's calls.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name (stable, used in logs and snapshots)
    fn name(&self) -> &str;

    /// Model this transport is bound to
    fn model(&self) -> &str {
        ""
    }

    /// Whether `stream_with_reasoning` is implemented
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Whether the backend reports reasoning as a structured field
    fn supports_structured_reasoning(&self) -> bool {
        false
    }

    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> TransportResult<String>;

    /// Generate a completion with reasoning split out.
    ///
    /// The default implementation extracts inline `<think>` regions from
    /// `generate`'s output; structured backends override this and populate
    /// `reasoning` from their dedicated response field. Both paths produce
    /// the same shape.
    async fn generate_with_reasoning(&self, prompt: &str) -> TransportResult<ThinkingResponse> {
        let raw = self.generate(prompt).await?;
        let (reasoning, content) = ReasoningExtractor::split(&raw);
        Ok(ThinkingResponse {
            reasoning,
            content,
            ..Default::default()
        })
    }

    /// Stream raw text fragments for the prompt.
    async fn stream_with_reasoning(&self, _prompt: &str) -> TransportResult<RawStream> {
        Err(TransportError::Unsupported(format!(
            "transport {} does not support streaming",
            self.name()
        )))
    }
}
