//! Traits shared across all protogate crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `protogate-types`, not on each other.

use crate::{ProtocolFormat, StreamChunk, error::Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde_json::Value;
use std::pin::Pin;

/// A pinned, sendable stream of raw backend byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Per-request information available to request converters.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Model name the client asked for.
    pub model: String,
    /// Whether the client asked for a streaming response.
    pub stream: bool,
}

/// Per-request information available to response converters.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    /// Model name the client asked for.
    pub model: String,
    /// The client request as received.
    pub original_request: Value,
    /// The request as sent to the backend.
    pub translated_request: Value,
    /// Prompt token estimate from the pair's token counter, if any.
    pub estimated_prompt_tokens: Option<u64>,
}

/// Converts a client request into the backend's request format.
///
/// Implementations must be pure (no I/O).
pub trait RequestTranslator: Send + Sync {
    /// # Errors
    ///
    /// Returns a `RequestConversion` error if the request cannot be expressed
    /// in the backend format.
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value>;
}

/// Converts a complete backend response into the client's response format.
///
/// Implementations must be pure (no I/O).
pub trait ResponseTranslator: Send + Sync {
    /// # Errors
    ///
    /// Returns a `ResponseConversion` error if the response is malformed.
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value>;
}

/// Creates per-request streaming sessions.
pub trait StreamTranslator: Send + Sync {
    /// Starts a fresh session; sessions are never shared between requests.
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession>;
}

/// Stateful conversion of one backend event stream.
///
/// Each backend event may yield zero or more client chunks.
pub trait StreamSession: Send {
    /// # Errors
    ///
    /// Returns a `ResponseConversion` (or `BackendTransport` for in-band
    /// backend errors) if the event cannot be converted.
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>>;

    /// Called once when the backend stream ends cleanly.
    ///
    /// # Errors
    ///
    /// Returns a `ResponseConversion` error if buffered state is invalid.
    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        Ok(Vec::new())
    }
}

/// Estimates prompt tokens for a client request.
pub trait TokenCounter: Send + Sync {
    /// # Errors
    ///
    /// Returns a `TokenCount` error if the request cannot be counted.
    fn count_tokens(&self, request: &Value) -> Result<u64>;

    /// Client-format body answering a token-count request.
    fn count_response(&self, tokens: u64) -> Value;
}

/// Renders errors in a client format's error schema.
pub trait ErrorEnvelope: Send + Sync {
    /// Error body for a non-streaming response.
    fn body(&self, err: &crate::TranslateError) -> Value;

    /// Terminal chunk for a failed stream.
    fn stream_chunk(&self, err: &crate::TranslateError) -> StreamChunk {
        StreamChunk::data(self.body(err))
    }
}

/// What a [`BackendCaller`] returns.
pub enum BackendResponse {
    /// A complete body.
    Complete(Bytes),
    /// A stream of raw body chunks.
    Stream(ByteStream),
}

/// Executes a translated request against a backend.
#[async_trait]
pub trait BackendCaller: Send + Sync {
    /// # Errors
    ///
    /// Returns a `BackendTransport` error on connection failure or a
    /// non-success status.
    async fn call(
        &self,
        target: &ProtocolFormat,
        model: &str,
        request: Value,
        stream: bool,
    ) -> Result<BackendResponse>;
}

/// Supplies credentials for backend calls.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns a `BackendTransport` error if no credential is available.
    async fn credential(&self, backend: &ProtocolFormat) -> Result<String>;
}
