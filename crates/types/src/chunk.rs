//! Client-facing stream chunks.

use bytes::Bytes;
use serde_json::Value;

/// One translated unit of a streaming response, already in client format.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// SSE event name, for dialects that name their events (Claude, Responses).
    pub event: Option<String>,
    /// JSON payload.
    pub data: Value,
}

impl StreamChunk {
    /// An unnamed `data:` chunk.
    #[must_use]
    pub fn data(data: Value) -> Self {
        Self { event: None, data }
    }

    /// A chunk carrying an explicit `event:` line.
    pub fn named(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: Some(event.into()),
            data,
        }
    }

    /// Encodes the chunk as one server-sent event.
    #[must_use]
    pub fn to_sse(&self) -> Bytes {
        match &self.event {
            Some(event) => Bytes::from(format!("event: {event}\ndata: {}\n\n", self.data)),
            None => Bytes::from(format!("data: {}\n\n", self.data)),
        }
    }
}
