//! `OpenAI` chat completions and Responses handlers.

use crate::{
    AppState,
    error::ApiError,
    relay::{Relay, RequestHead, relay},
};
use axum::{body::Bytes, extract::State, response::Response};
use protogate_types::ProtocolFormat;
use std::sync::Arc;

/// Handles `POST /v1/chat/completions`.
///
/// Streaming answers end with `data: [DONE]`.
///
/// # Errors
///
/// Returns [`ApiError`] in the `OpenAI` error schema.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let head = RequestHead::peek(&body);
    tracing::info!(model = ?head.model, stream = head.stream, "chat completion request");
    let route = Relay {
        client: ProtocolFormat::OPENAI,
        model: None,
        stream: head.stream,
        done_marker: true,
    };
    relay(&state, route, body).await
}

/// Handles `POST /v1/responses`.
///
/// # Errors
///
/// Returns [`ApiError`] in the `OpenAI` error schema.
pub async fn responses(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let head = RequestHead::peek(&body);
    tracing::info!(model = ?head.model, stream = head.stream, "responses request");
    let route = Relay {
        client: ProtocolFormat::OPENAI_RESPONSE,
        model: None,
        stream: head.stream,
        done_marker: false,
    };
    relay(&state, route, body).await
}
