//! Anthropic Messages handlers.

use crate::{
    AppState,
    error::ApiError,
    relay::{Relay, RequestHead, backend_for, relay},
};
use axum::{Json, body::Bytes, extract::State, response::Response};
use protogate_types::ProtocolFormat;
use serde_json::Value;
use std::sync::Arc;

/// Handles `POST /v1/messages`.
///
/// # Errors
///
/// Returns [`ApiError`] in the Anthropic error schema.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let head = RequestHead::peek(&body);
    tracing::info!(model = ?head.model, stream = head.stream, "messages request");
    let route = Relay {
        client: ProtocolFormat::CLAUDE,
        model: None,
        stream: head.stream,
        done_marker: false,
    };
    relay(&state, route, body).await
}

/// Handles `POST /v1/messages/count_tokens`.
///
/// # Errors
///
/// Returns [`ApiError`] if the routed pair has no token counter.
pub async fn count_tokens(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let client = ProtocolFormat::CLAUDE;
    let backend = backend_for(&state, &client)?;
    let counted = state.dispatcher.count_tokens(&client, &backend, &body)?;
    Ok(Json(counted))
}
