//! Gemini (`v1beta`) and Gemini CLI (`v1internal`) handlers.
//!
//! Both put the method after a colon in the last path segment, e.g.
//! `models/gemini-2.5-pro:streamGenerateContent`.

use crate::{
    AppState,
    error::ApiError,
    relay::{Relay, backend_for, relay},
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::Uri,
    response::{IntoResponse, Response},
};
use protogate_types::{ProtocolFormat, TranslateError};
use std::sync::Arc;

/// Methods shared by both Gemini surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Generate,
    StreamGenerate,
    CountTokens,
}

impl Method {
    fn parse(method: &str) -> Option<Self> {
        match method {
            "generateContent" => Some(Self::Generate),
            "streamGenerateContent" => Some(Self::StreamGenerate),
            "countTokens" => Some(Self::CountTokens),
            _ => None,
        }
    }
}

async fn handle(
    state: &AppState,
    client: ProtocolFormat,
    model: Option<String>,
    method: &str,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Some(method) = Method::parse(method) else {
        return Err(ApiError::reject(
            state.dispatcher.registry(),
            &client,
            TranslateError::request(format!("unsupported method '{method}'")),
        ));
    };
    tracing::info!(%client, model = ?model, ?method, "gemini request");
    if method == Method::CountTokens {
        let backend = backend_for(state, &client)?;
        let counted = state.dispatcher.count_tokens(&client, &backend, &body)?;
        return Ok(Json(counted).into_response());
    }
    let route = Relay {
        client,
        model,
        stream: method == Method::StreamGenerate,
        done_marker: false,
    };
    relay(state, route, body).await
}

/// Handles `POST /v1beta/models/{model}:{method}`.
///
/// # Errors
///
/// Returns [`ApiError`] in the Google error schema.
pub async fn models_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (model, method) = action.split_once(':').unwrap_or((action.as_str(), ""));
    handle(
        &state,
        ProtocolFormat::GEMINI,
        Some(model.to_string()),
        method,
        body,
    )
    .await
}

/// Handles `POST /v1internal:{method}`; the model travels in the body.
///
/// # Errors
///
/// Returns [`ApiError`] in the Google error schema.
pub async fn internal_action(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let method = uri.path().strip_prefix("/v1internal:").unwrap_or_default();
    handle(&state, ProtocolFormat::GEMINI_CLI, None, method, body).await
}
