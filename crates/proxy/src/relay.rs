//! Shared request path: route lookup, dispatch, usage accounting, SSE output.

use crate::{AppState, UsageStats, error::ApiError};
use axum::{
    Json,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use bytes::Bytes;
use futures_util::{StreamExt as _, stream};
use protogate_engine::{CancellationToken, ChunkStream, TranslateRequest, Translated};
use protogate_types::{ProtocolFormat, StreamChunk, TranslateError};
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;

/// The few request fields the HTTP layer reads itself.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RequestHead {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

impl RequestHead {
    /// Best-effort peek; malformed bodies are reported by the dispatcher.
    pub(crate) fn peek(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Cancels the request token when the response (or its body) is dropped.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// How the HTTP layer should frame a translated request.
pub(crate) struct Relay {
    pub client: ProtocolFormat,
    /// Model from the URL, overriding the body.
    pub model: Option<String>,
    pub stream: bool,
    /// Append `data: [DONE]` after the last chunk.
    pub done_marker: bool,
}

/// Backend format routed for `client`.
pub(crate) fn backend_for(
    state: &AppState,
    client: &ProtocolFormat,
) -> Result<ProtocolFormat, ApiError> {
    state.config.route(client).cloned().ok_or_else(|| {
        ApiError::reject(
            state.dispatcher.registry(),
            client,
            TranslateError::request(format!("no backend is routed for client format '{client}'")),
        )
    })
}

/// Runs one request through the dispatcher and renders the outcome.
pub(crate) async fn relay(state: &AppState, route: Relay, body: Bytes) -> Result<Response, ApiError> {
    let backend = backend_for(state, &route.client)?;
    let model_name = route
        .model
        .clone()
        .or_else(|| RequestHead::peek(&body).model)
        .unwrap_or_else(|| "unknown".to_string());

    let cancel = CancellationToken::new();
    let guard = CancelOnDrop(cancel.clone());
    let client = route.client.clone();
    let request = TranslateRequest {
        client: route.client,
        backend,
        model: route.model,
        body,
        stream: route.stream,
    };

    match state.dispatcher.translate(request, cancel).await {
        Ok(Translated::Complete(json)) => {
            let (input_tok, output_tok) = extract_usage_tokens(&json);
            state
                .usage
                .record_success(&client, &model_name, input_tok, output_tok);
            Ok(Json(json).into_response())
        }
        Ok(Translated::Stream(chunks)) => {
            let tally = StreamTally {
                usage: Arc::clone(&state.usage),
                client,
                model: model_name,
                input_tokens: 0,
                output_tokens: 0,
            };
            Ok(to_sse(chunks, guard, tally, route.done_marker).into_response())
        }
        Err(e) => {
            state.usage.record_failure(&client, &model_name);
            Err(ApiError(e))
        }
    }
}

/// Token usage seen in a stream's chunks, recorded once the stream is dropped.
struct StreamTally {
    usage: Arc<UsageStats>,
    client: ProtocolFormat,
    model: String,
    input_tokens: u64,
    output_tokens: u64,
}

impl StreamTally {
    fn observe(&mut self, chunk: &StreamChunk) {
        let (input, output) = extract_usage_tokens(&chunk.data);
        self.input_tokens = self.input_tokens.max(input);
        self.output_tokens = self.output_tokens.max(output);
    }
}

impl Drop for StreamTally {
    fn drop(&mut self) {
        self.usage.record_success(
            &self.client,
            &self.model,
            self.input_tokens,
            self.output_tokens,
        );
    }
}

/// Everything a streamed response body owns until it is dropped.
struct SseBody {
    /// `None` once the translated stream has ended.
    chunks: Option<ChunkStream>,
    trailer: Option<Event>,
    tally: StreamTally,
    /// Cancels the backend call when the client goes away.
    _guard: CancelOnDrop,
}

fn sse_event(chunk: &StreamChunk) -> Event {
    let event = Event::default().data(chunk.data.to_string());
    match &chunk.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Encodes translated chunks as `text/event-stream`.
fn to_sse(
    chunks: ChunkStream,
    guard: CancelOnDrop,
    tally: StreamTally,
    done_marker: bool,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>> + Send> {
    let body = SseBody {
        chunks: Some(chunks),
        trailer: done_marker.then(|| Event::default().data("[DONE]")),
        tally,
        _guard: guard,
    };
    let events = stream::unfold(body, |mut body| async move {
        let next = match body.chunks.as_mut() {
            Some(chunks) => chunks.next().await,
            None => None,
        };
        match next {
            Some(chunk) => {
                body.tally.observe(&chunk);
                Some((sse_event(&chunk), body))
            }
            None => {
                body.chunks = None;
                let trailer = body.trailer.take()?;
                Some((trailer, body))
            }
        }
    })
    .map(Ok);
    Sse::new(events)
}

/// Input/output token counts from a complete response or stream chunk in
/// any client format.
fn extract_usage_tokens(json: &Value) -> (u64, u64) {
    // gemini-cli and Responses events wrap in `response`, Claude's
    // message_start in `message`
    let json = json
        .get("response")
        .or_else(|| json.get("message"))
        .filter(|v| v.is_object())
        .unwrap_or(json);
    let count = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| json.pointer(k).and_then(Value::as_u64))
            .unwrap_or(0)
    };
    let input = count(&[
        "/usage/prompt_tokens",
        "/usage/input_tokens",
        "/usageMetadata/promptTokenCount",
    ]);
    let output = count(&[
        "/usage/completion_tokens",
        "/usage/output_tokens",
        "/usageMetadata/candidatesTokenCount",
    ]);
    (input, output)
}
