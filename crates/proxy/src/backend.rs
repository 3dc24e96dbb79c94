//! HTTP backend caller: sends translated requests to the configured upstreams.
//!
//! Each backend format has its own URL layout and auth header; everything
//! else (status check, stream vs complete) is shared.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt as _;
use protogate_config::{BackendConfig, Config};
use protogate_engine::{Frame, FrameDecoder, Framing};
use protogate_types::{
    AuthProvider, BackendCaller, BackendResponse, ByteStream, ProtocolFormat, Result,
    TranslateError,
};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Required Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn transport(e: reqwest::Error) -> TranslateError {
    TranslateError::transport(e.to_string()).with_source(e)
}

/// How a backend expects its credential.
enum AuthHeader {
    Bearer,
    AnthropicKey,
    GoogleKey,
}

fn auth_header(format: &ProtocolFormat) -> AuthHeader {
    if *format == ProtocolFormat::CLAUDE {
        AuthHeader::AnthropicKey
    } else if *format == ProtocolFormat::GEMINI {
        AuthHeader::GoogleKey
    } else {
        AuthHeader::Bearer
    }
}

/// Builds the request URL for `format`.
///
/// # Errors
///
/// Returns a `BackendTransport` error for formats without an HTTP binding.
fn endpoint(format: &ProtocolFormat, base_url: &str, model: &str, stream: bool) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let url = match format.as_str() {
        "openai" => format!("{base}/chat/completions"),
        "claude" => format!("{base}/v1/messages"),
        "gemini" if stream => format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse"),
        "gemini" => format!("{base}/v1beta/models/{model}:generateContent"),
        "gemini-cli" if stream => format!("{base}/v1internal:streamGenerateContent?alt=sse"),
        "gemini-cli" => format!("{base}/v1internal:generateContent"),
        "codex" => format!("{base}/responses"),
        "kiro" => format!("{base}/generateAssistantResponse"),
        other => {
            return Err(TranslateError::transport(format!(
                "backend format '{other}' has no HTTP binding"
            )));
        }
    };
    Ok(url)
}

/// [`BackendCaller`] that talks to real upstreams over HTTP.
pub struct HttpBackend {
    http: Client,
    backends: BTreeMap<ProtocolFormat, BackendConfig>,
    auth: Arc<dyn AuthProvider>,
}

impl HttpBackend {
    #[must_use]
    pub fn new(http: Client, config: &Config, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            http,
            backends: config.backends.clone(),
            auth,
        }
    }

    /// Sends a request and checks for success status.
    ///
    /// On non-2xx responses, reads the body text and returns an upstream
    /// error carrying the status.
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        let resp = builder.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let text = match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(%status, error = %e, "failed to read upstream error body");
                    String::new()
                }
            };
            tracing::debug!(%status, body = %text, "upstream returned error");
            Err(TranslateError::upstream(status.as_u16(), text))
        }
    }

    fn byte_stream(resp: reqwest::Response) -> ByteStream {
        Box::pin(resp.bytes_stream().map(|r| r.map_err(transport)))
    }
}

/// Pulls the final response object out of a buffered Codex SSE body.
fn codex_final_response(body: &[u8]) -> Result<Bytes> {
    let mut decoder = FrameDecoder::new(Framing::Sse);
    decoder.push(body);
    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame()? {
        frames.push(frame);
    }
    frames.extend(decoder.finish()?);

    for frame in frames {
        let Frame::Event(event) = frame else {
            continue;
        };
        match event.get("type").and_then(Value::as_str) {
            Some("response.completed" | "response.incomplete") => {
                let response = event.get("response").cloned().unwrap_or(Value::Null);
                return serde_json::to_vec(&response)
                    .map(Bytes::from)
                    .map_err(|e| TranslateError::response(e.to_string()).with_source(e));
            }
            Some("response.failed" | "error") => {
                let message = event
                    .pointer("/response/error/message")
                    .or_else(|| event.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("codex response failed");
                return Err(TranslateError::transport(message));
            }
            _ => {}
        }
    }
    Err(TranslateError::transport(
        "codex stream ended without a completed response",
    ))
}

#[async_trait]
impl BackendCaller for HttpBackend {
    async fn call(
        &self,
        target: &ProtocolFormat,
        model: &str,
        request: Value,
        stream: bool,
    ) -> Result<BackendResponse> {
        let config = self.backends.get(target).ok_or_else(|| {
            TranslateError::transport(format!("no backend configured for '{target}'"))
        })?;
        // codex only answers with an event stream
        let wire_stream = stream || *target == ProtocolFormat::CODEX;
        let url = endpoint(target, &config.base_url, model, wire_stream)?;
        let credential = self.auth.credential(target).await?;

        tracing::debug!(backend = %target, %url, stream, "calling backend");

        let mut builder = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .header("content-type", "application/json");
        if wire_stream {
            builder = builder.header("accept", "text/event-stream");
        }
        builder = match auth_header(target) {
            AuthHeader::AnthropicKey => builder
                .header("x-api-key", credential)
                .header("anthropic-version", ANTHROPIC_VERSION),
            AuthHeader::GoogleKey => builder.header("x-goog-api-key", credential),
            AuthHeader::Bearer => builder.header("authorization", format!("Bearer {credential}")),
        };

        let resp = self.send(builder.json(&request)).await?;

        if stream {
            return Ok(BackendResponse::Stream(Self::byte_stream(resp)));
        }
        let body = resp.bytes().await.map_err(transport)?;
        if *target == ProtocolFormat::CODEX {
            return codex_final_response(&body).map(BackendResponse::Complete);
        }
        Ok(BackendResponse::Complete(body))
    }
}
