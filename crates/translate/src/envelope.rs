//! Error schemas of the client dialects.

use protogate_engine::envelope::classify;
use protogate_types::{ErrorEnvelope, ErrorKind, StreamChunk, TranslateError};
use serde_json::{Value, json};

/// Anthropic: `{"type":"error","error":{"type","message"}}`, streamed as
/// `event: error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeEnvelope;

fn claude_error_type(err: &TranslateError) -> &'static str {
    match err.kind() {
        ErrorKind::UnsupportedPair | ErrorKind::ModeUnsupported | ErrorKind::RequestConversion => {
            "invalid_request_error"
        }
        ErrorKind::BackendTransport => match err.status() {
            Some(401) => "authentication_error",
            Some(403) => "permission_error",
            Some(404) => "not_found_error",
            Some(413) => "request_too_large",
            Some(429) => "rate_limit_error",
            Some(503 | 529) => "overloaded_error",
            Some(400..=499) => "invalid_request_error",
            _ => "api_error",
        },
        _ => "api_error",
    }
}

impl ErrorEnvelope for ClaudeEnvelope {
    fn body(&self, err: &TranslateError) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": claude_error_type(err),
                "message": err.message(),
            }
        })
    }

    fn stream_chunk(&self, err: &TranslateError) -> StreamChunk {
        StreamChunk::named("error", self.body(err))
    }
}

/// Google: `{"error":{"code","message","status"}}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiEnvelope;

fn google_status(code: u16) -> &'static str {
    match code {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        408 | 504 => "DEADLINE_EXCEEDED",
        429 => "RESOURCE_EXHAUSTED",
        499 => "CANCELLED",
        502 | 503 => "UNAVAILABLE",
        _ => "INTERNAL",
    }
}

impl ErrorEnvelope for GeminiEnvelope {
    fn body(&self, err: &TranslateError) -> Value {
        let code = err.http_status();
        json!({
            "error": {
                "code": code,
                "message": err.message(),
                "status": google_status(code),
            }
        })
    }
}

/// `OpenAI` Responses: the `OpenAI` body, streamed as an `error` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponsesEnvelope;

impl ErrorEnvelope for ResponsesEnvelope {
    fn body(&self, err: &TranslateError) -> Value {
        let (error_type, code) = classify(err);
        json!({
            "error": {
                "message": err.message(),
                "type": error_type,
                "code": code,
            }
        })
    }

    fn stream_chunk(&self, err: &TranslateError) -> StreamChunk {
        let (_, code) = classify(err);
        StreamChunk::named(
            "error",
            json!({
                "type": "error",
                "code": code,
                "message": err.message(),
                "param": null,
            }),
        )
    }
}
