//! Fallback error envelope for formats that register none.

use protogate_types::{ErrorEnvelope, ErrorKind, TranslateError};
use serde_json::{Value, json};

/// `{"error": {"message", "type", "code"}}`, the `OpenAI` error shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEnvelope;

/// Returns `(error_type, error_code)` for an error in `OpenAI` vocabulary.
#[must_use]
pub fn classify(err: &TranslateError) -> (&'static str, &'static str) {
    match err.kind() {
        ErrorKind::UnsupportedPair | ErrorKind::ModeUnsupported => {
            ("invalid_request_error", "unsupported_format")
        }
        ErrorKind::RequestConversion => ("invalid_request_error", "translation_error"),
        ErrorKind::BackendTransport => match err.status() {
            Some(429) => ("rate_limit_error", "rate_limit_exceeded"),
            Some(401) => ("authentication_error", "invalid_api_key"),
            Some(403) => ("permission_error", "insufficient_quota"),
            Some(404) => ("invalid_request_error", "model_not_found"),
            Some(400..=499) => ("invalid_request_error", "upstream_rejected"),
            _ => ("server_error", "upstream_error"),
        },
        ErrorKind::ResponseConversion => ("server_error", "translation_error"),
        ErrorKind::StreamCancelled => ("server_error", "cancelled"),
        ErrorKind::TokenCount | ErrorKind::Registry => ("server_error", "internal_error"),
    }
}

impl ErrorEnvelope for DefaultEnvelope {
    fn body(&self, err: &TranslateError) -> Value {
        let (error_type, error_code) = classify(err);
        json!({
            "error": {
                "message": err.message(),
                "type": error_type,
                "code": error_code,
            }
        })
    }
}
