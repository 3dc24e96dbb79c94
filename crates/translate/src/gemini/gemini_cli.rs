//! Gemini CLI clients served by the public Gemini backend.
//!
//! The CLI wraps a `generateContent` request as `{"model", "project",
//! "request"}` and expects each response wrapped as `{"response": ..}`.

use crate::common::str_of;
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Value, json};

/// Fields of the CLI's inner request that the public API rejects.
const CLI_ONLY_FIELDS: &[&str] = &["session_id", "model"];

/// Unwraps CLI requests into `generateContent` requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiCliToGemini;

impl RequestTranslator for GeminiCliToGemini {
    fn translate_request(&self, _ctx: &RequestContext, req: Value) -> Result<Value> {
        let Value::Object(mut envelope) = req else {
            return Err(TranslateError::request("request body must be an object"));
        };
        let Some(Value::Object(mut inner)) = envelope.remove("request") else {
            return Err(TranslateError::request("missing 'request'"));
        };
        for field in CLI_ONLY_FIELDS {
            inner.remove(*field);
        }
        if let Some(Value::Array(contents)) = inner.get_mut("contents") {
            for content in contents.iter_mut() {
                if str_of(content, "role").is_empty()
                    && let Value::Object(map) = content
                {
                    map.insert("role".into(), json!("user"));
                }
            }
        }
        Ok(Value::Object(inner))
    }
}

/// Wraps a `generateContent` response for the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiToGeminiCli;

impl ResponseTranslator for GeminiToGeminiCli {
    fn translate_response(&self, _ctx: &ResponseContext, res: Value) -> Result<Value> {
        Ok(json!({ "response": res }))
    }
}

/// Wraps each streamed chunk for the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiToGeminiCliStream;

impl StreamTranslator for GeminiToGeminiCliStream {
    fn start(&self, _ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(WrapSession)
    }
}

struct WrapSession;

impl StreamSession for WrapSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        Ok(vec![StreamChunk::data(json!({ "response": event }))])
    }
}
