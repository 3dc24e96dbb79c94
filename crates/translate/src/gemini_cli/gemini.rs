//! Gemini clients served by the Gemini CLI (Code Assist) backend.

use crate::common::str_of;
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Value, json};

/// Wraps a `generateContent` request as `{"model", "project", "request"}`.
pub(crate) fn wrap_request(model: &str, project: Option<&str>, mut inner: Value) -> Result<Value> {
    let Value::Object(map) = &mut inner else {
        return Err(TranslateError::request("request body must be an object"));
    };
    map.remove("model");
    let mut out = json!({ "model": model, "request": inner });
    if let Some(project) = project.filter(|p| !p.is_empty()) {
        out["project"] = json!(project);
    }
    Ok(out)
}

/// The Gemini payload inside a CLI response, or the value itself when it is
/// not wrapped.
pub(crate) fn unwrap_response(res: &Value) -> &Value {
    res.get("response").unwrap_or(res)
}

/// Wraps `generateContent` requests for the CLI backend.
#[derive(Debug, Clone, Default)]
pub struct GeminiToGeminiCliRequest {
    project: Option<String>,
}

impl GeminiToGeminiCliRequest {
    #[must_use]
    pub fn new(project: Option<String>) -> Self {
        Self { project }
    }
}

impl RequestTranslator for GeminiToGeminiCliRequest {
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
        if req.get("contents").and_then(Value::as_array).is_none() {
            return Err(TranslateError::request("missing 'contents'"));
        }
        let model = if ctx.model.is_empty() {
            str_of(&req, "model").to_string()
        } else {
            ctx.model.clone()
        };
        wrap_request(&model, self.project.as_deref(), req)
    }
}

/// Unwraps a CLI response.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiCliToGeminiResponse;

impl ResponseTranslator for GeminiCliToGeminiResponse {
    fn translate_response(&self, _ctx: &ResponseContext, res: Value) -> Result<Value> {
        Ok(unwrap_response(&res).clone())
    }
}

/// Unwraps each streamed CLI chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiCliToGeminiStream;

impl StreamTranslator for GeminiCliToGeminiStream {
    fn start(&self, _ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(UnwrapSession)
    }
}

struct UnwrapSession;

impl StreamSession for UnwrapSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        Ok(vec![StreamChunk::data(unwrap_response(event).clone())])
    }
}
