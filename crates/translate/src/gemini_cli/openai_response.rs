//! `OpenAI` Responses clients served by the Gemini CLI backend.
//!
//! Same conversion as the public Gemini pair, inside the CLI envelope.

use super::gemini::{unwrap_response, wrap_request};
use crate::gemini::openai_response::{GeminiResponsesSession, GeminiToResponses, responses_to_gemini};
use crate::responses::ResponsesWriter;
use crate::common::str_of;
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator,
};
use serde_json::Value;

/// Converts Responses requests into CLI-wrapped `generateContent` requests.
#[derive(Debug, Clone, Default)]
pub struct ResponsesToGeminiCli {
    project: Option<String>,
}

impl ResponsesToGeminiCli {
    #[must_use]
    pub fn new(project: Option<String>) -> Self {
        Self { project }
    }
}

impl RequestTranslator for ResponsesToGeminiCli {
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
        let inner = responses_to_gemini(&req)?;
        let model = if ctx.model.is_empty() {
            str_of(&req, "model")
        } else {
            ctx.model.as_str()
        };
        wrap_request(model, self.project.as_deref(), inner)
    }
}

/// Converts a CLI response into a Responses object.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiCliToResponses;

impl ResponseTranslator for GeminiCliToResponses {
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
        GeminiToResponses.translate_response(ctx, unwrap_response(&res).clone())
    }
}

/// Streams CLI chunks as Responses events.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiCliToResponsesStream;

impl StreamTranslator for GeminiCliToResponsesStream {
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(CliResponsesSession(GeminiResponsesSession {
            writer: ResponsesWriter::new(&ctx.model, ctx.estimated_prompt_tokens.unwrap_or(0)),
        }))
    }
}

struct CliResponsesSession(GeminiResponsesSession);

impl StreamSession for CliResponsesSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        self.0.translate_event(unwrap_response(event))
    }

    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        self.0.finalize()
    }
}
