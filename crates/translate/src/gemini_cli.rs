//! Gemini CLI (Code Assist `v1internal`) backend.

pub mod gemini;
pub mod openai_response;

use crate::TranslatorOptions;
use crate::token::{GeminiTokenCounter, ResponsesTokenCounter};
use protogate_engine::{RegistryBuilder, ResponseCapabilities};
use protogate_types::{ProtocolFormat, Result};

/// Registers `gemini -> gemini-cli` and `openai-response -> gemini-cli`.
pub(crate) fn register(builder: &mut RegistryBuilder, options: &TranslatorOptions) -> Result<()> {
    builder.register(
        ProtocolFormat::GEMINI,
        ProtocolFormat::GEMINI_CLI,
        gemini::GeminiToGeminiCliRequest::new(options.gemini_cli_project.clone()),
        ResponseCapabilities::new()
            .with_stream(gemini::GeminiCliToGeminiStream)
            .with_non_stream(gemini::GeminiCliToGeminiResponse)
            .with_token_counter(GeminiTokenCounter),
    )?;
    builder.register(
        ProtocolFormat::OPENAI_RESPONSE,
        ProtocolFormat::GEMINI_CLI,
        openai_response::ResponsesToGeminiCli::new(options.gemini_cli_project.clone()),
        ResponseCapabilities::new()
            .with_stream(openai_response::GeminiCliToResponsesStream)
            .with_non_stream(openai_response::GeminiCliToResponses)
            .with_token_counter(ResponsesTokenCounter),
    )?;
    Ok(())
}
