//! Public Gemini (`generativelanguage`) backend.

pub mod gemini_cli;
pub mod openai_response;

use crate::token::{GeminiCliTokenCounter, ResponsesTokenCounter};
use protogate_engine::{RegistryBuilder, ResponseCapabilities};
use protogate_types::{ProtocolFormat, Result};

/// Registers `gemini-cli -> gemini` and `openai-response -> gemini`.
pub(crate) fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register(
        ProtocolFormat::GEMINI_CLI,
        ProtocolFormat::GEMINI,
        gemini_cli::GeminiCliToGemini,
        ResponseCapabilities::new()
            .with_stream(gemini_cli::GeminiToGeminiCliStream)
            .with_non_stream(gemini_cli::GeminiToGeminiCli)
            .with_token_counter(GeminiCliTokenCounter),
    )?;
    builder.register(
        ProtocolFormat::OPENAI_RESPONSE,
        ProtocolFormat::GEMINI,
        openai_response::ResponsesToGemini,
        ResponseCapabilities::new()
            .with_stream(openai_response::GeminiToResponsesStream)
            .with_non_stream(openai_response::GeminiToResponses)
            .with_token_counter(ResponsesTokenCounter),
    )?;
    Ok(())
}
