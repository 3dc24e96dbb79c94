//! Codex (private Responses API) backend.

pub mod gemini;

use crate::token::GeminiTokenCounter;
use protogate_engine::{RegistryBuilder, ResponseCapabilities};
use protogate_types::{ProtocolFormat, Result};

/// Registers `gemini -> codex`.
pub(crate) fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register(
        ProtocolFormat::GEMINI,
        ProtocolFormat::CODEX,
        gemini::GeminiToCodex,
        ResponseCapabilities::new()
            .with_stream(gemini::CodexToGeminiStream)
            .with_non_stream(gemini::CodexToGemini)
            .with_token_counter(GeminiTokenCounter),
    )?;
    Ok(())
}
