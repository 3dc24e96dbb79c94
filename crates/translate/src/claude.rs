//! Claude Messages backend.

pub mod openai;

use crate::token::OpenAiTokenCounter;
use protogate_engine::{RegistryBuilder, ResponseCapabilities};
use protogate_types::{ProtocolFormat, Result};

/// Registers `openai -> claude`.
pub(crate) fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register(
        ProtocolFormat::OPENAI,
        ProtocolFormat::CLAUDE,
        openai::OpenAiToClaude,
        ResponseCapabilities::new()
            .with_stream(openai::ClaudeToOpenAiStream)
            .with_non_stream(openai::ClaudeToOpenAiResponse)
            .with_token_counter(OpenAiTokenCounter),
    )?;
    Ok(())
}
