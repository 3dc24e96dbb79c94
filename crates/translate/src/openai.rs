//! `OpenAI` chat completions backend.

pub mod claude;

use crate::token::ClaudeTokenCounter;
use protogate_engine::{RegistryBuilder, ResponseCapabilities};
use protogate_types::{ProtocolFormat, Result};

/// Registers `claude -> openai`.
pub(crate) fn register(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register(
        ProtocolFormat::CLAUDE,
        ProtocolFormat::OPENAI,
        claude::ClaudeToOpenAi,
        ResponseCapabilities::new()
            .with_stream(claude::OpenAiToClaudeStream)
            .with_non_stream(claude::OpenAiToClaudeResponse)
            .with_token_counter(ClaudeTokenCounter),
    )?;
    Ok(())
}
