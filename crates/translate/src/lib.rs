//! Converters between LLM API dialects.
//!
//! Modules are named after the backend they target; each submodule holds
//! one client dialect's request converter plus the response converters for
//! the way back. [`register_all`] installs every pair into a registry
//! builder. All converters are pure functions of their input.

pub mod claude;
pub mod codex;
pub mod envelope;
pub mod gemini;
pub mod gemini_cli;
pub mod kiro;
pub mod openai;
pub mod token;

mod common;
mod responses;
mod writer;

#[cfg(test)]
mod scenarios;

pub use envelope::{ClaudeEnvelope, GeminiEnvelope, ResponsesEnvelope};
pub use token::{
    ClaudeTokenCounter, GeminiCliTokenCounter, GeminiTokenCounter, OpenAiTokenCounter,
    ResponsesTokenCounter, estimate_text,
};

use protogate_engine::RegistryBuilder;
use protogate_types::{ProtocolFormat, Result};

/// Backend account details some request converters embed.
#[derive(Debug, Clone, Default)]
pub struct TranslatorOptions {
    /// Sent as `profileArn` on Kiro requests.
    pub kiro_profile_arn: Option<String>,
    /// Sent as `project` on Gemini CLI requests.
    pub gemini_cli_project: Option<String>,
}

/// Registers every supported pair, the client error schemas, and backend
/// framings.
///
/// # Errors
///
/// Returns a `Registry` error if a pair's response bundle is unusable.
pub fn register_all(builder: &mut RegistryBuilder, options: &TranslatorOptions) -> Result<()> {
    kiro::register(builder, options)?;
    openai::register(builder)?;
    claude::register(builder)?;
    codex::register(builder)?;
    gemini::register(builder)?;
    gemini_cli::register(builder, options)?;

    builder
        .error_envelope(ProtocolFormat::CLAUDE, ClaudeEnvelope)
        .error_envelope(ProtocolFormat::GEMINI, GeminiEnvelope)
        .error_envelope(ProtocolFormat::GEMINI_CLI, GeminiEnvelope)
        .error_envelope(ProtocolFormat::OPENAI_RESPONSE, ResponsesEnvelope);
    Ok(())
}
