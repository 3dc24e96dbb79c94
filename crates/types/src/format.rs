//! Protocol format identifiers and conversion keys.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Opaque name of an LLM API dialect (e.g. `"openai"`, `"claude"`).
///
/// Formats are plain identifiers: two formats are equal when their names are
/// equal, and new formats can be introduced without touching this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolFormat(Cow<'static, str>);

impl ProtocolFormat {
    /// `OpenAI` Chat Completions.
    pub const OPENAI: Self = Self::from_static("openai");
    /// `OpenAI` Responses API.
    pub const OPENAI_RESPONSE: Self = Self::from_static("openai-response");
    /// Anthropic Messages API.
    pub const CLAUDE: Self = Self::from_static("claude");
    /// Google Gemini `generateContent`.
    pub const GEMINI: Self = Self::from_static("gemini");
    /// Gemini Code Assist (`v1internal`) envelope around Gemini payloads.
    pub const GEMINI_CLI: Self = Self::from_static("gemini-cli");
    /// AWS `CodeWhisperer` conversation API used by Kiro.
    pub const KIRO: Self = Self::from_static("kiro");
    /// `ChatGPT` Codex Responses backend.
    pub const CODEX: Self = Self::from_static("codex");

    #[must_use]
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProtocolFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for ProtocolFormat {
    fn from(s: &str) -> Self {
        Self::new(s.trim())
    }
}

impl From<String> for ProtocolFormat {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A `(source, target)` format pair identifying one conversion direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversionKey {
    pub source: ProtocolFormat,
    pub target: ProtocolFormat,
}

impl ConversionKey {
    #[must_use]
    pub fn new(source: ProtocolFormat, target: ProtocolFormat) -> Self {
        Self { source, target }
    }

    /// The key for the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

impl fmt::Display for ConversionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}
