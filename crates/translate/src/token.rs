//! Prompt token estimation with the `cl100k_base` tokenizer.
//!
//! Estimates are deterministic for a given request. When the tokenizer
//! cannot be loaded, a four-characters-per-token heuristic is used instead.

use protogate_types::{Result, TokenCounter, TranslateError};
use serde_json::{Value, json};
use std::sync::LazyLock;
use tiktoken_rs::CoreBPE;

static BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "tokenizer unavailable, using character heuristic");
        None
    }
});

/// Per-message framing overhead added on top of the text itself.
const MESSAGE_OVERHEAD: u64 = 3;

/// Keys whose values are binary payloads or identifiers, not prompt text.
const SKIP_KEYS: &[&str] = &[
    "data",
    "bytes",
    "url",
    "media_type",
    "mimeType",
    "signature",
    "thoughtSignature",
    "cache_control",
    "id",
    "tool_use_id",
    "tool_call_id",
    "type",
    "role",
];

/// Estimated token count of a text.
#[must_use]
pub fn estimate_text(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
        None => (text.chars().count() as u64).div_ceil(4),
    }
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => {
            for (k, v) in map {
                if !SKIP_KEYS.contains(&k.as_str()) {
                    collect_text(v, out);
                }
            }
        }
        _ => {}
    }
}

/// Estimates a conversation: text of every message, plus tool schemas.
fn estimate_conversation(system: Option<&Value>, messages: &[Value], tools: Option<&Value>) -> u64 {
    let mut text = String::new();
    if let Some(system) = system {
        collect_text(system, &mut text);
    }
    for message in messages {
        collect_text(message, &mut text);
    }
    let mut total = estimate_text(&text) + MESSAGE_OVERHEAD * messages.len() as u64;
    if let Some(tools) = tools.filter(|t| !t.is_null()) {
        total += estimate_text(&tools.to_string());
    }
    total
}

fn messages_of<'a>(request: &'a Value, key: &str) -> Result<&'a [Value]> {
    request
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| TranslateError::token_count(format!("missing '{key}'")))
}

/// Counts `OpenAI` chat requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiTokenCounter;

impl TokenCounter for OpenAiTokenCounter {
    fn count_tokens(&self, request: &Value) -> Result<u64> {
        let messages = messages_of(request, "messages")?;
        Ok(estimate_conversation(None, messages, request.get("tools")))
    }

    fn count_response(&self, tokens: u64) -> Value {
        json!({ "object": "token_count", "prompt_tokens": tokens })
    }
}

/// Counts Claude Messages requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeTokenCounter;

impl TokenCounter for ClaudeTokenCounter {
    fn count_tokens(&self, request: &Value) -> Result<u64> {
        let messages = messages_of(request, "messages")?;
        Ok(estimate_conversation(
            request.get("system"),
            messages,
            request.get("tools"),
        ))
    }

    fn count_response(&self, tokens: u64) -> Value {
        json!({ "input_tokens": tokens })
    }
}

/// Counts Gemini `generateContent` requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiTokenCounter;

impl TokenCounter for GeminiTokenCounter {
    fn count_tokens(&self, request: &Value) -> Result<u64> {
        let contents = messages_of(request, "contents")?;
        Ok(estimate_conversation(
            request.get("systemInstruction"),
            contents,
            request.get("tools"),
        ))
    }

    fn count_response(&self, tokens: u64) -> Value {
        json!({
            "totalTokens": tokens,
            "promptTokensDetails": [{ "modality": "TEXT", "tokenCount": tokens }],
        })
    }
}

/// Counts Gemini CLI requests (the Gemini payload inside `request`).
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiCliTokenCounter;

impl TokenCounter for GeminiCliTokenCounter {
    fn count_tokens(&self, request: &Value) -> Result<u64> {
        let inner = request
            .get("request")
            .ok_or_else(|| TranslateError::token_count("missing 'request'"))?;
        GeminiTokenCounter.count_tokens(inner)
    }

    fn count_response(&self, tokens: u64) -> Value {
        json!({ "totalTokens": tokens })
    }
}

/// Counts Responses requests: instructions, input and tool schemas.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponsesTokenCounter;

impl TokenCounter for ResponsesTokenCounter {
    fn count_tokens(&self, request: &Value) -> Result<u64> {
        let mut text = String::new();
        if let Some(instructions) = request.get("instructions").and_then(Value::as_str) {
            text.push_str(instructions);
        }
        match request.get("input") {
            Some(Value::String(s)) => text.push_str(s),
            Some(input) => collect_text(input, &mut text),
            None => return Err(TranslateError::token_count("missing 'input'")),
        }
        let mut total = estimate_text(&text);
        if let Some(tools) = request.get("tools").filter(|t| !t.is_null()) {
            total += estimate_text(&tools.to_string());
        }
        Ok(total)
    }

    fn count_response(&self, tokens: u64) -> Value {
        json!({ "object": "response.input_tokens", "input_tokens": tokens })
    }
}
