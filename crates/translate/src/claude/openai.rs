//! `OpenAI` chat clients served by a Claude Messages backend.

use crate::common::{new_id, parse_arguments, split_data_url, str_of, text_of, unix_now};
use crate::writer::{ChatChunkWriter, chat_usage};
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Value, json};
use std::collections::HashMap;

const DEFAULT_MAX_TOKENS: u64 = 4096;
const THINKING_HARD_CAP: u64 = 32_000;

/// Converts chat completion requests into Messages requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiToClaude;

fn user_content(content: &Value) -> Value {
    let Value::Array(parts) = content else {
        return Value::String(text_of(content));
    };
    let blocks: Vec<Value> = parts
        .iter()
        .filter_map(|part| match str_of(part, "type") {
            "text" => Some(json!({"type": "text", "text": str_of(part, "text")})),
            "image_url" => {
                let url = part.pointer("/image_url/url").and_then(Value::as_str)?;
                Some(match split_data_url(url) {
                    Some((media_type, data)) => json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }),
                    None => json!({"type": "image", "source": {"type": "url", "url": url}}),
                })
            }
            _ => None,
        })
        .collect();
    Value::Array(blocks)
}

/// Builds Claude `messages` from non-system chat messages.
///
/// `tool` messages are buffered and flushed as one `user` message of
/// `tool_result` blocks before the next non-tool message.
fn build_claude_messages(non_system: &[&Value]) -> Vec<Value> {
    let mut claude_messages: Vec<Value> = Vec::new();
    let mut tool_buffer: Vec<Value> = Vec::new();

    for m in non_system {
        let role = str_of(m, "role");
        let content = m.get("content").unwrap_or(&Value::Null);

        if role == "tool" {
            tool_buffer.push(json!({
                "type": "tool_result",
                "tool_use_id": str_of(m, "tool_call_id"),
                "content": text_of(content),
            }));
            continue;
        }

        if !tool_buffer.is_empty() {
            claude_messages.push(json!({
                "role": "user",
                "content": std::mem::take(&mut tool_buffer),
            }));
        }

        if role == "assistant" {
            let mut blocks = Vec::new();
            let text = text_of(content);
            if !text.is_empty() {
                blocks.push(json!({"type": "text", "text": text}));
            }
            for tc in m.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
                let func = tc.get("function").unwrap_or(&Value::Null);
                blocks.push(json!({
                    "type": "tool_use",
                    "id": str_of(tc, "id"),
                    "name": str_of(func, "name"),
                    "input": parse_arguments(str_of(func, "arguments")),
                }));
            }
            claude_messages.push(json!({"role": "assistant", "content": blocks}));
        } else {
            claude_messages.push(json!({"role": "user", "content": user_content(content)}));
        }
    }

    if !tool_buffer.is_empty() {
        claude_messages.push(json!({"role": "user", "content": tool_buffer}));
    }
    claude_messages
}

/// Splits a `<model>-thinking-<N>` name into the model and its budget.
fn parse_thinking_model(model: &str) -> (&str, Option<u64>) {
    if let Some(idx) = model.rfind("-thinking-")
        && let Ok(budget) = model[idx + "-thinking-".len()..].parse::<u64>()
    {
        return (&model[..idx], Some(budget));
    }
    (model, None)
}

fn effort_budget(effort: &str) -> Option<u64> {
    match effort {
        "low" => Some(1024),
        "medium" => Some(8192),
        "high" => Some(24_576),
        _ => None,
    }
}

/// Enables extended thinking, raising `max_tokens` above the budget if needed.
fn inject_thinking(req: &mut Value, budget_tokens: u64) {
    let effective = budget_tokens.min(THINKING_HARD_CAP);
    let headroom = (effective / 10).max(1024);
    let current = req.get("max_tokens").and_then(Value::as_u64).unwrap_or(0);
    if current <= effective {
        req["max_tokens"] = json!(effective + headroom);
    }
    req["thinking"] = json!({"type": "enabled", "budget_tokens": effective});
}

impl RequestTranslator for OpenAiToClaude {
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
        let messages = req
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::request("missing 'messages'"))?;

        let system_parts: Vec<String> = messages
            .iter()
            .filter(|m| matches!(str_of(m, "role"), "system" | "developer"))
            .map(|m| text_of(m.get("content").unwrap_or(&Value::Null)))
            .filter(|s| !s.is_empty())
            .collect();
        let non_system: Vec<&Value> = messages
            .iter()
            .filter(|m| !matches!(str_of(m, "role"), "system" | "developer"))
            .collect();

        let requested = if ctx.model.is_empty() {
            str_of(&req, "model")
        } else {
            ctx.model.as_str()
        };
        let (model, suffix_budget) = parse_thinking_model(requested);
        let max_tokens = req
            .get("max_completion_tokens")
            .or_else(|| req.get("max_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut out = json!({
            "model": model,
            "messages": build_claude_messages(&non_system),
            "max_tokens": max_tokens,
            "stream": ctx.stream,
        });
        if !system_parts.is_empty() {
            out["system"] = Value::String(system_parts.join("\n"));
        }
        for key in ["temperature", "top_p"] {
            if let Some(v) = req.get(key) {
                out[key] = v.clone();
            }
        }
        match req.get("stop") {
            Some(Value::String(s)) => out["stop_sequences"] = json!([s]),
            Some(stop @ Value::Array(_)) => out["stop_sequences"] = stop.clone(),
            _ => {}
        }

        if let Some(tools) = req.get("tools").and_then(Value::as_array) {
            let claude_tools: Vec<Value> = tools
                .iter()
                .filter_map(|t| {
                    let func = t.get("function")?;
                    let mut tool = json!({
                        "name": func.get("name")?.clone(),
                        "input_schema": func.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
                    });
                    if let Some(description) = func.get("description").filter(|d| !d.is_null()) {
                        tool["description"] = description.clone();
                    }
                    Some(tool)
                })
                .collect();
            if !claude_tools.is_empty() {
                out["tools"] = Value::Array(claude_tools);
            }
        }

        if let Some(tc) = req.get("tool_choice") {
            if let Some(s) = tc.as_str() {
                match s {
                    "auto" => out["tool_choice"] = json!({"type": "auto"}),
                    "required" => out["tool_choice"] = json!({"type": "any"}),
                    "none" => out["tool_choice"] = json!({"type": "none"}),
                    _ => {}
                }
            } else if let Some(name) = tc.pointer("/function/name").and_then(Value::as_str) {
                out["tool_choice"] = json!({"type": "tool", "name": name});
            }
        }

        let budget = suffix_budget.or_else(|| {
            req.get("reasoning_effort")
                .and_then(Value::as_str)
                .and_then(effort_budget)
        });
        if let Some(budget) = budget {
            inject_thinking(&mut out, budget);
        }
        Ok(out)
    }
}

/// Maps a Claude `stop_reason` to a chat `finish_reason`.
fn map_finish_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    }
}

/// Converts a Messages response into a `chat.completion`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeToOpenAiResponse;

impl ResponseTranslator for ClaudeToOpenAiResponse {
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
        let blocks = res
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::response("message has no 'content'"))?;

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match str_of(block, "type") {
                "text" => text.push_str(str_of(block, "text")),
                "thinking" => reasoning.push_str(str_of(block, "thinking")),
                "tool_use" => tool_calls.push(json!({
                    "id": str_of(block, "id"),
                    "type": "function",
                    "function": {
                        "name": str_of(block, "name"),
                        "arguments": block.get("input").map_or_else(|| "{}".to_string(), Value::to_string),
                    },
                })),
                _ => {}
            }
        }

        let mut message = json!({"role": "assistant"});
        message["content"] = if text.is_empty() && !tool_calls.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        };
        if !reasoning.is_empty() {
            message["reasoning_content"] = Value::String(reasoning);
        }
        if !tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(tool_calls);
        }

        let prompt_tokens = res
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let completion_tokens = res
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let id = res
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(|| new_id("chatcmpl-"), |s| format!("chatcmpl-{s}"));

        Ok(json!({
            "id": id,
            "object": "chat.completion",
            "created": unix_now(),
            "model": ctx.model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": map_finish_reason(res.get("stop_reason").and_then(Value::as_str)),
            }],
            "usage": chat_usage(prompt_tokens, completion_tokens),
        }))
    }
}

/// Streams Messages events as `chat.completion.chunk`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeToOpenAiStream;

impl StreamTranslator for ClaudeToOpenAiStream {
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(MessageToChatSession {
            writer: ChatChunkWriter::new(&ctx.model),
            tool_calls: HashMap::new(),
            stop_reason: None,
            prompt_tokens: ctx.estimated_prompt_tokens.unwrap_or(0),
            completion_tokens: 0,
        })
    }
}

struct MessageToChatSession {
    writer: ChatChunkWriter,
    /// Content block index to chat `tool_calls[].index`.
    tool_calls: HashMap<u64, usize>,
    stop_reason: Option<String>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl StreamSession for MessageToChatSession {
    fn translate_event(&mut self, ev: &Value) -> Result<Vec<StreamChunk>> {
        let block_index = ev.get("index").and_then(Value::as_u64).unwrap_or(0);
        let chunk = match str_of(ev, "type") {
            "message_start" => {
                if let Some(id) = ev.pointer("/message/id").and_then(Value::as_str) {
                    self.writer.set_id(&format!("chatcmpl-{id}"));
                }
                if let Some(input) = ev.pointer("/message/usage/input_tokens").and_then(Value::as_u64) {
                    self.prompt_tokens = input;
                }
                None
            }
            "content_block_start" => {
                let block = ev.get("content_block").unwrap_or(&Value::Null);
                if str_of(block, "type") == "tool_use" {
                    let index = self.tool_calls.len();
                    self.tool_calls.insert(block_index, index);
                    Some(self.writer.tool_start(index, str_of(block, "id"), str_of(block, "name")))
                } else {
                    None
                }
            }
            "content_block_delta" => {
                let delta = ev.get("delta").unwrap_or(&Value::Null);
                match str_of(delta, "type") {
                    "text_delta" => Some(self.writer.text(str_of(delta, "text"))),
                    "thinking_delta" => Some(self.writer.reasoning(str_of(delta, "thinking"))),
                    "input_json_delta" => self.tool_calls.get(&block_index).copied().map(|index| {
                        self.writer
                            .tool_arguments(index, str_of(delta, "partial_json"))
                    }),
                    _ => None,
                }
            }
            "message_delta" => {
                if let Some(reason) = ev.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(output) = ev.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    self.completion_tokens = output;
                }
                None
            }
            "error" => {
                let message = ev
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("backend stream error");
                return Err(TranslateError::transport(message));
            }
            // ping, content_block_stop, message_stop
            _ => None,
        };
        Ok(chunk.into_iter().collect())
    }

    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        let reason = map_finish_reason(self.stop_reason.as_deref());
        Ok(vec![self.writer.finish(
            reason,
            self.prompt_tokens,
            self.completion_tokens,
        )])
    }
}
