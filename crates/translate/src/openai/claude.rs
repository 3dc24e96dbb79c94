//! Claude Messages clients served by an `OpenAI` chat completions backend.

use crate::common::{new_id, parse_arguments, str_of, text_of};
use crate::writer::MessageEventWriter;
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Converts Messages requests into chat completion requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeToOpenAi;

fn image_part(block: &Value) -> Option<Value> {
    let source = block.get("source")?;
    let url = match str_of(source, "type") {
        "base64" => format!(
            "data:{};base64,{}",
            str_of(source, "media_type"),
            str_of(source, "data")
        ),
        "url" => str_of(source, "url").to_string(),
        _ => return None,
    };
    Some(json!({"type": "image_url", "image_url": {"url": url}}))
}

/// Appends the chat messages for one Claude user turn.
///
/// Tool results become `tool` messages ahead of the remaining content.
fn push_user(content: &Value, out: &mut Vec<Value>) {
    let Value::Array(blocks) = content else {
        out.push(json!({"role": "user", "content": text_of(content)}));
        return;
    };
    let mut parts = Vec::new();
    for block in blocks {
        match str_of(block, "type") {
            "tool_result" => out.push(json!({
                "role": "tool",
                "tool_call_id": str_of(block, "tool_use_id"),
                "content": block.get("content").map(text_of).unwrap_or_default(),
            })),
            "text" => parts.push(json!({"type": "text", "text": str_of(block, "text")})),
            "image" => parts.extend(image_part(block)),
            _ => {}
        }
    }
    if parts.is_empty() {
        return;
    }
    let only_text = parts.iter().all(|p| p["type"] == "text");
    let content = if only_text {
        Value::String(text_of(&Value::Array(parts)))
    } else {
        Value::Array(parts)
    };
    out.push(json!({"role": "user", "content": content}));
}

fn push_assistant(content: &Value, out: &mut Vec<Value>) {
    let Value::Array(blocks) = content else {
        out.push(json!({"role": "assistant", "content": text_of(content)}));
        return;
    };
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match str_of(block, "type") {
            "text" => texts.push(str_of(block, "text")),
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
    message["content"] = if texts.is_empty() && !tool_calls.is_empty() {
        Value::Null
    } else {
        Value::String(texts.join("\n"))
    };
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    out.push(message);
}

fn tool_choice(choice: &Value) -> Option<Value> {
    match str_of(choice, "type") {
        "auto" => Some(json!("auto")),
        "any" => Some(json!("required")),
        "none" => Some(json!("none")),
        "tool" => Some(json!({"type": "function", "function": {"name": str_of(choice, "name")}})),
        _ => None,
    }
}

impl RequestTranslator for ClaudeToOpenAi {
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
        let messages = req
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::request("missing 'messages'"))?;

        let mut out_messages = Vec::new();
        if let Some(system) = req.get("system") {
            let text = text_of(system);
            if !text.is_empty() {
                out_messages.push(json!({"role": "system", "content": text}));
            }
        }
        for message in messages {
            let content = message.get("content").unwrap_or(&Value::Null);
            if str_of(message, "role") == "assistant" {
                push_assistant(content, &mut out_messages);
            } else {
                push_user(content, &mut out_messages);
            }
        }

        let model = if ctx.model.is_empty() {
            str_of(&req, "model").to_string()
        } else {
            ctx.model.clone()
        };
        let mut out = json!({
            "model": model,
            "messages": out_messages,
            "stream": ctx.stream,
        });
        if ctx.stream {
            out["stream_options"] = json!({"include_usage": true});
        }
        if let Some(max_tokens) = req.get("max_tokens") {
            out["max_tokens"] = max_tokens.clone();
        }
        for key in ["temperature", "top_p"] {
            if let Some(v) = req.get(key) {
                out[key] = v.clone();
            }
        }
        if let Some(stop) = req.get("stop_sequences") {
            out["stop"] = stop.clone();
        }
        if let Some(tools) = req.get("tools").and_then(Value::as_array) {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    let mut function = json!({
                        "name": str_of(t, "name"),
                        "parameters": t.get("input_schema").cloned().unwrap_or_else(|| json!({"type": "object"})),
                    });
                    if let Some(description) = t.get("description") {
                        function["description"] = description.clone();
                    }
                    json!({"type": "function", "function": function})
                })
                .collect();
            if !tools.is_empty() {
                out["tools"] = Value::Array(tools);
            }
        }
        if let Some(choice) = req.get("tool_choice").and_then(tool_choice) {
            out["tool_choice"] = choice;
        }
        Ok(out)
    }
}

fn stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "tool_calls" | "function_call" => "tool_use",
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

/// Converts a `chat.completion` into a Messages response.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiToClaudeResponse;

impl ResponseTranslator for OpenAiToClaudeResponse {
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
        let choice = res
            .pointer("/choices/0")
            .ok_or_else(|| TranslateError::response("chat completion has no choices"))?;
        let message = choice.get("message").unwrap_or(&Value::Null);

        let mut content = Vec::new();
        let reasoning = str_of(message, "reasoning_content");
        if !reasoning.is_empty() {
            content.push(json!({"type": "thinking", "thinking": reasoning, "signature": ""}));
        }
        let text = str_of(message, "content");
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
        for call in message.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
            let function = call.get("function").unwrap_or(&Value::Null);
            content.push(json!({
                "type": "tool_use",
                "id": str_of(call, "id"),
                "name": str_of(function, "name"),
                "input": parse_arguments(str_of(function, "arguments")),
            }));
        }

        let input_tokens = res
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .or(ctx.estimated_prompt_tokens)
            .unwrap_or(0);
        let output_tokens = res
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(json!({
            "id": new_id("msg_"),
            "type": "message",
            "role": "assistant",
            "model": ctx.model,
            "content": content,
            "stop_reason": stop_reason(str_of(choice, "finish_reason")),
            "stop_sequence": null,
            "usage": { "input_tokens": input_tokens, "output_tokens": output_tokens },
        }))
    }
}

/// Streams chat completion chunks as Messages stream events.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiToClaudeStream;

impl StreamTranslator for OpenAiToClaudeStream {
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(ChatToMessageSession {
            writer: MessageEventWriter::new(&ctx.model, ctx.estimated_prompt_tokens.unwrap_or(0)),
            tools: HashMap::new(),
            finish_reason: None,
            output_tokens: 0,
        })
    }
}

struct ChatToMessageSession {
    writer: MessageEventWriter,
    /// Chat `tool_calls[].index` to content block index.
    tools: HashMap<u64, usize>,
    finish_reason: Option<String>,
    output_tokens: u64,
}

impl ChatToMessageSession {
    fn tool_call(&mut self, call: &Value, out: &mut Vec<StreamChunk>) {
        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let function = call.get("function").unwrap_or(&Value::Null);
        let block = match self.tools.get(&index) {
            Some(&block) => block,
            None => {
                let id = match str_of(call, "id") {
                    "" => new_id("call_"),
                    id => id.to_string(),
                };
                let block = self.writer.tool_start(&id, str_of(function, "name"), out);
                self.tools.insert(index, block);
                block
            }
        };
        let fragment = str_of(function, "arguments");
        if !fragment.is_empty() {
            self.writer.tool_input(block, fragment, out);
        }
    }
}

impl StreamSession for ChatToMessageSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();
        self.writer.start(&mut out);
        if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
            if let Some(prompt) = usage.get("prompt_tokens").and_then(Value::as_u64) {
                self.writer.set_input_tokens(prompt);
            }
            if let Some(completion) = usage.get("completion_tokens").and_then(Value::as_u64) {
                self.output_tokens = completion;
            }
        }
        let Some(choice) = event.pointer("/choices/0") else {
            return Ok(out);
        };
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        let reasoning = str_of(delta, "reasoning_content");
        if !reasoning.is_empty() {
            self.writer.thinking(reasoning, &mut out);
        }
        let text = str_of(delta, "content");
        if !text.is_empty() {
            self.writer.text(text, &mut out);
        }
        for call in delta.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
            self.tool_call(call, &mut out);
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();
        let reason = stop_reason(self.finish_reason.as_deref().unwrap_or("stop"));
        self.writer.finish(reason, self.output_tokens, &mut out);
        Ok(out)
    }
}
