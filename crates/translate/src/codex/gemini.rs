//! Gemini `generateContent` clients served by the Codex Responses backend.
//!
//! Codex speaks a private Responses API: system text goes to `instructions`,
//! messages and tool traffic become typed `input` items, and the backend
//! always streams. Gemini carries no call ids, so calls are numbered
//! `call_<n>` in request order and responses are matched to the oldest
//! unanswered call of the same name.

use crate::common::{parse_arguments, str_of};
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};

/// Converts `generateContent` requests into Codex Responses requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiToCodex;

/// Lowercases every `type` value of a Gemini schema (`STRING` -> `string`).
fn lowercase_schema_types(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let out: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let v = match (k.as_str(), v) {
                        ("type", Value::String(t)) => Value::String(t.to_lowercase()),
                        _ => lowercase_schema_types(v),
                    };
                    (k.clone(), v)
                })
                .collect();
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(lowercase_schema_types).collect()),
        other => other.clone(),
    }
}

fn reasoning_effort(config: Option<&Value>) -> &'static str {
    let Some(thinking) = config.and_then(|c| c.get("thinkingConfig")) else {
        return "medium";
    };
    if let Some(level) = thinking.get("thinkingLevel").and_then(Value::as_str) {
        return match level.to_ascii_lowercase().as_str() {
            "low" | "minimal" => "low",
            "high" => "high",
            _ => "medium",
        };
    }
    match thinking.get("thinkingBudget").and_then(Value::as_i64) {
        Some(0) => "minimal",
        Some(1..=1024) => "low",
        Some(b) if b > 8192 => "high",
        _ => "medium",
    }
}

fn function_output(response: &Value) -> String {
    match response.get("result").or_else(|| response.get("output")) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => response.to_string(),
    }
}

#[derive(Default)]
struct InputBuilder {
    items: Vec<Value>,
    next_call: usize,
    /// Unanswered call ids by function name, oldest first.
    open_calls: HashMap<String, VecDeque<String>>,
}

impl InputBuilder {
    fn next_call_id(&mut self) -> String {
        let id = format!("call_{}", self.next_call);
        self.next_call += 1;
        id
    }

    fn flush(&mut self, role: &str, parts: &mut Vec<Value>) {
        if !parts.is_empty() {
            self.items.push(json!({
                "type": "message",
                "role": role,
                "content": std::mem::take(parts),
            }));
        }
    }

    fn push_content(&mut self, content: &Value) {
        let role = if str_of(content, "role") == "model" {
            "assistant"
        } else {
            "user"
        };
        let text_type = if role == "assistant" { "output_text" } else { "input_text" };
        let mut parts = Vec::new();
        for part in content.get("parts").and_then(Value::as_array).into_iter().flatten() {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    continue;
                }
                parts.push(json!({"type": text_type, "text": text}));
            } else if let Some(inline) = part.get("inlineData") {
                let url = format!("data:{};base64,{}", str_of(inline, "mimeType"), str_of(inline, "data"));
                parts.push(json!({"type": "input_image", "image_url": url}));
            } else if let Some(call) = part.get("functionCall") {
                self.flush(role, &mut parts);
                let name = str_of(call, "name").to_string();
                let id = self.next_call_id();
                self.open_calls.entry(name.clone()).or_default().push_back(id.clone());
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                self.items.push(json!({
                    "type": "function_call",
                    "call_id": id,
                    "name": name,
                    "arguments": args.to_string(),
                }));
            } else if let Some(response) = part.get("functionResponse") {
                self.flush(role, &mut parts);
                let name = str_of(response, "name");
                let id = match self.open_calls.get_mut(name).and_then(VecDeque::pop_front) {
                    Some(id) => id,
                    None => self.next_call_id(),
                };
                self.items.push(json!({
                    "type": "function_call_output",
                    "call_id": id,
                    "output": function_output(response.get("response").unwrap_or(&Value::Null)),
                }));
            }
        }
        self.flush(role, &mut parts);
    }
}

impl RequestTranslator for GeminiToCodex {
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
        let contents = req
            .get("contents")
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::request("missing 'contents'"))?;

        let mut input = InputBuilder::default();
        for content in contents {
            input.push_content(content);
        }

        let instructions = req
            .get("systemInstruction")
            .and_then(|s| s.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let tools: Vec<Value> = req
            .get("tools")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|t| t.get("functionDeclarations").and_then(Value::as_array))
            .flatten()
            .map(|decl| {
                let parameters = decl
                    .get("parametersJsonSchema")
                    .or_else(|| decl.get("parameters"))
                    .map_or_else(|| json!({"type": "object", "properties": {}}), lowercase_schema_types);
                let mut tool = json!({
                    "type": "function",
                    "name": str_of(decl, "name"),
                    "parameters": parameters,
                });
                if let Some(description) = decl.get("description") {
                    tool["description"] = description.clone();
                }
                tool
            })
            .collect();

        let tool_choice = match req
            .pointer("/toolConfig/functionCallingConfig/mode")
            .and_then(Value::as_str)
        {
            Some("NONE") => "none",
            Some("ANY") => "required",
            _ => "auto",
        };

        let model = if ctx.model.is_empty() {
            str_of(&req, "model")
        } else {
            ctx.model.as_str()
        };
        let mut out = json!({
            "model": model,
            "instructions": instructions,
            "input": input.items,
            "tool_choice": tool_choice,
            "parallel_tool_calls": true,
            "reasoning": {
                "effort": reasoning_effort(req.get("generationConfig")),
                "summary": "auto",
            },
            "stream": true,
            "store": false,
            "include": ["reasoning.encrypted_content"],
        });
        if !tools.is_empty() {
            out["tools"] = Value::Array(tools);
        }
        Ok(out)
    }
}

fn usage_metadata(usage: Option<&Value>) -> Value {
    let usage = usage.unwrap_or(&Value::Null);
    let prompt = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let candidates = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    let mut meta = json!({
        "promptTokenCount": prompt,
        "candidatesTokenCount": candidates,
        "totalTokenCount": usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(prompt + candidates),
    });
    if let Some(thoughts) = usage
        .pointer("/output_tokens_details/reasoning_tokens")
        .and_then(Value::as_u64)
    {
        meta["thoughtsTokenCount"] = json!(thoughts);
    }
    meta
}

fn finish_reason(response: &Value) -> &'static str {
    match response
        .pointer("/incomplete_details/reason")
        .and_then(Value::as_str)
    {
        Some("max_output_tokens") => "MAX_TOKENS",
        Some("content_filter") => "SAFETY",
        _ => "STOP",
    }
}

fn function_call_part(item: &Value) -> Value {
    json!({
        "functionCall": {
            "name": str_of(item, "name"),
            "args": parse_arguments(str_of(item, "arguments")),
        }
    })
}

/// Converts a Codex `response` object into a `generateContent` response.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexToGemini;

impl ResponseTranslator for CodexToGemini {
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
        let output = res
            .get("output")
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::response("codex response has no 'output'"))?;

        let mut parts = Vec::new();
        for item in output {
            match str_of(item, "type") {
                "reasoning" => {
                    for summary in item.get("summary").and_then(Value::as_array).into_iter().flatten() {
                        parts.push(json!({"text": str_of(summary, "text"), "thought": true}));
                    }
                }
                "message" => {
                    for content in item.get("content").and_then(Value::as_array).into_iter().flatten() {
                        if str_of(content, "type") == "output_text" {
                            parts.push(json!({"text": str_of(content, "text")}));
                        }
                    }
                }
                "function_call" => parts.push(function_call_part(item)),
                _ => {}
            }
        }

        Ok(json!({
            "candidates": [{
                "content": {"role": "model", "parts": parts},
                "finishReason": finish_reason(&res),
                "index": 0,
            }],
            "usageMetadata": usage_metadata(res.get("usage")),
            "modelVersion": ctx.model,
            "responseId": str_of(&res, "id"),
        }))
    }
}

/// Streams Codex Responses events as `streamGenerateContent` chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexToGeminiStream;

impl StreamTranslator for CodexToGeminiStream {
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(CodexGeminiSession {
            model: ctx.model.clone(),
            response_id: String::new(),
            finished: false,
        })
    }
}

struct CodexGeminiSession {
    model: String,
    response_id: String,
    finished: bool,
}

impl CodexGeminiSession {
    fn chunk(&self, parts: Vec<Value>) -> StreamChunk {
        StreamChunk::data(json!({
            "candidates": [{
                "content": {"role": "model", "parts": parts},
                "index": 0,
            }],
            "modelVersion": self.model,
            "responseId": self.response_id,
        }))
    }

    fn final_chunk(&mut self, response: &Value) -> StreamChunk {
        self.finished = true;
        StreamChunk::data(json!({
            "candidates": [{
                "content": {"role": "model", "parts": []},
                "finishReason": finish_reason(response),
                "index": 0,
            }],
            "usageMetadata": usage_metadata(response.get("usage")),
            "modelVersion": self.model,
            "responseId": self.response_id,
        }))
    }
}

impl StreamSession for CodexGeminiSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        let chunk = match str_of(event, "type") {
            "response.created" => {
                self.response_id = event
                    .pointer("/response/id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                None
            }
            "response.output_text.delta" => {
                Some(self.chunk(vec![json!({"text": str_of(event, "delta")})]))
            }
            "response.reasoning_summary_text.delta" => Some(self.chunk(vec![
                json!({"text": str_of(event, "delta"), "thought": true}),
            ])),
            // arguments are complete only once the item is done
            "response.output_item.done" => {
                let item = event.get("item").unwrap_or(&Value::Null);
                (str_of(item, "type") == "function_call")
                    .then(|| self.chunk(vec![function_call_part(item)]))
            }
            "response.completed" | "response.incomplete" => {
                let response = event.get("response").unwrap_or(&Value::Null);
                Some(self.final_chunk(response))
            }
            "response.failed" | "error" => {
                let message = event
                    .pointer("/response/error/message")
                    .or_else(|| event.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("codex response failed");
                return Err(TranslateError::transport(message));
            }
            _ => None,
        };
        Ok(chunk.into_iter().collect())
    }

    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        if self.finished {
            return Ok(Vec::new());
        }
        Ok(vec![self.final_chunk(&Value::Null)])
    }
}
