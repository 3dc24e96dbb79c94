//! `OpenAI` Responses clients served by the Gemini backend.

use crate::common::{parse_arguments, split_data_url, str_of, text_of};
use crate::responses::{ResponsesWriter, Usage};
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Converts Responses requests into `generateContent` requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsesToGemini;

fn effort_budget(effort: &str) -> Option<i64> {
    match effort {
        "minimal" => Some(0),
        "low" => Some(1024),
        "medium" => Some(8192),
        "high" => Some(24_576),
        _ => None,
    }
}

#[derive(Default)]
struct ContentsBuilder {
    contents: Vec<Value>,
    system: Vec<String>,
    /// `call_id` to function name, for `function_call_output` items.
    call_names: HashMap<String, String>,
}

impl ContentsBuilder {
    fn push_parts(&mut self, role: &str, parts: Vec<Value>) {
        if parts.is_empty() {
            return;
        }
        if let Some(last) = self.contents.last_mut()
            && last["role"] == role
            && let Some(existing) = last["parts"].as_array_mut()
        {
            existing.extend(parts);
            return;
        }
        self.contents.push(json!({"role": role, "parts": parts}));
    }

    fn content_parts(content: &Value) -> Vec<Value> {
        let Value::Array(items) = content else {
            let text = text_of(content);
            return if text.is_empty() { Vec::new() } else { vec![json!({"text": text})] };
        };
        items
            .iter()
            .filter_map(|part| match str_of(part, "type") {
                "input_text" | "output_text" | "text" => Some(json!({"text": str_of(part, "text")})),
                "input_image" => {
                    let (mime_type, data) = split_data_url(str_of(part, "image_url"))?;
                    Some(json!({"inlineData": {"mimeType": mime_type, "data": data}}))
                }
                _ => None,
            })
            .collect()
    }

    fn push_item(&mut self, item: &Value) {
        match str_of(item, "type") {
            "function_call" => {
                let name = str_of(item, "name");
                self.call_names
                    .insert(str_of(item, "call_id").to_string(), name.to_string());
                let args = parse_arguments(str_of(item, "arguments"));
                self.push_parts("model", vec![json!({"functionCall": {"name": name, "args": args}})]);
            }
            "function_call_output" => {
                let name = self
                    .call_names
                    .get(str_of(item, "call_id"))
                    .cloned()
                    .unwrap_or_default();
                let output = item.get("output").cloned().unwrap_or(Value::Null);
                self.push_parts(
                    "user",
                    vec![json!({"functionResponse": {"name": name, "response": {"result": output}}})],
                );
            }
            "reasoning" => {}
            // "message" or a bare {role, content}
            _ => {
                let content = item.get("content").unwrap_or(&Value::Null);
                match str_of(item, "role") {
                    "system" | "developer" => {
                        let parts = Self::content_parts(content);
                        self.system.extend(
                            parts
                                .iter()
                                .filter_map(|p| p.get("text").and_then(Value::as_str))
                                .map(str::to_owned),
                        );
                    }
                    "assistant" => self.push_parts("model", Self::content_parts(content)),
                    _ => self.push_parts("user", Self::content_parts(content)),
                }
            }
        }
    }
}

/// Builds the `generateContent` body for a Responses request.
pub(crate) fn responses_to_gemini(req: &Value) -> Result<Value> {
    let input = req
        .get("input")
        .ok_or_else(|| TranslateError::request("missing 'input'"))?;

    let mut builder = ContentsBuilder::default();
    if let Some(instructions) = req.get("instructions").and_then(Value::as_str)
        && !instructions.is_empty()
    {
        builder.system.push(instructions.to_string());
    }
    match input {
        Value::String(text) => builder.push_parts("user", vec![json!({"text": text})]),
        Value::Array(items) => items.iter().for_each(|item| builder.push_item(item)),
        _ => return Err(TranslateError::request("'input' must be a string or an array")),
    }
    if builder.contents.is_empty() {
        return Err(TranslateError::request("'input' has no content"));
    }

    let mut out = json!({ "contents": builder.contents });
    if !builder.system.is_empty() {
        out["systemInstruction"] = json!({
            "role": "user",
            "parts": [{"text": builder.system.join("\n")}],
        });
    }

    let declarations: Vec<Value> = req
        .get("tools")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|t| str_of(t, "type") == "function")
        .map(|t| {
            let mut decl = json!({
                "name": str_of(t, "name"),
                "parametersJsonSchema": t.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            });
            if let Some(description) = t.get("description") {
                decl["description"] = description.clone();
            }
            decl
        })
        .collect();
    if !declarations.is_empty() {
        out["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    let calling = match req.get("tool_choice") {
        Some(Value::String(s)) => match s.as_str() {
            "none" => Some(json!({"mode": "NONE"})),
            "required" => Some(json!({"mode": "ANY"})),
            "auto" => Some(json!({"mode": "AUTO"})),
            _ => None,
        },
        Some(choice) if str_of(choice, "type") == "function" => {
            Some(json!({"mode": "ANY", "allowedFunctionNames": [str_of(choice, "name")]}))
        }
        _ => None,
    };
    if let Some(calling) = calling {
        out["toolConfig"] = json!({ "functionCallingConfig": calling });
    }

    let mut config = serde_json::Map::new();
    if let Some(max) = req.get("max_output_tokens") {
        config.insert("maxOutputTokens".into(), max.clone());
    }
    if let Some(t) = req.get("temperature") {
        config.insert("temperature".into(), t.clone());
    }
    if let Some(p) = req.get("top_p") {
        config.insert("topP".into(), p.clone());
    }
    if let Some(budget) = req
        .pointer("/reasoning/effort")
        .and_then(Value::as_str)
        .and_then(effort_budget)
    {
        config.insert(
            "thinkingConfig".into(),
            json!({"thinkingBudget": budget, "includeThoughts": budget > 0}),
        );
    }
    if !config.is_empty() {
        out["generationConfig"] = Value::Object(config);
    }
    Ok(out)
}

impl RequestTranslator for ResponsesToGemini {
    fn translate_request(&self, _ctx: &RequestContext, req: Value) -> Result<Value> {
        responses_to_gemini(&req)
    }
}

/// Feeds one Gemini chunk (or complete response) into the writer.
pub(crate) fn apply_gemini_chunk(
    writer: &mut ResponsesWriter,
    chunk: &Value,
    out: &mut Vec<StreamChunk>,
) -> Result<()> {
    if let Some(error) = chunk.get("error") {
        let message = str_of(error, "message");
        let status = error.get("code").and_then(Value::as_u64).and_then(|c| u16::try_from(c).ok());
        return Err(match status {
            Some(code) => TranslateError::upstream(code, message),
            None => TranslateError::transport(message),
        });
    }
    let candidate = chunk.pointer("/candidates/0").unwrap_or(&Value::Null);
    for part in candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(call) = part.get("functionCall") {
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            writer.function_call(
                call.get("id").and_then(Value::as_str),
                str_of(call, "name"),
                &args.to_string(),
                out,
            );
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            if text.is_empty() {
                continue;
            }
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                writer.reasoning(text, out);
            } else {
                writer.text(text, out);
            }
        }
    }
    match candidate.get("finishReason").and_then(Value::as_str) {
        Some("MAX_TOKENS") => writer.set_incomplete("max_output_tokens"),
        Some("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT") => {
            writer.set_incomplete("content_filter");
        }
        _ => {}
    }
    if let Some(meta) = chunk.get("usageMetadata") {
        let count = |key: &str| meta.get(key).and_then(Value::as_u64).unwrap_or(0);
        let reasoning = count("thoughtsTokenCount");
        writer.set_usage(Usage {
            input: count("promptTokenCount"),
            output: count("candidatesTokenCount") + reasoning,
            reasoning,
        });
    }
    Ok(())
}

/// Converts a `generateContent` response into a Responses object.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiToResponses;

impl ResponseTranslator for GeminiToResponses {
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
        if res.get("candidates").is_none() && res.get("error").is_none() {
            return Err(TranslateError::response("gemini response has no 'candidates'"));
        }
        let mut writer = ResponsesWriter::new(&ctx.model, ctx.estimated_prompt_tokens.unwrap_or(0));
        let mut discard = Vec::new();
        apply_gemini_chunk(&mut writer, &res, &mut discard)?;
        Ok(writer.finish(&mut discard))
    }
}

/// Streams Gemini chunks as Responses events.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiToResponsesStream;

impl StreamTranslator for GeminiToResponsesStream {
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(GeminiResponsesSession {
            writer: ResponsesWriter::new(&ctx.model, ctx.estimated_prompt_tokens.unwrap_or(0)),
        })
    }
}

pub(crate) struct GeminiResponsesSession {
    pub(crate) writer: ResponsesWriter,
}

impl StreamSession for GeminiResponsesSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();
        apply_gemini_chunk(&mut self.writer, event, &mut out)?;
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();
        self.writer.finish(&mut out);
        Ok(out)
    }
}
