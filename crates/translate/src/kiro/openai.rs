//! `OpenAI` chat clients served by the Kiro backend.

use super::{Accumulator, AssistantTurn, Conversation, KiroImage, KiroTool, KiroToolResult, KiroToolUse, Step, UserTurn};
use crate::common::{new_id, parse_arguments, split_data_url, str_of, text_of, unix_now};
use crate::writer::{ChatChunkWriter, chat_usage};
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Value, json};

/// Converts chat completion requests into `generateAssistantResponse` bodies.
#[derive(Debug, Clone, Default)]
pub struct OpenAiToKiro {
    profile_arn: Option<String>,
}

impl OpenAiToKiro {
    #[must_use]
    pub fn new(profile_arn: Option<String>) -> Self {
        Self { profile_arn }
    }
}

fn user_turn(content: &Value) -> UserTurn {
    let mut turn = UserTurn::default();
    match content {
        Value::Array(parts) => {
            let mut texts = Vec::new();
            for part in parts {
                match str_of(part, "type") {
                    "text" => texts.push(str_of(part, "text")),
                    "image_url" => {
                        let url = part
                            .pointer("/image_url/url")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if let Some((media_type, data)) = split_data_url(url) {
                            turn.images.push(KiroImage::new(media_type, data));
                        } else {
                            tracing::debug!("dropping remote image url, kiro accepts inline images only");
                        }
                    }
                    _ => {}
                }
            }
            turn.text = texts.join("\n");
        }
        other => turn.text = text_of(other),
    }
    turn
}

fn assistant_turn(message: &Value) -> AssistantTurn {
    let tool_uses = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|call| KiroToolUse {
                    tool_use_id: str_of(call, "id").to_string(),
                    name: call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    input: parse_arguments(
                        call.pointer("/function/arguments")
                            .and_then(Value::as_str)
                            .unwrap_or(""),
                    ),
                })
                .collect()
        })
        .unwrap_or_default();
    AssistantTurn {
        text: message.get("content").map(text_of).unwrap_or_default(),
        tool_uses,
    }
}

impl RequestTranslator for OpenAiToKiro {
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
        let messages = req
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::request("missing 'messages'"))?;

        let mut conv = Conversation::default();
        let mut pending_results = Vec::new();
        for message in messages {
            let content = message.get("content").unwrap_or(&Value::Null);
            match str_of(message, "role") {
                "system" | "developer" => conv.add_system(&text_of(content)),
                "tool" => pending_results.push(KiroToolResult::new(
                    str_of(message, "tool_call_id"),
                    text_of(content),
                    false,
                )),
                "assistant" => {
                    if !pending_results.is_empty() {
                        conv.push_user(UserTurn {
                            tool_results: std::mem::take(&mut pending_results),
                            ..UserTurn::default()
                        });
                    }
                    conv.push_assistant(assistant_turn(message));
                }
                _ => {
                    let mut turn = user_turn(content);
                    turn.tool_results = std::mem::take(&mut pending_results);
                    conv.push_user(turn);
                }
            }
        }
        if !pending_results.is_empty() {
            conv.push_user(UserTurn {
                tool_results: pending_results,
                ..UserTurn::default()
            });
        }

        for tool in req.get("tools").and_then(Value::as_array).into_iter().flatten() {
            let Some(function) = tool.get("function") else {
                continue;
            };
            conv.add_tool(KiroTool::new(
                str_of(function, "name"),
                function.get("description").and_then(Value::as_str),
                function.get("parameters"),
            ));
        }

        let model = if ctx.model.is_empty() {
            str_of(&req, "model")
        } else {
            ctx.model.as_str()
        };
        conv.into_request(model, self.profile_arn.as_deref())
    }
}

fn finish_reason(acc: &Accumulator) -> &'static str {
    if acc.has_tools() { "tool_calls" } else { "stop" }
}

/// Folds a complete Kiro event list into a `chat.completion`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KiroToOpenAi;

impl ResponseTranslator for KiroToOpenAi {
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
        let acc = Accumulator::from_body(&res)?;
        let text = acc.text();
        let mut message = json!({ "role": "assistant" });
        message["content"] = if text.is_empty() && acc.has_tools() {
            Value::Null
        } else {
            Value::String(text)
        };
        if acc.has_tools() {
            message["tool_calls"] = acc
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "id": t.id,
                        "type": "function",
                        "function": { "name": t.name, "arguments": t.arguments },
                    })
                })
                .collect();
        }
        Ok(json!({
            "id": new_id("chatcmpl-"),
            "object": "chat.completion",
            "created": unix_now(),
            "model": ctx.model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": finish_reason(&acc),
            }],
            "usage": chat_usage(ctx.estimated_prompt_tokens.unwrap_or(0), acc.output_tokens()),
        }))
    }
}

/// Streams Kiro events as `chat.completion.chunk`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct KiroToOpenAiStream;

impl StreamTranslator for KiroToOpenAiStream {
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(KiroChatSession {
            writer: ChatChunkWriter::new(&ctx.model),
            acc: Accumulator::default(),
            prompt_tokens: ctx.estimated_prompt_tokens.unwrap_or(0),
        })
    }
}

struct KiroChatSession {
    writer: ChatChunkWriter,
    acc: Accumulator,
    prompt_tokens: u64,
}

impl StreamSession for KiroChatSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        let steps = self.acc.apply(event)?;
        Ok(steps
            .into_iter()
            .filter_map(|step| match step {
                Step::Text(text) => Some(self.writer.text(&text)),
                Step::ToolStart { index, id, name } => Some(self.writer.tool_start(index, &id, &name)),
                Step::ToolInput { index, input } => Some(self.writer.tool_arguments(index, &input)),
                Step::ToolStop { .. } => None,
            })
            .collect())
    }

    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        let reason = finish_reason(&self.acc);
        Ok(vec![self.writer.finish(
            reason,
            self.prompt_tokens,
            self.acc.output_tokens(),
        )])
    }
}
