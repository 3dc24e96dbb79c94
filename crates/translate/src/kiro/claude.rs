//! Claude Messages clients served by the Kiro backend.

use super::{Accumulator, AssistantTurn, Conversation, KiroImage, KiroTool, KiroToolResult, KiroToolUse, Segment, Step, UserTurn};
use crate::common::{new_id, str_of, text_of};
use crate::writer::MessageEventWriter;
use protogate_types::{
    RequestContext, RequestTranslator, ResponseContext, ResponseTranslator, Result, StreamChunk,
    StreamSession, StreamTranslator, TranslateError,
};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Converts Messages requests into `generateAssistantResponse` bodies.
#[derive(Debug, Clone, Default)]
pub struct ClaudeToKiro {
    profile_arn: Option<String>,
}

impl ClaudeToKiro {
    #[must_use]
    pub fn new(profile_arn: Option<String>) -> Self {
        Self { profile_arn }
    }
}

fn user_turn(content: &Value) -> UserTurn {
    let Value::Array(blocks) = content else {
        return UserTurn {
            text: text_of(content),
            ..UserTurn::default()
        };
    };
    let mut turn = UserTurn::default();
    let mut texts = Vec::new();
    for block in blocks {
        match str_of(block, "type") {
            "text" => texts.push(str_of(block, "text")),
            "image" => {
                let source = block.get("source").unwrap_or(&Value::Null);
                if str_of(source, "type") == "base64" {
                    turn.images
                        .push(KiroImage::new(str_of(source, "media_type"), str_of(source, "data")));
                }
            }
            "tool_result" => {
                let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                turn.tool_results.push(KiroToolResult::new(
                    str_of(block, "tool_use_id"),
                    block.get("content").map(text_of).unwrap_or_default(),
                    is_error,
                ));
            }
            _ => {}
        }
    }
    turn.text = texts.join("\n");
    turn
}

fn assistant_turn(content: &Value) -> AssistantTurn {
    let Value::Array(blocks) = content else {
        return AssistantTurn {
            text: text_of(content),
            ..AssistantTurn::default()
        };
    };
    let mut turn = AssistantTurn::default();
    let mut texts = Vec::new();
    for block in blocks {
        match str_of(block, "type") {
            "text" => texts.push(str_of(block, "text")),
            "tool_use" => turn.tool_uses.push(KiroToolUse {
                tool_use_id: str_of(block, "id").to_string(),
                name: str_of(block, "name").to_string(),
                input: block.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            // thinking blocks are not replayed to Kiro
            _ => {}
        }
    }
    turn.text = texts.join("\n");
    turn
}

impl RequestTranslator for ClaudeToKiro {
    fn translate_request(&self, ctx: &RequestContext, req: Value) -> Result<Value> {
        let messages = req
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| TranslateError::request("missing 'messages'"))?;

        let mut conv = Conversation::default();
        if let Some(system) = req.get("system") {
            conv.add_system(&text_of(system));
        }
        for message in messages {
            let content = message.get("content").unwrap_or(&Value::Null);
            if str_of(message, "role") == "assistant" {
                conv.push_assistant(assistant_turn(content));
            } else {
                conv.push_user(user_turn(content));
            }
        }
        for tool in req.get("tools").and_then(Value::as_array).into_iter().flatten() {
            conv.add_tool(KiroTool::new(
                str_of(tool, "name"),
                tool.get("description").and_then(Value::as_str),
                tool.get("input_schema"),
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

fn stop_reason(acc: &Accumulator) -> &'static str {
    if acc.has_tools() { "tool_use" } else { "end_turn" }
}

/// Folds a complete Kiro event list into a Messages response.
#[derive(Debug, Clone, Copy, Default)]
pub struct KiroToClaude;

impl ResponseTranslator for KiroToClaude {
    fn translate_response(&self, ctx: &ResponseContext, res: Value) -> Result<Value> {
        let acc = Accumulator::from_body(&res)?;
        let content: Vec<Value> = acc
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => json!({"type": "text", "text": text}),
                Segment::Tool(index) => {
                    let tool = &acc.tools[*index];
                    json!({
                        "type": "tool_use",
                        "id": tool.id,
                        "name": tool.name,
                        "input": crate::common::parse_arguments(&tool.arguments),
                    })
                }
            })
            .collect();
        Ok(json!({
            "id": new_id("msg_"),
            "type": "message",
            "role": "assistant",
            "model": ctx.model,
            "content": content,
            "stop_reason": stop_reason(&acc),
            "stop_sequence": null,
            "usage": {
                "input_tokens": ctx.estimated_prompt_tokens.unwrap_or(0),
                "output_tokens": acc.output_tokens(),
            },
        }))
    }
}

/// Streams Kiro events as Messages stream events.
#[derive(Debug, Clone, Copy, Default)]
pub struct KiroToClaudeStream;

impl StreamTranslator for KiroToClaudeStream {
    fn start(&self, ctx: &ResponseContext) -> Box<dyn StreamSession> {
        Box::new(KiroMessageSession {
            writer: MessageEventWriter::new(&ctx.model, ctx.estimated_prompt_tokens.unwrap_or(0)),
            acc: Accumulator::default(),
            blocks: HashMap::new(),
        })
    }
}

struct KiroMessageSession {
    writer: MessageEventWriter,
    acc: Accumulator,
    /// Accumulator tool index to content block index.
    blocks: HashMap<usize, usize>,
}

impl StreamSession for KiroMessageSession {
    fn translate_event(&mut self, event: &Value) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();
        for step in self.acc.apply(event)? {
            match step {
                Step::Text(text) => self.writer.text(&text, &mut out),
                Step::ToolStart { index, id, name } => {
                    let block = self.writer.tool_start(&id, &name, &mut out);
                    self.blocks.insert(index, block);
                }
                Step::ToolInput { index, input } => {
                    if let Some(&block) = self.blocks.get(&index) {
                        self.writer.tool_input(block, &input, &mut out);
                    }
                }
                Step::ToolStop { index } => {
                    if let Some(&block) = self.blocks.get(&index) {
                        self.writer.close_block(block, &mut out);
                    }
                }
            }
        }
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();
        self.writer
            .finish(stop_reason(&self.acc), self.acc.output_tokens(), &mut out);
        Ok(out)
    }
}
