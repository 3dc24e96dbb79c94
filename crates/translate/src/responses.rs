//! `OpenAI` Responses output builder.
//!
//! Streaming sessions forward the emitted events; the non-streaming path
//! feeds the same calls and keeps only the final `response` object, so both
//! modes describe identical output items.

use crate::common::{new_id, unix_now};
use protogate_types::StreamChunk;
use serde_json::{Value, json};

#[derive(Debug)]
enum OpenItem {
    Message { id: String, index: usize, text: String },
    Reasoning { id: String, index: usize, text: String },
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Usage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
}

#[derive(Debug)]
pub(crate) struct ResponsesWriter {
    id: String,
    created_at: u64,
    model: String,
    sequence: u64,
    started: bool,
    output: Vec<Value>,
    open: Option<OpenItem>,
    calls: usize,
    usage: Usage,
    incomplete_reason: Option<&'static str>,
}

impl ResponsesWriter {
    pub(crate) fn new(model: &str, input_tokens: u64) -> Self {
        Self {
            id: new_id("resp_"),
            created_at: unix_now(),
            model: model.to_string(),
            sequence: 0,
            started: false,
            output: Vec::new(),
            open: None,
            calls: 0,
            usage: Usage {
                input: input_tokens,
                ..Usage::default()
            },
            incomplete_reason: None,
        }
    }

    fn event(&mut self, kind: &str, mut body: Value) -> StreamChunk {
        body["type"] = json!(kind);
        body["sequence_number"] = json!(self.sequence);
        self.sequence += 1;
        StreamChunk::named(kind, body)
    }

    fn response_object(&self, status: &str) -> Value {
        let mut response = json!({
            "id": self.id,
            "object": "response",
            "created_at": self.created_at,
            "status": status,
            "model": self.model,
            "output": self.output,
        });
        if status != "in_progress" {
            response["usage"] = json!({
                "input_tokens": self.usage.input,
                "output_tokens": self.usage.output,
                "total_tokens": self.usage.input + self.usage.output,
                "output_tokens_details": { "reasoning_tokens": self.usage.reasoning },
            });
        }
        if let Some(reason) = self.incomplete_reason {
            response["incomplete_details"] = json!({ "reason": reason });
        }
        response
    }

    pub(crate) fn start(&mut self, out: &mut Vec<StreamChunk>) {
        if self.started {
            return;
        }
        self.started = true;
        let response = self.response_object("in_progress");
        let created = self.event("response.created", json!({ "response": response }));
        out.push(created);
        let in_progress = self.event("response.in_progress", json!({ "response": response }));
        out.push(in_progress);
    }

    pub(crate) fn set_usage(&mut self, usage: Usage) {
        self.usage = usage;
    }

    pub(crate) fn set_incomplete(&mut self, reason: &'static str) {
        self.incomplete_reason = Some(reason);
    }

    fn next_index(&self) -> usize {
        self.output.len()
    }

    pub(crate) fn reasoning(&mut self, delta: &str, out: &mut Vec<StreamChunk>) {
        self.start(out);
        if !matches!(self.open, Some(OpenItem::Reasoning { .. })) {
            self.close(out);
            let id = new_id("rs_");
            let index = self.next_index();
            let added = self.event(
                "response.output_item.added",
                json!({
                    "output_index": index,
                    "item": { "id": id, "type": "reasoning", "summary": [] },
                }),
            );
            out.push(added);
            let part = self.event(
                "response.reasoning_summary_part.added",
                json!({
                    "item_id": id,
                    "output_index": index,
                    "summary_index": 0,
                    "part": { "type": "summary_text", "text": "" },
                }),
            );
            out.push(part);
            self.open = Some(OpenItem::Reasoning {
                id,
                index,
                text: String::new(),
            });
        }
        let Some(OpenItem::Reasoning { id, index, text }) = &mut self.open else {
            return;
        };
        text.push_str(delta);
        let body = json!({
            "item_id": id,
            "output_index": index,
            "summary_index": 0,
            "delta": delta,
        });
        let chunk = self.event("response.reasoning_summary_text.delta", body);
        out.push(chunk);
    }

    pub(crate) fn text(&mut self, delta: &str, out: &mut Vec<StreamChunk>) {
        self.start(out);
        if !matches!(self.open, Some(OpenItem::Message { .. })) {
            self.close(out);
            let id = new_id("msg_");
            let index = self.next_index();
            let added = self.event(
                "response.output_item.added",
                json!({
                    "output_index": index,
                    "item": {
                        "id": id,
                        "type": "message",
                        "status": "in_progress",
                        "role": "assistant",
                        "content": [],
                    },
                }),
            );
            out.push(added);
            let part = self.event(
                "response.content_part.added",
                json!({
                    "item_id": id,
                    "output_index": index,
                    "content_index": 0,
                    "part": { "type": "output_text", "text": "", "annotations": [] },
                }),
            );
            out.push(part);
            self.open = Some(OpenItem::Message {
                id,
                index,
                text: String::new(),
            });
        }
        let Some(OpenItem::Message { id, index, text }) = &mut self.open else {
            return;
        };
        text.push_str(delta);
        let body = json!({
            "item_id": id,
            "output_index": index,
            "content_index": 0,
            "delta": delta,
        });
        let chunk = self.event("response.output_text.delta", body);
        out.push(chunk);
    }

    /// Emits a complete function call item; `call_id` defaults to `call_<n>`.
    pub(crate) fn function_call(
        &mut self,
        call_id: Option<&str>,
        name: &str,
        arguments: &str,
        out: &mut Vec<StreamChunk>,
    ) {
        self.start(out);
        self.close(out);
        let index = self.next_index();
        let id = new_id("fc_");
        let call_id = call_id.map_or_else(|| format!("call_{}", self.calls), str::to_owned);
        self.calls += 1;
        let item = json!({
            "id": id,
            "type": "function_call",
            "status": "completed",
            "call_id": call_id,
            "name": name,
            "arguments": arguments,
        });
        let mut pending = item.clone();
        pending["status"] = json!("in_progress");
        pending["arguments"] = json!("");

        let added = self.event(
            "response.output_item.added",
            json!({ "output_index": index, "item": pending }),
        );
        out.push(added);
        let delta = self.event(
            "response.function_call_arguments.delta",
            json!({ "item_id": id, "output_index": index, "delta": arguments }),
        );
        out.push(delta);
        let done = self.event(
            "response.function_call_arguments.done",
            json!({ "item_id": id, "output_index": index, "arguments": arguments }),
        );
        out.push(done);
        let item_done = self.event(
            "response.output_item.done",
            json!({ "output_index": index, "item": item }),
        );
        out.push(item_done);
        self.output.push(item);
    }

    /// Completes the open message or reasoning item.
    pub(crate) fn close(&mut self, out: &mut Vec<StreamChunk>) {
        match self.open.take() {
            Some(OpenItem::Message { id, index, text }) => {
                let part = json!({ "type": "output_text", "text": text, "annotations": [] });
                let text_done = self.event(
                    "response.output_text.done",
                    json!({ "item_id": id, "output_index": index, "content_index": 0, "text": text }),
                );
                out.push(text_done);
                let part_done = self.event(
                    "response.content_part.done",
                    json!({ "item_id": id, "output_index": index, "content_index": 0, "part": part }),
                );
                out.push(part_done);
                let item = json!({
                    "id": id,
                    "type": "message",
                    "status": "completed",
                    "role": "assistant",
                    "content": [part],
                });
                let item_done = self.event(
                    "response.output_item.done",
                    json!({ "output_index": index, "item": item }),
                );
                out.push(item_done);
                self.output.push(item);
            }
            Some(OpenItem::Reasoning { id, index, text }) => {
                let part = json!({ "type": "summary_text", "text": text });
                let text_done = self.event(
                    "response.reasoning_summary_text.done",
                    json!({ "item_id": id, "output_index": index, "summary_index": 0, "text": text }),
                );
                out.push(text_done);
                let part_done = self.event(
                    "response.reasoning_summary_part.done",
                    json!({ "item_id": id, "output_index": index, "summary_index": 0, "part": part }),
                );
                out.push(part_done);
                let item = json!({ "id": id, "type": "reasoning", "summary": [part] });
                let item_done = self.event(
                    "response.output_item.done",
                    json!({ "output_index": index, "item": item }),
                );
                out.push(item_done);
                self.output.push(item);
            }
            None => {}
        }
    }

    /// Closes everything and returns the final `response` object.
    pub(crate) fn finish(&mut self, out: &mut Vec<StreamChunk>) -> Value {
        self.start(out);
        self.close(out);
        let (kind, status) = if self.incomplete_reason.is_some() {
            ("response.incomplete", "incomplete")
        } else {
            ("response.completed", "completed")
        };
        let response = self.response_object(status);
        let done = self.event(kind, json!({ "response": response }));
        out.push(done);
        response
    }
}
