//! Stream chunk builders for the `OpenAI` chat and Claude message dialects.
//!
//! Several backends stream into the same client dialect; these writers keep
//! the per-response bookkeeping (ids, open content blocks, the role delta) in
//! one place.

use crate::common::{new_id, unix_now};
use protogate_types::StreamChunk;
use serde_json::{Value, json};

/// `chat.completion.chunk` builder for one response.
#[derive(Debug)]
pub(crate) struct ChatChunkWriter {
    id: String,
    created: u64,
    model: String,
    role_sent: bool,
}

impl ChatChunkWriter {
    pub(crate) fn new(model: &str) -> Self {
        Self {
            id: new_id("chatcmpl-"),
            created: unix_now(),
            model: model.to_string(),
            role_sent: false,
        }
    }

    pub(crate) fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn envelope(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    /// A delta chunk; the first one carries `role: assistant`.
    pub(crate) fn delta(&mut self, mut delta: Value) -> StreamChunk {
        if !self.role_sent {
            self.role_sent = true;
            delta["role"] = json!("assistant");
        }
        StreamChunk::data(self.envelope(delta, None))
    }

    pub(crate) fn text(&mut self, text: &str) -> StreamChunk {
        self.delta(json!({ "content": text }))
    }

    pub(crate) fn reasoning(&mut self, text: &str) -> StreamChunk {
        self.delta(json!({ "reasoning_content": text }))
    }

    pub(crate) fn tool_start(&mut self, index: usize, id: &str, name: &str) -> StreamChunk {
        self.delta(json!({
            "tool_calls": [{
                "index": index,
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": "" },
            }]
        }))
    }

    pub(crate) fn tool_arguments(&mut self, index: usize, fragment: &str) -> StreamChunk {
        self.delta(json!({
            "tool_calls": [{ "index": index, "function": { "arguments": fragment } }]
        }))
    }

    /// The terminal chunk with `finish_reason` and usage.
    pub(crate) fn finish(&mut self, finish_reason: &str, prompt_tokens: u64, completion_tokens: u64) -> StreamChunk {
        let delta = if self.role_sent {
            json!({})
        } else {
            self.role_sent = true;
            json!({ "role": "assistant" })
        };
        let mut chunk = self.envelope(delta, Some(finish_reason));
        chunk["usage"] = chat_usage(prompt_tokens, completion_tokens);
        StreamChunk::data(chunk)
    }
}

pub(crate) fn chat_usage(prompt_tokens: u64, completion_tokens: u64) -> Value {
    json!({
        "prompt_tokens": prompt_tokens,
        "completion_tokens": completion_tokens,
        "total_tokens": prompt_tokens + completion_tokens,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    Tool,
}

/// Claude `message_start` .. `message_stop` event builder.
///
/// Opening a block of a different kind closes the current one, so at most
/// one content block is open at a time.
#[derive(Debug)]
pub(crate) struct MessageEventWriter {
    id: String,
    model: String,
    input_tokens: u64,
    started: bool,
    open: Option<(usize, BlockKind)>,
    next_index: usize,
}

impl MessageEventWriter {
    pub(crate) fn new(model: &str, input_tokens: u64) -> Self {
        Self {
            id: new_id("msg_"),
            model: model.to_string(),
            input_tokens,
            started: false,
            open: None,
            next_index: 0,
        }
    }

    /// Replaces the prompt estimate once the backend reports real usage.
    pub(crate) fn set_input_tokens(&mut self, tokens: u64) {
        self.input_tokens = tokens;
    }

    pub(crate) fn start(&mut self, out: &mut Vec<StreamChunk>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(StreamChunk::named(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": { "input_tokens": self.input_tokens, "output_tokens": 0 },
                }
            }),
        ));
    }

    fn open_block(&mut self, kind: BlockKind, block: Value, out: &mut Vec<StreamChunk>) -> usize {
        self.start(out);
        self.close(out);
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some((index, kind));
        out.push(StreamChunk::named(
            "content_block_start",
            json!({ "type": "content_block_start", "index": index, "content_block": block }),
        ));
        index
    }

    fn block_delta(index: usize, delta: Value) -> StreamChunk {
        StreamChunk::named(
            "content_block_delta",
            json!({ "type": "content_block_delta", "index": index, "delta": delta }),
        )
    }

    pub(crate) fn text(&mut self, text: &str, out: &mut Vec<StreamChunk>) {
        let index = match self.open {
            Some((index, BlockKind::Text)) => index,
            _ => self.open_block(BlockKind::Text, json!({"type": "text", "text": ""}), out),
        };
        out.push(Self::block_delta(index, json!({"type": "text_delta", "text": text})));
    }

    pub(crate) fn thinking(&mut self, text: &str, out: &mut Vec<StreamChunk>) {
        let index = match self.open {
            Some((index, BlockKind::Thinking)) => index,
            _ => self.open_block(
                BlockKind::Thinking,
                json!({"type": "thinking", "thinking": ""}),
                out,
            ),
        };
        out.push(Self::block_delta(
            index,
            json!({"type": "thinking_delta", "thinking": text}),
        ));
    }

    /// Opens a `tool_use` block and returns its block index.
    pub(crate) fn tool_start(&mut self, id: &str, name: &str, out: &mut Vec<StreamChunk>) -> usize {
        self.open_block(
            BlockKind::Tool,
            json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
            out,
        )
    }

    pub(crate) fn tool_input(&mut self, block: usize, partial_json: &str, out: &mut Vec<StreamChunk>) {
        out.push(Self::block_delta(
            block,
            json!({"type": "input_json_delta", "partial_json": partial_json}),
        ));
    }

    /// Closes `block` if it is the open one.
    pub(crate) fn close_block(&mut self, block: usize, out: &mut Vec<StreamChunk>) {
        if matches!(self.open, Some((index, _)) if index == block) {
            self.close(out);
        }
    }

    pub(crate) fn close(&mut self, out: &mut Vec<StreamChunk>) {
        if let Some((index, _)) = self.open.take() {
            out.push(StreamChunk::named(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": index}),
            ));
        }
    }

    pub(crate) fn finish(&mut self, stop_reason: &str, output_tokens: u64, out: &mut Vec<StreamChunk>) {
        self.start(out);
        self.close(out);
        out.push(StreamChunk::named(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": { "input_tokens": self.input_tokens, "output_tokens": output_tokens },
            }),
        ));
        out.push(StreamChunk::named("message_stop", json!({"type": "message_stop"})));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(chunks: &[StreamChunk]) -> Vec<&str> {
        chunks.iter().filter_map(|c| c.event.as_deref()).collect()
    }

    #[test]
    fn test_chat_role_on_first_delta_only() {
        let mut w = ChatChunkWriter::new("gpt-4o");
        let first = w.text("a");
        let second = w.text("b");
        assert_eq!(first.data["choices"][0]["delta"]["role"], "assistant");
        assert!(second.data["choices"][0]["delta"].get("role").is_none());
        assert_eq!(first.data["id"], second.data["id"]);
        assert_eq!(first.data["object"], "chat.completion.chunk");
    }

    #[test]
    fn test_chat_finish_carries_usage() {
        let mut w = ChatChunkWriter::new("m");
        let _ = w.text("x");
        let last = w.finish("stop", 10, 4);
        assert_eq!(last.data["choices"][0]["finish_reason"], "stop");
        assert_eq!(last.data["usage"]["total_tokens"], 14);
    }

    #[test]
    fn test_message_block_switching() {
        let mut w = MessageEventWriter::new("claude", 5);
        let mut out = Vec::new();
        w.text("hi", &mut out);
        w.text(" there", &mut out);
        let tool = w.tool_start("toolu_1", "lookup", &mut out);
        w.tool_input(tool, "{}", &mut out);
        w.finish("tool_use", 3, &mut out);
        assert_eq!(
            events(&out),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(out[5].data["index"], 1);
        assert_eq!(out[8].data["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn test_message_finish_without_content() {
        let mut w = MessageEventWriter::new("claude", 0);
        let mut out = Vec::new();
        w.finish("end_turn", 0, &mut out);
        assert_eq!(events(&out), vec!["message_start", "message_delta", "message_stop"]);
    }
}
