//! Splits raw backend bytes into logical events.
//!
//! Bytes arrive in arbitrary fragments; a decoder buffers them and only
//! yields an event once its framing is complete.

use protogate_types::{Result, TranslateError};
use serde_json::Value;

/// How a backend format frames its response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// `text/event-stream` with JSON `data:` lines; complete bodies are JSON.
    #[default]
    Sse,
    /// AWS event-stream: JSON payloads embedded between binary headers.
    EventStream,
}

/// A decoded logical unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(Value),
    /// Explicit end-of-stream marker (`data: [DONE]`).
    Done,
}

/// Known leading keys of event-stream JSON payloads.
const PAYLOAD_PREFIXES: &[&[u8]] = &[
    br#"{"content":"#,
    br#"{"name":"#,
    br#"{"toolUseId":"#,
    br#"{"input":"#,
    br#"{"stop":"#,
    br#"{"followupPrompt":"#,
    br#"{"unit":"#,
    br#"{"contextUsagePercentage":"#,
    br#"{"message":"#,
];

const MAX_PREFIX_LEN: usize = 27;

/// Incremental frame decoder for one response body.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
    /// `data:` lines of the SSE event being assembled.
    data: Vec<String>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Appends raw bytes from the backend.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drops any buffered partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.data.clear();
    }

    /// Returns the next complete frame, or `None` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns a `ResponseConversion` error when an SSE event closed by its
    /// blank line is not valid JSON.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.framing {
            Framing::Sse => self.next_sse(),
            Framing::EventStream => Ok(self.next_event_stream()),
        }
    }

    /// Decodes whatever the backend left unterminated at end of stream.
    ///
    /// A trailing SSE line without a newline, or an event missing its blank
    /// separator, is still an event; an incomplete event-stream object is
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns a `ResponseConversion` error when the trailing event is not
    /// valid JSON.
    pub fn finish(&mut self) -> Result<Option<Frame>> {
        let rest = std::mem::take(&mut self.buf);
        if self.framing != Framing::Sse {
            return Ok(None);
        }
        if !rest.is_empty()
            && let Some(frame) = self.sse_line(&rest)
        {
            return Ok(Some(frame));
        }
        self.dispatch_sse()
    }

    fn next_sse(&mut self) -> Result<Option<Frame>> {
        while let Some(nl) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=nl).collect();
            if is_blank_line(&raw) {
                if let Some(frame) = self.dispatch_sse()? {
                    return Ok(Some(frame));
                }
            } else if let Some(frame) = self.sse_line(&raw) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Adds one non-blank line to the current event.
    ///
    /// The event is yielded as soon as its joined `data:` lines form a
    /// complete JSON value, without waiting for the blank separator.
    fn sse_line(&mut self, raw: &[u8]) -> Option<Frame> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        let payload = if let Some(data) = line.strip_prefix("data:") {
            data.strip_prefix(' ').unwrap_or(data)
        } else if line.starts_with('{') {
            line
        } else {
            // event:, id:, retry: and comments
            return None;
        };
        self.data.push(payload.to_owned());

        let joined = self.data.join("\n");
        let frame = match joined.trim() {
            "" => return None,
            "[DONE]" => Frame::Done,
            text => Frame::Event(serde_json::from_str(text).ok()?),
        };
        self.data.clear();
        Some(frame)
    }

    /// Ends the current event at a blank line or end of input.
    fn dispatch_sse(&mut self) -> Result<Option<Frame>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let joined = self.data.join("\n");
        self.data.clear();
        parse_sse_data(joined.trim())
    }

    fn next_event_stream(&mut self) -> Option<Frame> {
        loop {
            let Some(start) = find_payload_start(&self.buf) else {
                // a prefix may be split across fragments
                let keep = MAX_PREFIX_LEN - 1;
                if self.buf.len() > keep {
                    self.buf.drain(..self.buf.len() - keep);
                }
                return None;
            };
            let Some(len) = balanced_object_len(&self.buf[start..]) else {
                self.buf.drain(..start);
                return None;
            };
            let object: Vec<u8> = self.buf.drain(..start + len).skip(start).collect();
            match serde_json::from_slice(&object) {
                Ok(value) => return Some(Frame::Event(value)),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparsable event-stream payload");
                }
            }
        }
    }
}

impl Framing {
    /// Decodes a complete (non-streaming) response body.
    ///
    /// # Errors
    ///
    /// Returns a `ResponseConversion` error if the body is not valid JSON.
    pub fn decode_complete(self, body: &[u8]) -> Result<Value> {
        match self {
            Self::Sse => serde_json::from_slice(body).map_err(|e| {
                TranslateError::response(format!("backend returned invalid JSON: {e}"))
                    .with_source(e)
            }),
            Self::EventStream => {
                let mut decoder = FrameDecoder::new(self);
                decoder.push(body);
                let mut events = Vec::new();
                while let Some(frame) = decoder.next_frame()? {
                    if let Frame::Event(value) = frame {
                        events.push(value);
                    }
                }
                Ok(Value::Array(events))
            }
        }
    }
}

fn is_blank_line(raw: &[u8]) -> bool {
    raw.iter().all(|&b| b == b'\r' || b == b'\n')
}

fn parse_sse_data(payload: &str) -> Result<Option<Frame>> {
    match payload {
        "" => Ok(None),
        "[DONE]" => Ok(Some(Frame::Done)),
        text => serde_json::from_str(text)
            .map(|v| Some(Frame::Event(v)))
            .map_err(|e| {
                TranslateError::response(format!("malformed stream event: {e}")).with_source(e)
            }),
    }
}

fn find_payload_start(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        (b == b'{' && PAYLOAD_PREFIXES.iter().any(|p| buf[i..].starts_with(p))).then_some(i)
    })
}

/// Length of the brace-balanced JSON object at the start of `bytes`.
fn balanced_object_len(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
