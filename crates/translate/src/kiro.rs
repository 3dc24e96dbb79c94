//! Kiro (AWS `CodeWhisperer`) backend: wire model, conversation builder and
//! response event accumulation shared by the client pairs.

pub mod claude;
pub mod openai;

use crate::TranslatorOptions;
use crate::common::str_of;
use crate::token::{ClaudeTokenCounter, OpenAiTokenCounter, estimate_text};
use protogate_engine::{Framing, RegistryBuilder, ResponseCapabilities};
use protogate_types::{ProtocolFormat, Result, TranslateError};
use serde::Serialize;
use serde_json::Value;

/// Kiro model used when the client model has no mapping.
pub const DEFAULT_MODEL: &str = "CLAUDE_SONNET_4_5_20250929_V1_0";

const MAX_TOOLS: usize = 50;
const MAX_DESCRIPTION_CHARS: usize = 500;
const PLACEHOLDER_USER: &str = "Continue";
const PLACEHOLDER_TOOL_RESULTS: &str = "Tool results provided.";
const PLACEHOLDER_ASSISTANT: &str = "I understand.";

/// Maps a public Claude model name to a Kiro model id.
#[must_use]
pub fn map_model(model: &str) -> String {
    let mapped = match model {
        "claude-opus-4-5" | "claude-opus-4-5-20251101" => "claude-opus-4.5",
        "claude-haiku-4-5" | "claude-haiku-4-5-20251001" => "claude-haiku-4.5",
        "claude-sonnet-4-5" | "claude-sonnet-4-5-20250929" => "CLAUDE_SONNET_4_5_20250929_V1_0",
        "claude-sonnet-4-20250514" => "CLAUDE_SONNET_4_20250514_V1_0",
        "claude-3-7-sonnet-20250219" | "claude-3-5-sonnet-20241022" | "claude-3-5-sonnet-latest" => {
            "CLAUDE_3_7_SONNET_20250219_V1_0"
        }
        m if m.ends_with("_V1_0") || m == "claude-opus-4.5" || m == "claude-haiku-4.5" => m,
        _ => DEFAULT_MODEL,
    };
    mapped.to_string()
}

/// Registers `openai -> kiro` and `claude -> kiro`.
pub(crate) fn register(builder: &mut RegistryBuilder, options: &TranslatorOptions) -> Result<()> {
    builder.register(
        ProtocolFormat::OPENAI,
        ProtocolFormat::KIRO,
        openai::OpenAiToKiro::new(options.kiro_profile_arn.clone()),
        ResponseCapabilities::new()
            .with_stream(openai::KiroToOpenAiStream)
            .with_non_stream(openai::KiroToOpenAi)
            .with_token_counter(OpenAiTokenCounter),
    )?;
    builder.register(
        ProtocolFormat::CLAUDE,
        ProtocolFormat::KIRO,
        claude::ClaudeToKiro::new(options.kiro_profile_arn.clone()),
        ResponseCapabilities::new()
            .with_stream(claude::KiroToClaudeStream)
            .with_non_stream(claude::KiroToClaude)
            .with_token_counter(ClaudeTokenCounter),
    )?;
    builder.framing(ProtocolFormat::KIRO, Framing::EventStream);
    Ok(())
}

// ── Wire model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KiroRequest {
    conversation_state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_arn: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationState {
    chat_trigger_type: &'static str,
    conversation_id: String,
    current_message: CurrentMessage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    history: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentMessage {
    user_input_message: UserInputMessage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
enum HistoryMessage {
    UserInputMessage(UserInputMessage),
    AssistantResponseMessage(AssistantResponseMessage),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserInputMessage {
    content: String,
    model_id: String,
    origin: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<KiroImage>,
    #[serde(skip_serializing_if = "UserInputMessageContext::is_empty")]
    user_input_message_context: UserInputMessageContext,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserInputMessageContext {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<KiroTool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_results: Vec<KiroToolResult>,
}

impl UserInputMessageContext {
    fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.tool_results.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssistantResponseMessage {
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_uses: Vec<KiroToolUse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KiroToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KiroToolResult {
    tool_use_id: String,
    content: Vec<KiroText>,
    status: &'static str,
}

impl KiroToolResult {
    pub(crate) fn new(tool_use_id: &str, text: String, is_error: bool) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            content: vec![KiroText { text }],
            status: if is_error { "error" } else { "success" },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct KiroText {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KiroTool {
    tool_specification: ToolSpecification,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSpecification {
    name: String,
    description: String,
    input_schema: InputSchema,
}

#[derive(Debug, Clone, Serialize)]
struct InputSchema {
    json: Value,
}

impl KiroTool {
    pub(crate) fn new(name: &str, description: Option<&str>, schema: Option<&Value>) -> Self {
        let description = match description.filter(|d| !d.is_empty()) {
            Some(d) if d.chars().count() > MAX_DESCRIPTION_CHARS => {
                let truncated: String = d.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
                format!("{truncated}...")
            }
            Some(d) => d.to_string(),
            None => format!("Tool: {name}"),
        };
        let json = schema
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
        Self {
            tool_specification: ToolSpecification {
                name: name.to_string(),
                description,
                input_schema: InputSchema { json },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct KiroImage {
    format: String,
    source: ImageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ImageSource {
    bytes: String,
}

impl KiroImage {
    /// From a media type such as `image/png` and base64 data.
    pub(crate) fn new(media_type: &str, data: &str) -> Self {
        let format = media_type.strip_prefix("image/").unwrap_or(media_type);
        Self {
            format: format.to_string(),
            source: ImageSource {
                bytes: data.to_string(),
            },
        }
    }
}

// ── Conversation builder ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct UserTurn {
    pub text: String,
    pub images: Vec<KiroImage>,
    pub tool_results: Vec<KiroToolResult>,
}

impl UserTurn {
    fn into_message(self, model_id: &str, tools: Vec<KiroTool>) -> UserInputMessage {
        let content = if !self.text.is_empty() {
            self.text
        } else if !self.tool_results.is_empty() {
            PLACEHOLDER_TOOL_RESULTS.to_string()
        } else {
            PLACEHOLDER_USER.to_string()
        };
        UserInputMessage {
            content,
            model_id: model_id.to_string(),
            origin: "AI_EDITOR",
            images: self.images,
            user_input_message_context: UserInputMessageContext {
                tools,
                tool_results: self.tool_results,
            },
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AssistantTurn {
    pub text: String,
    pub tool_uses: Vec<KiroToolUse>,
}

impl AssistantTurn {
    fn into_message(self) -> AssistantResponseMessage {
        let content = if self.text.is_empty() {
            PLACEHOLDER_ASSISTANT.to_string()
        } else {
            self.text
        };
        AssistantResponseMessage {
            content,
            tool_uses: self.tool_uses,
        }
    }
}

#[derive(Debug)]
enum Turn {
    User(UserTurn),
    Assistant(AssistantTurn),
}

fn join_text(into: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !into.is_empty() {
        into.push_str("\n\n");
    }
    into.push_str(text);
}

/// A client conversation normalized for Kiro.
///
/// Consecutive turns of the same role are merged, so the resulting history
/// strictly alternates between user and assistant.
#[derive(Debug, Default)]
pub(crate) struct Conversation {
    system: String,
    turns: Vec<Turn>,
    tools: Vec<KiroTool>,
}

impl Conversation {
    pub(crate) fn add_system(&mut self, text: &str) {
        join_text(&mut self.system, text);
    }

    pub(crate) fn push_user(&mut self, turn: UserTurn) {
        if let Some(Turn::User(last)) = self.turns.last_mut() {
            join_text(&mut last.text, &turn.text);
            last.images.extend(turn.images);
            last.tool_results.extend(turn.tool_results);
        } else {
            self.turns.push(Turn::User(turn));
        }
    }

    pub(crate) fn push_assistant(&mut self, turn: AssistantTurn) {
        if let Some(Turn::Assistant(last)) = self.turns.last_mut() {
            join_text(&mut last.text, &turn.text);
            last.tool_uses.extend(turn.tool_uses);
        } else {
            self.turns.push(Turn::Assistant(turn));
        }
    }

    pub(crate) fn add_tool(&mut self, tool: KiroTool) {
        if self.tools.len() < MAX_TOOLS {
            self.tools.push(tool);
        } else {
            tracing::debug!("kiro tool limit reached, dropping tool");
        }
    }

    /// Builds the `generateAssistantResponse` body.
    pub(crate) fn into_request(self, model: &str, profile_arn: Option<&str>) -> Result<Value> {
        let Self {
            system,
            mut turns,
            tools,
        } = self;
        if turns.is_empty() {
            return Err(TranslateError::request("conversation has no messages"));
        }
        if matches!(turns.first(), Some(Turn::Assistant(_))) {
            turns.insert(0, Turn::User(UserTurn::default()));
        }
        if matches!(turns.last(), Some(Turn::Assistant(_))) {
            turns.push(Turn::User(UserTurn::default()));
        }
        if !system.is_empty()
            && let Some(Turn::User(first)) = turns.first_mut()
        {
            first.text = if first.text.is_empty() {
                system
            } else {
                format!("{system}\n\n{}", first.text)
            };
        }

        let model_id = map_model(model);
        let Some(Turn::User(current)) = turns.pop() else {
            return Err(TranslateError::request("conversation must end with a user turn"));
        };
        let history = turns
            .into_iter()
            .map(|turn| match turn {
                Turn::User(u) => HistoryMessage::UserInputMessage(u.into_message(&model_id, Vec::new())),
                Turn::Assistant(a) => HistoryMessage::AssistantResponseMessage(a.into_message()),
            })
            .collect();

        let request = KiroRequest {
            conversation_state: ConversationState {
                chat_trigger_type: "MANUAL",
                conversation_id: uuid::Uuid::new_v4().to_string(),
                current_message: CurrentMessage {
                    user_input_message: current.into_message(&model_id, tools),
                },
                history,
            },
            profile_arn: profile_arn.filter(|a| !a.is_empty()).map(str::to_owned),
        };
        serde_json::to_value(request).map_err(|e| {
            TranslateError::request(format!("cannot encode kiro request: {e}")).with_source(e)
        })
    }
}

// ── Response events ──────────────────────────────────────────────────────────

/// A Kiro response payload, classified.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KiroEvent {
    Text(String),
    ToolUse {
        /// `None` continues the most recent tool call.
        id: Option<String>,
        name: String,
        input: String,
        stop: bool,
    },
    Error(String),
    Ignored,
}

impl KiroEvent {
    pub(crate) fn parse(v: &Value) -> Self {
        let stop = v.get("stop").and_then(Value::as_bool).unwrap_or(false);
        if let Some(id) = v.get("toolUseId").and_then(Value::as_str) {
            return Self::ToolUse {
                id: Some(id.to_string()),
                name: str_of(v, "name").to_string(),
                input: str_of(v, "input").to_string(),
                stop,
            };
        }
        if v.get("input").is_some() || (stop && v.get("content").is_none()) {
            return Self::ToolUse {
                id: None,
                name: String::new(),
                input: str_of(v, "input").to_string(),
                stop,
            };
        }
        if let Some(text) = v.get("content").and_then(Value::as_str) {
            if v.get("followupPrompt").is_some() {
                return Self::Ignored;
            }
            return Self::Text(text.to_string());
        }
        if let Some(message) = v.get("message").and_then(Value::as_str) {
            return Self::Error(message.to_string());
        }
        // metering, context usage
        Self::Ignored
    }
}

/// What one event changed in the accumulated response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Text(String),
    ToolStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolInput {
        index: usize,
        input: String,
    },
    ToolStop {
        index: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AccumulatedTool {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Ordered piece of the response, for dialects with content blocks.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text(String),
    Tool(usize),
}

/// Accumulates Kiro events into a complete response.
///
/// Streaming sessions map each returned [`Step`] to client chunks; the
/// non-streaming path folds every event and reads the final state, so both
/// paths observe identical content.
#[derive(Debug, Default)]
pub(crate) struct Accumulator {
    pub segments: Vec<Segment>,
    pub tools: Vec<AccumulatedTool>,
    current_tool: Option<usize>,
}

impl Accumulator {
    pub(crate) fn apply(&mut self, event: &Value) -> Result<Vec<Step>> {
        match KiroEvent::parse(event) {
            KiroEvent::Text(text) => {
                if text.is_empty() {
                    return Ok(Vec::new());
                }
                match self.segments.last_mut() {
                    Some(Segment::Text(t)) => t.push_str(&text),
                    _ => self.segments.push(Segment::Text(text.clone())),
                }
                Ok(vec![Step::Text(text)])
            }
            KiroEvent::ToolUse {
                id,
                name,
                input,
                stop,
            } => Ok(self.apply_tool(id, name, input, stop)),
            KiroEvent::Error(message) => Err(TranslateError::transport(message)),
            KiroEvent::Ignored => Ok(Vec::new()),
        }
    }

    fn apply_tool(&mut self, id: Option<String>, name: String, input: String, stop: bool) -> Vec<Step> {
        let mut steps = Vec::new();
        let existing = match &id {
            Some(id) => self.tools.iter().position(|t| &t.id == id),
            None => self.current_tool,
        };
        let index = if let Some(index) = existing {
            index
        } else {
            let Some(id) = id else {
                return steps;
            };
            let index = self.tools.len();
            self.tools.push(AccumulatedTool {
                id: id.clone(),
                name: name.clone(),
                arguments: String::new(),
            });
            self.segments.push(Segment::Tool(index));
            steps.push(Step::ToolStart { index, id, name });
            index
        };
        self.current_tool = Some(index);

        if !input.is_empty() {
            self.tools[index].arguments.push_str(&input);
            steps.push(Step::ToolInput { index, input });
        }
        if stop {
            self.current_tool = None;
            steps.push(Step::ToolStop { index });
        }
        steps
    }

    /// All text, concatenated.
    pub(crate) fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                Segment::Tool(_) => None,
            })
            .collect()
    }

    pub(crate) fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Estimated completion tokens; Kiro reports no usage of its own.
    pub(crate) fn output_tokens(&self) -> u64 {
        let args: String = self.tools.iter().map(|t| t.arguments.as_str()).collect();
        estimate_text(&self.text()) + estimate_text(&args)
    }

    /// Folds a complete response body (an array of payloads).
    pub(crate) fn from_body(body: &Value) -> Result<Self> {
        let events = body
            .as_array()
            .ok_or_else(|| TranslateError::response("kiro response is not an event list"))?;
        let mut acc = Self::default();
        for event in events {
            acc.apply(event)?;
        }
        Ok(acc)
    }
}
