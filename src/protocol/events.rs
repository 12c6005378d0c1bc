//! Classification of agent stdout events
//!
//! Raw JSON values are first normalized (nested `stream_event` wrappers are
//! unwrapped) and then classified by their `type` field into [`AgentEvent`].

use serde_json::Value;

use crate::types::TokenUsage;

/// Maximum number of nested `stream_event` wrappers that are unwrapped
const MAX_WRAPPER_DEPTH: usize = 4;

/// A content block inside an assistant or user message
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult(ToolResultBlock),
}

/// Result of a tool invocation reported by the agent
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    /// Text content, flattened from string or block-array form
    pub content: String,
    pub is_error: bool,
}

/// Incremental content delta from a partial message
#[derive(Debug, Clone, PartialEq)]
pub enum ContentDelta {
    Text(String),
    Thinking(String),
    /// Partial tool input JSON
    InputJson(String),
}

/// `control_request` sent by the agent over stdout
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    /// Id to echo back in the `control_response`
    pub request_id: String,
    /// Inner subtype, e.g. `can_use_tool`
    pub subtype: String,
    pub tool_name: Option<String>,
    pub input: Value,
    /// Tool use this request concerns, when the agent reports one
    pub tool_use_id: Option<String>,
    /// Suggested permission updates for "always allow"
    pub permission_suggestions: Option<Value>,
    pub blocked_path: Option<String>,
}

impl ControlRequest {
    /// Whether this is a permission check for a tool call
    pub fn is_can_use_tool(&self) -> bool {
        self.subtype == "can_use_tool"
    }

    /// Id used to key the confirmation: the tool use id, or the request id
    pub fn tool_call_id(&self) -> &str {
        self.tool_use_id.as_deref().unwrap_or(&self.request_id)
    }
}

/// Terminal `result` event of a turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub subtype: String,
    pub is_error: bool,
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub usage: Option<TokenUsage>,
    pub duration_ms: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub num_turns: Option<u64>,
}

/// One classified event from the agent's stdout
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// `system` / `init`: the agent reports its conversation id
    Init {
        session_id: Option<String>,
        model: Option<String>,
    },
    /// Any other `system` subtype
    System { subtype: String },
    /// Complete assistant message
    Assistant { blocks: Vec<ContentBlock> },
    /// Tool results, from a `user` echo or a top-level `tool_result`
    ToolResults(Vec<ToolResultBlock>),
    /// Agent asks the host something (permission checks)
    ControlRequest(ControlRequest),
    /// Agent withdrew an earlier control request
    ControlCancel { request_id: String },
    /// `content_block_start` for a block that streams
    BlockStart { index: u64, block: ContentBlock },
    /// `content_block_delta`
    Delta { index: u64, delta: ContentDelta },
    /// `content_block_stop`
    BlockStop { index: u64 },
    /// Terminal `result`
    Result(TurnResult),
    /// Recognized but not interesting (message_start, user text echo, ...)
    Ignored { kind: String },
}

impl AgentEvent {
    /// Normalize and classify a raw value
    pub fn from_value(value: Value) -> Self {
        classify(normalize(value))
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::System { .. } => "system",
            Self::Assistant { .. } => "assistant",
            Self::ToolResults(_) => "tool_results",
            Self::ControlRequest(_) => "control_request",
            Self::ControlCancel { .. } => "control_cancel",
            Self::BlockStart { .. } => "block_start",
            Self::Delta { .. } => "delta",
            Self::BlockStop { .. } => "block_stop",
            Self::Result(_) => "result",
            Self::Ignored { .. } => "ignored",
        }
    }
}

/// Unwrap nested `stream_event` envelopes
pub fn normalize(mut value: Value) -> Value {
    for _ in 0..MAX_WRAPPER_DEPTH {
        let is_wrapper = value.get("type").and_then(Value::as_str) == Some("stream_event")
            && value.get("event").is_some_and(Value::is_object);
        if !is_wrapper {
            break;
        }
        value = value["event"].take();
    }
    value
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn classify(value: Value) -> AgentEvent {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "system" => {
            let subtype = str_field(&value, "subtype").unwrap_or_default();
            if subtype == "init" {
                AgentEvent::Init {
                    session_id: str_field(&value, "session_id"),
                    model: str_field(&value, "model"),
                }
            } else {
                AgentEvent::System { subtype }
            }
        }
        "assistant" => AgentEvent::Assistant {
            blocks: parse_blocks(&value["message"]["content"]),
        },
        "user" => {
            let results: Vec<ToolResultBlock> = parse_blocks(&value["message"]["content"])
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolResult(result) => Some(result),
                    _ => None,
                })
                .collect();
            if results.is_empty() {
                AgentEvent::Ignored {
                    kind: "user".to_string(),
                }
            } else {
                AgentEvent::ToolResults(results)
            }
        }
        "tool_result" => match parse_tool_result(&value) {
            Some(result) => AgentEvent::ToolResults(vec![result]),
            None => AgentEvent::Ignored {
                kind: kind.to_string(),
            },
        },
        "control_request" => {
            let request = &value["request"];
            AgentEvent::ControlRequest(ControlRequest {
                request_id: str_field(&value, "request_id").unwrap_or_default(),
                subtype: str_field(request, "subtype").unwrap_or_default(),
                tool_name: str_field(request, "tool_name"),
                input: request.get("input").cloned().unwrap_or(Value::Null),
                tool_use_id: str_field(request, "tool_use_id"),
                permission_suggestions: request
                    .get("permission_suggestions")
                    .filter(|v| !v.is_null())
                    .cloned(),
                blocked_path: str_field(request, "blocked_path"),
            })
        }
        "control_cancel_request" => AgentEvent::ControlCancel {
            request_id: str_field(&value, "request_id").unwrap_or_default(),
        },
        "content_block_start" => {
            let index = value["index"].as_u64().unwrap_or(0);
            match parse_block(&value["content_block"]) {
                Some(block) => AgentEvent::BlockStart { index, block },
                None => AgentEvent::Ignored {
                    kind: kind.to_string(),
                },
            }
        }
        "content_block_delta" => {
            let index = value["index"].as_u64().unwrap_or(0);
            let delta = &value["delta"];
            let parsed = match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => str_field(delta, "text").map(ContentDelta::Text),
                Some("thinking_delta") => str_field(delta, "thinking").map(ContentDelta::Thinking),
                Some("input_json_delta") => {
                    str_field(delta, "partial_json").map(ContentDelta::InputJson)
                }
                _ => None,
            };
            match parsed {
                Some(delta) => AgentEvent::Delta { index, delta },
                None => AgentEvent::Ignored {
                    kind: kind.to_string(),
                },
            }
        }
        "content_block_stop" => AgentEvent::BlockStop {
            index: value["index"].as_u64().unwrap_or(0),
        },
        "result" => AgentEvent::Result(TurnResult {
            subtype: str_field(&value, "subtype").unwrap_or_else(|| "success".to_string()),
            is_error: value["is_error"].as_bool().unwrap_or(false),
            result: str_field(&value, "result"),
            session_id: str_field(&value, "session_id"),
            usage: value
                .get("usage")
                .filter(|u| u.is_object())
                .map(TokenUsage::from_agent_usage),
            duration_ms: value["duration_ms"].as_u64(),
            total_cost_usd: value["total_cost_usd"].as_f64(),
            num_turns: value["num_turns"].as_u64(),
        }),
        other => AgentEvent::Ignored {
            kind: other.to_string(),
        },
    }
}

fn parse_blocks(content: &Value) -> Vec<ContentBlock> {
    match content {
        Value::Array(items) => items.iter().filter_map(parse_block).collect(),
        Value::String(text) => vec![ContentBlock::Text { text: text.clone() }],
        _ => Vec::new(),
    }
}

fn parse_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text {
            text: str_field(block, "text")?,
        }),
        "thinking" => Some(ContentBlock::Thinking {
            thinking: str_field(block, "thinking")?,
        }),
        "tool_use" | "server_tool_use" | "mcp_tool_use" => Some(ContentBlock::ToolUse {
            id: str_field(block, "id")?,
            name: str_field(block, "name")?,
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => parse_tool_result(block).map(ContentBlock::ToolResult),
        _ => None,
    }
}

fn parse_tool_result(block: &Value) -> Option<ToolResultBlock> {
    Some(ToolResultBlock {
        tool_use_id: str_field(block, "tool_use_id")?,
        content: flatten_content(&block["content"]),
        is_error: block["is_error"].as_bool().unwrap_or(false),
    })
}

/// Flatten tool-result content (string, or array of text blocks) to text
pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
