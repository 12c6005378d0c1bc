//! Session-related types: token usage, session mode and session info

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token usage statistics
///
/// Parsed from the `usage` field of the agent's `result` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Number of input tokens
    pub input_tokens: u64,

    /// Number of output tokens
    pub output_tokens: u64,

    /// Number of tokens read from cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,

    /// Number of tokens written to cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
}

impl TokenUsage {
    /// Create a new empty token usage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create usage with only input/output counts
    pub fn from_counts(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    /// Parse from the agent's usage JSON value
    ///
    /// The agent reports snake_case keys.
    pub fn from_agent_usage(usage: &serde_json::Value) -> Self {
        Self {
            input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
            cache_read_input_tokens: usage["cache_read_input_tokens"].as_u64(),
            cache_creation_input_tokens: usage["cache_creation_input_tokens"].as_u64(),
        }
    }

    /// Add another usage to this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;

        if let Some(v) = other.cache_read_input_tokens {
            *self.cache_read_input_tokens.get_or_insert(0) += v;
        }
        if let Some(v) = other.cache_creation_input_tokens {
            *self.cache_creation_input_tokens.get_or_insert(0) += v;
        }
    }

    /// Get total token count (input + output)
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Check if any tokens were used
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// How a prompt is executed against the agent binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    /// Fresh agent process per turn
    #[default]
    OneShot,
    /// One agent process kept alive across turns
    Persistent,
}

impl SessionMode {
    /// Parse from a CLI/RPC string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oneShot" | "one-shot" | "one_shot" => Some(Self::OneShot),
            "persistent" => Some(Self::Persistent),
            _ => None,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneShot => "oneShot",
            Self::Persistent => "persistent",
        }
    }
}

/// Serializable snapshot of a registry session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Bridge-level session id
    pub session_id: String,
    /// Display title
    pub title: String,
    /// Working directory of the agent
    pub cwd: PathBuf,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Agent's own resumable conversation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
}
