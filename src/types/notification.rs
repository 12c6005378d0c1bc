//! Notifications sent from the bridge to the client
//!
//! `session/update` carries streaming content for one session. The other
//! methods report persistent-session lifecycle changes.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::session::TokenUsage;
use super::tool::{ConfirmationType, FileChangeType, RiskLevel, ToolKind};
use crate::session::SessionState;

/// Why a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Agent finished the turn normally
    EndTurn,
    /// Agent hit its turn limit
    MaxTurns,
    /// Agent reported an error result or the process failed
    Error,
    /// Turn was cancelled by the client
    Cancelled,
}

impl StopReason {
    /// Map an agent `result` subtype to a stop reason
    pub fn from_result_subtype(subtype: &str, is_error: bool) -> Self {
        match subtype {
            "success" if !is_error => Self::EndTurn,
            "error_max_turns" => Self::MaxTurns,
            _ => Self::Error,
        }
    }
}

/// Where a confirmation request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationSource {
    /// Agent sent a `control_request` / `can_use_tool`
    Structured,
    /// Detected from denial phrasing in agent output
    Fallback,
}

/// Payload of a `session/update` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionUpdate {
    /// Incremental assistant text
    AgentMessageChunk { text: String },
    /// Incremental thinking text
    AgentThoughtChunk { text: String },
    /// Complete assistant text block
    AgentMessage { text: String },
    /// Complete thinking block
    AgentThought { text: String },
    /// Agent invoked a tool
    ToolUse {
        tool_call_id: String,
        tool_name: String,
        title: String,
        kind: ToolKind,
        input: Value,
    },
    /// A tool finished (or was rejected)
    ToolResult {
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        content: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        synthetic: bool,
    },
    /// Proposed change to a file on disk
    FileChange {
        tool_call_id: String,
        path: String,
        change_type: FileChangeType,
        proposed: bool,
        existed: bool,
        diff: String,
    },
    /// Agent is suspended until the client decides
    ConfirmationRequired {
        tool_call_id: String,
        tool_name: String,
        confirmation_type: ConfirmationType,
        risk_level: RiskLevel,
        risk_reasons: Vec<String>,
        title: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggestions: Option<Value>,
        source: ConfirmationSource,
    },
    /// Agent reported its own conversation id
    AgentSessionBound { agent_session_id: String },
    /// Token usage after a turn
    Usage { turn: TokenUsage, total: TokenUsage },
    /// Terminal result of a turn
    TurnComplete {
        stop_reason: StopReason,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
    },
    /// Error rendered inline in the session
    Error { code: String, message: String },
}

impl SessionUpdate {
    /// Build an error update
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Why a persistent session closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Process exited on its own
    Exited,
    /// Explicit stop/kill/cancel
    Stopped,
    /// Idle timeout elapsed
    IdleTimeout,
    /// Crash retries exhausted or no resumable id
    Crashed,
    /// Evicted from the pool
    Evicted,
    /// Liveness check failed
    Unhealthy,
}

/// Any notification the bridge sends to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    /// `session/update`
    SessionUpdate {
        session_id: String,
        update: SessionUpdate,
    },
    /// `session/stateChanged`
    StateChanged {
        session_id: String,
        previous: SessionState,
        state: SessionState,
    },
    /// `session/recovering`
    Recovering {
        session_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    /// `session/recovered`
    Recovered {
        session_id: String,
        agent_session_id: Option<String>,
        replayed: usize,
    },
    /// `session/closed`
    Closed {
        session_id: String,
        reason: CloseReason,
        fallback_to_one_shot: bool,
    },
    /// `session/evicted`
    Evicted { session_id: String },
}

impl ClientNotification {
    /// JSON-RPC method name
    pub fn method(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session/update",
            Self::StateChanged { .. } => "session/stateChanged",
            Self::Recovering { .. } => "session/recovering",
            Self::Recovered { .. } => "session/recovered",
            Self::Closed { .. } => "session/closed",
            Self::Evicted { .. } => "session/evicted",
        }
    }

    /// Session the notification concerns
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionUpdate { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::Recovering { session_id, .. }
            | Self::Recovered { session_id, .. }
            | Self::Closed { session_id, .. }
            | Self::Evicted { session_id } => session_id,
        }
    }

    /// JSON-RPC params
    pub fn params(&self) -> Value {
        match self {
            Self::SessionUpdate { session_id, update } => json!({
                "sessionId": session_id,
                "update": update,
            }),
            Self::StateChanged {
                session_id,
                previous,
                state,
            } => json!({
                "sessionId": session_id,
                "previous": previous,
                "state": state,
            }),
            Self::Recovering {
                session_id,
                attempt,
                max_attempts,
            } => json!({
                "sessionId": session_id,
                "attempt": attempt,
                "maxAttempts": max_attempts,
            }),
            Self::Recovered {
                session_id,
                agent_session_id,
                replayed,
            } => json!({
                "sessionId": session_id,
                "agentSessionId": agent_session_id,
                "replayed": replayed,
            }),
            Self::Closed {
                session_id,
                reason,
                fallback_to_one_shot,
            } => json!({
                "sessionId": session_id,
                "reason": reason,
                "fallbackToOneShot": fallback_to_one_shot,
            }),
            Self::Evicted { session_id } => json!({ "sessionId": session_id }),
        }
    }

    /// The inner update, if this is a `session/update`
    pub fn as_update(&self) -> Option<&SessionUpdate> {
        match self {
            Self::SessionUpdate { update, .. } => Some(update),
            _ => None,
        }
    }
}

/// Sink for notifications bound for the client
pub trait Notifier: Send + Sync + std::fmt::Debug {
    fn notify(&self, notification: ClientNotification);

    /// Shorthand for a `session/update`
    fn update(&self, session_id: &str, update: SessionUpdate) {
        self.notify(ClientNotification::SessionUpdate {
            session_id: session_id.to_string(),
            update,
        });
    }
}

impl Notifier for tokio::sync::mpsc::UnboundedSender<ClientNotification> {
    fn notify(&self, notification: ClientNotification) {
        if self.send(notification).is_err() {
            tracing::trace!("Notification dropped, receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_change_wire_format() {
        let update = SessionUpdate::FileChange {
            tool_call_id: "toolu_1".to_string(),
            path: "a.txt".to_string(),
            change_type: FileChangeType::Created,
            proposed: true,
            existed: false,
            diff: String::new(),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "fileChange");
        assert_eq!(value["changeType"], "created");
        assert_eq!(value["toolCallId"], "toolu_1");
        assert_eq!(value["proposed"], true);
    }

    #[test]
    fn test_confirmation_wire_format() {
        let update = SessionUpdate::ConfirmationRequired {
            tool_call_id: "toolu_2".to_string(),
            tool_name: "Bash".to_string(),
            confirmation_type: ConfirmationType::Bash,
            risk_level: RiskLevel::High,
            risk_reasons: vec!["Privilege escalation (sudo)".to_string()],
            title: "Run: sudo rm -rf /".to_string(),
            input: json!({"command": "sudo rm -rf /"}),
            suggestions: None,
            source: ConfirmationSource::Structured,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "confirmationRequired");
        assert_eq!(value["confirmationType"], "bash");
        assert_eq!(value["riskLevel"], "high");
        assert!(value.get("suggestions").is_none());
    }

    #[test]
    fn test_tool_result_hides_synthetic_false() {
        let update = SessionUpdate::ToolResult {
            tool_call_id: "t".to_string(),
            tool_name: None,
            content: "ok".to_string(),
            is_error: false,
            synthetic: false,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert!(value.get("synthetic").is_none());
        assert!(value.get("toolName").is_none());
    }

    #[test]
    fn test_notification_methods_and_params() {
        let n = ClientNotification::Closed {
            session_id: "s1".to_string(),
            reason: CloseReason::Crashed,
            fallback_to_one_shot: true,
        };
        assert_eq!(n.method(), "session/closed");
        assert_eq!(
            n.params(),
            json!({"sessionId": "s1", "reason": "crashed", "fallbackToOneShot": true})
        );

        let n = ClientNotification::SessionUpdate {
            session_id: "s1".to_string(),
            update: SessionUpdate::AgentMessageChunk {
                text: "hi".to_string(),
            },
        };
        assert_eq!(n.method(), "session/update");
        assert_eq!(n.params()["update"]["type"], "agentMessageChunk");
        assert_eq!(n.session_id(), "s1");
    }

    #[test]
    fn test_stop_reason_from_subtype() {
        assert_eq!(
            StopReason::from_result_subtype("success", false),
            StopReason::EndTurn
        );
        assert_eq!(
            StopReason::from_result_subtype("success", true),
            StopReason::Error
        );
        assert_eq!(
            StopReason::from_result_subtype("error_max_turns", true),
            StopReason::MaxTurns
        );
        assert_eq!(
            StopReason::from_result_subtype("error_during_execution", true),
            StopReason::Error
        );
    }
}
