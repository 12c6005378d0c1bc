//! Permission broker
//!
//! Holds every outstanding tool confirmation, keyed by `(session_id,
//! tool_call_id)`. Each confirmation has a waiter task racing the client's
//! decision against the permission timeout; the waiter is the only place that
//! answers the agent, so every request is resolved exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::fallback::DetectedDenial;
use super::risk::assess;
use crate::process::AgentInput;
use crate::protocol::{ControlRequest, input};
use crate::types::{ConfirmationSource, Notifier, SessionUpdate, ToolKind};

const DENY_MESSAGE: &str = "User denied permission";
const TIMEOUT_MESSAGE: &str = "Permission request timed out";
const CANCELLED_MESSAGE: &str = "Permission request cancelled";
const WITHDRAWN_MESSAGE: &str = "Permission request withdrawn by the agent";

/// Called with the tool name when a fallback confirmation is approved
pub type FallbackApproval = Box<dyn FnOnce(String) + Send>;

/// Client's answer to a confirmation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmOptions {
    /// Replacement tool input
    pub updated_input: Option<Value>,
    /// Allow this tool for the rest of the session
    pub always_allow: bool,
    /// Message returned to the agent on denial
    pub message: Option<String>,
}

#[derive(Debug)]
enum Decision {
    Allow {
        updated_input: Option<Value>,
        always: bool,
    },
    Deny {
        message: String,
    },
    TimedOut,
    Cancelled,
    /// Agent sent `control_cancel_request`
    Withdrawn,
}

struct PendingConfirmation {
    /// Control request id; `None` for fallback-detected requests
    request_id: Option<String>,
    tool_name: String,
    input: Value,
    suggestions: Option<Value>,
    created_at: DateTime<Utc>,
    decision_tx: oneshot::Sender<Decision>,
}

impl std::fmt::Debug for PendingConfirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConfirmation")
            .field("request_id", &self.request_id)
            .field("tool_name", &self.tool_name)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a pending confirmation for `permission/pending`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
    pub source: ConfirmationSource,
    /// Permission rules the agent offered for an always-allow answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Value>,
    pub created_at: DateTime<Utc>,
}

type Key = (String, String);

/// What the waiter needs once a decision arrives
struct Resolution {
    session_id: String,
    tool_call_id: String,
    request_id: Option<String>,
    tool_name: String,
    input: Value,
    suggestions: Option<Value>,
    agent: Option<Arc<dyn AgentInput>>,
    on_fallback_approval: Option<FallbackApproval>,
}

/// Outstanding confirmations across all sessions
#[derive(Debug)]
pub struct PermissionBroker {
    pending: DashMap<Key, PendingConfirmation>,
    /// Sessions that sent at least one structured request
    structured_sessions: DashSet<String>,
    /// Tools approved through the fallback path, per session
    fallback_allowed: DashMap<String, Vec<String>>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl PermissionBroker {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            structured_sessions: DashSet::new(),
            fallback_allowed: DashMap::new(),
            notifier,
            timeout,
        })
    }

    /// Handle a `control_request` from the agent
    pub async fn handle_control_request(
        self: &Arc<Self>,
        session_id: &str,
        request: ControlRequest,
        agent: Arc<dyn AgentInput>,
    ) {
        self.structured_sessions.insert(session_id.to_string());

        if !request.is_can_use_tool() {
            tracing::warn!(
                session_id = %session_id,
                subtype = %request.subtype,
                "Unsupported control request"
            );
            let message = format!("Unsupported control request: {}", request.subtype);
            if let Err(e) = agent
                .send_json(&input::control_error(&request.request_id, &message))
                .await
            {
                tracing::debug!(session_id = %session_id, error = %e, "Could not reject control request");
            }
            return;
        }

        let tool_call_id = request.tool_call_id().to_string();
        let tool_name = request.tool_name.clone().unwrap_or_else(|| "unknown".to_string());

        self.open(
            Resolution {
                session_id: session_id.to_string(),
                tool_call_id,
                request_id: Some(request.request_id),
                tool_name,
                input: request.input,
                suggestions: request.permission_suggestions,
                agent: Some(agent),
                on_fallback_approval: None,
            },
            ConfirmationSource::Structured,
        );
    }

    /// Whether the fallback detector still applies to this session
    pub fn fallback_enabled(&self, session_id: &str) -> bool {
        !self.structured_sessions.contains(session_id)
    }

    /// Offer a confirmation synthesized from a detected denial
    ///
    /// Returns false when the fallback is disabled for the session or the same
    /// tool already has an open fallback confirmation.
    pub fn request_fallback(
        self: &Arc<Self>,
        session_id: &str,
        tool_call_id: Option<&str>,
        denial: &DetectedDenial,
        known_tool: Option<&str>,
        input: Value,
        on_approval: Option<FallbackApproval>,
    ) -> bool {
        if !self.fallback_enabled(session_id) {
            return false;
        }
        let Some(tool_name) = denial
            .tool_name
            .as_deref()
            .or(known_tool)
            .map(str::to_string)
        else {
            tracing::debug!(session_id = %session_id, text = %denial.text, "Denial without a tool name");
            return false;
        };

        let duplicate = self.pending.iter().any(|entry| {
            entry.key().0 == session_id
                && entry.value().request_id.is_none()
                && entry.value().tool_name == tool_name
        });
        if duplicate {
            return false;
        }

        let input = match (&denial.path, input) {
            (Some(path), Value::Null) => serde_json::json!({ "file_path": path }),
            (_, input) => input,
        };

        tracing::info!(
            session_id = %session_id,
            tool_name = %tool_name,
            "Fallback permission confirmation from agent text"
        );

        let tool_call_id = tool_call_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("fallback-{}", uuid::Uuid::new_v4()));
        self.open(
            Resolution {
                session_id: session_id.to_string(),
                tool_call_id,
                request_id: None,
                tool_name,
                input,
                suggestions: None,
                agent: None,
                on_fallback_approval: on_approval,
            },
            ConfirmationSource::Fallback,
        );
        true
    }

    fn open(self: &Arc<Self>, resolution: Resolution, source: ConfirmationSource) {
        let assessment = assess(&resolution.tool_name, &resolution.input);
        let key = (resolution.session_id.clone(), resolution.tool_call_id.clone());
        let (decision_tx, decision_rx) = oneshot::channel();

        let replaced = self.pending.insert(
            key.clone(),
            PendingConfirmation {
                request_id: resolution.request_id.clone(),
                tool_name: resolution.tool_name.clone(),
                input: resolution.input.clone(),
                suggestions: resolution.suggestions.clone(),
                created_at: Utc::now(),
                decision_tx,
            },
        );
        if let Some(old) = replaced {
            tracing::warn!(
                session_id = %key.0,
                tool_call_id = %key.1,
                "Replacing pending confirmation with the same key"
            );
            drop(old.decision_tx.send(Decision::Cancelled));
        }

        self.notifier.update(
            &resolution.session_id,
            SessionUpdate::ToolUse {
                tool_call_id: resolution.tool_call_id.clone(),
                tool_name: resolution.tool_name.clone(),
                title: assessment.title.clone(),
                kind: ToolKind::from_tool_name(&resolution.tool_name),
                input: resolution.input.clone(),
            },
        );
        self.notifier.update(
            &resolution.session_id,
            SessionUpdate::ConfirmationRequired {
                tool_call_id: resolution.tool_call_id.clone(),
                tool_name: resolution.tool_name.clone(),
                confirmation_type: assessment.confirmation_type,
                risk_level: assessment.risk_level,
                risk_reasons: assessment.reasons,
                title: assessment.title,
                input: resolution.input.clone(),
                suggestions: resolution.suggestions.clone(),
                source,
            },
        );

        tracing::info!(
            session_id = %key.0,
            tool_call_id = %key.1,
            tool_name = %resolution.tool_name,
            risk = ?assessment.risk_level,
            "Awaiting permission decision"
        );

        let broker = Arc::clone(self);
        tokio::spawn(async move {
            let decision = broker.await_decision(&key, decision_rx).await;
            broker.resolve(resolution, decision).await;
        });
    }

    async fn await_decision(&self, key: &Key, mut rx: oneshot::Receiver<Decision>) -> Decision {
        tokio::select! {
            decision = &mut rx => decision.unwrap_or(Decision::Cancelled),
            () = tokio::time::sleep(self.timeout) => {
                if self.pending.remove(key).is_some() {
                    tracing::warn!(
                        session_id = %key.0,
                        tool_call_id = %key.1,
                        timeout_secs = self.timeout.as_secs(),
                        "Permission request timed out, denying"
                    );
                    Decision::TimedOut
                } else {
                    // A decision was taken concurrently and is in flight
                    rx.await.unwrap_or(Decision::Cancelled)
                }
            }
        }
    }

    async fn resolve(&self, resolution: Resolution, decision: Decision) {
        let Resolution {
            session_id,
            tool_call_id,
            request_id,
            tool_name,
            input: tool_input,
            suggestions,
            agent,
            on_fallback_approval,
        } = resolution;

        let withdrawn = matches!(decision, Decision::Withdrawn);
        let deny_message = match decision {
            Decision::Allow {
                updated_input,
                always,
            } => {
                tracing::info!(session_id = %session_id, tool_call_id = %tool_call_id, always, "Permission granted");
                match (&request_id, &agent) {
                    (Some(request_id), Some(agent)) => {
                        let permissions = always
                            .then(|| suggestions.unwrap_or_else(|| input::session_allow_rule(&tool_name)));
                        let msg = input::permission_allow(
                            request_id,
                            updated_input.as_ref().unwrap_or(&tool_input),
                            permissions.as_ref(),
                        );
                        if let Err(e) = agent.send_json(&msg).await {
                            tracing::warn!(session_id = %session_id, error = %e, "Failed to deliver permission grant");
                        }
                    }
                    _ => {
                        self.fallback_allowed
                            .entry(session_id.clone())
                            .or_default()
                            .push(tool_name.clone());
                        if let Some(callback) = on_fallback_approval {
                            callback(tool_name);
                        }
                    }
                }
                return;
            }
            Decision::Deny { message } => message,
            Decision::TimedOut => TIMEOUT_MESSAGE.to_string(),
            Decision::Cancelled => CANCELLED_MESSAGE.to_string(),
            Decision::Withdrawn => WITHDRAWN_MESSAGE.to_string(),
        };

        tracing::info!(session_id = %session_id, tool_call_id = %tool_call_id, reason = %deny_message, "Permission denied");

        if let (Some(request_id), Some(agent)) = (&request_id, &agent) {
            if !withdrawn {
                let msg = input::permission_deny(request_id, &deny_message, true);
                if let Err(e) = agent.send_json(&msg).await {
                    tracing::debug!(session_id = %session_id, error = %e, "Failed to deliver permission denial");
                }
            }
        }

        self.notifier.update(
            &session_id,
            SessionUpdate::ToolResult {
                tool_call_id,
                tool_name: Some(tool_name),
                content: deny_message,
                is_error: true,
                synthetic: true,
            },
        );
    }

    /// Apply the client's decision
    ///
    /// Returns false (and does nothing else) for an unknown or already
    /// resolved confirmation.
    pub fn confirm(
        &self,
        session_id: &str,
        tool_call_id: &str,
        approved: bool,
        options: ConfirmOptions,
    ) -> bool {
        let key = (session_id.to_string(), tool_call_id.to_string());
        let Some((_, pending)) = self.pending.remove(&key) else {
            tracing::warn!(
                session_id = %session_id,
                tool_call_id = %tool_call_id,
                "Confirmation for unknown or resolved request ignored"
            );
            return false;
        };

        let decision = if approved {
            Decision::Allow {
                updated_input: options.updated_input,
                always: options.always_allow,
            }
        } else {
            Decision::Deny {
                message: options.message.unwrap_or_else(|| DENY_MESSAGE.to_string()),
            }
        };
        if pending.decision_tx.send(decision).is_err() {
            tracing::debug!(session_id = %session_id, tool_call_id = %tool_call_id, "Waiter already gone");
        }
        true
    }

    /// Resolve a request the agent withdrew
    pub fn withdraw(&self, session_id: &str, request_id: &str) {
        let key = self
            .pending
            .iter()
            .find(|e| e.key().0 == session_id && e.value().request_id.as_deref() == Some(request_id))
            .map(|e| e.key().clone());
        if let Some((_, pending)) = key.and_then(|k| self.pending.remove(&k)) {
            drop(pending.decision_tx.send(Decision::Withdrawn));
        }
    }

    /// Cancel every pending confirmation of a session
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let keys: Vec<Key> = self
            .pending
            .iter()
            .filter(|e| e.key().0 == session_id)
            .map(|e| e.key().clone())
            .collect();

        let mut cancelled = 0;
        for key in keys {
            if let Some((_, pending)) = self.pending.remove(&key) {
                drop(pending.decision_tx.send(Decision::Cancelled));
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!(session_id = %session_id, cancelled, "Cancelled pending confirmations");
        }
        cancelled
    }

    /// Drop all per-session state (on session delete)
    pub fn forget_session(&self, session_id: &str) {
        self.cancel_session(session_id);
        self.structured_sessions.remove(session_id);
        self.fallback_allowed.remove(session_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending confirmations of one session, oldest first
    pub fn pending_for(&self, session_id: &str) -> Vec<PendingSummary> {
        let mut items: Vec<PendingSummary> = self
            .pending
            .iter()
            .filter(|e| e.key().0 == session_id)
            .map(|e| PendingSummary {
                tool_call_id: e.key().1.clone(),
                tool_name: e.value().tool_name.clone(),
                input: e.value().input.clone(),
                source: if e.value().request_id.is_some() {
                    ConfirmationSource::Structured
                } else {
                    ConfirmationSource::Fallback
                },
                suggestions: e.value().suggestions.clone(),
                created_at: e.value().created_at,
            })
            .collect();
        items.sort_by_key(|p| p.created_at);
        items
    }

    /// Tools approved through the fallback path for a session
    pub fn fallback_allowed_tools(&self, session_id: &str) -> Vec<String> {
        self.fallback_allowed
            .get(session_id)
            .map(|tools| tools.clone())
            .unwrap_or_default()
    }
}
