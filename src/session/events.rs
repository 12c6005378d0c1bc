//! Per-process event handling shared by one-shot and persistent sessions
//!
//! Routes each [`ProcessEvent`] to the converter (client updates), the
//! permission broker (control requests, fallback denials) and the notifier.
//! Events that change session state are handed back to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::converter::NotificationConverter;
use crate::permissions::{FallbackApproval, PermissionBroker, detect_denial};
use crate::process::{AgentInput, AgentProcess, ProcessEvent, ProcessExit};
use crate::protocol::{AgentEvent, ContentBlock, TurnResult};
use crate::types::{BridgeError, Notifier, SessionUpdate, TokenUsage};

/// Sends a retry message after a fallback approval
pub type RetryHook = Arc<dyn Fn(String) + Send + Sync>;

/// Events the session itself must act on
#[derive(Debug)]
pub enum Handled {
    /// Fully handled here
    Forwarded,
    /// `system/init`, with the agent's conversation id
    Init(Option<String>),
    /// Terminal turn result
    Result(TurnResult),
    /// Fatal stderr condition (already reported to the client)
    Fatal(BridgeError),
    /// Process is gone
    Exited(ProcessExit),
}

/// Event context for one session, reused across its processes
pub struct EventContext {
    session_id: String,
    converter: NotificationConverter,
    broker: Arc<PermissionBroker>,
    notifier: Arc<dyn Notifier>,
    retry: Option<RetryHook>,
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("session_id", &self.session_id)
            .field("retry", &self.retry.is_some())
            .finish_non_exhaustive()
    }
}

impl EventContext {
    pub fn new(
        session_id: impl Into<String>,
        cwd: PathBuf,
        broker: Arc<PermissionBroker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            converter: NotificationConverter::new(cwd),
            broker,
            notifier,
            retry: None,
        }
    }

    /// Install the fallback retry hook (persistent sessions only)
    pub fn with_retry(mut self, retry: RetryHook) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn notify(&self, update: SessionUpdate) {
        self.notifier.update(&self.session_id, update);
    }

    /// Tool-use correlation does not survive a process
    pub fn reset(&mut self) {
        self.converter.clear_cache();
    }

    pub async fn handle(&mut self, event: ProcessEvent, process: &Arc<AgentProcess>) -> Handled {
        match event {
            ProcessEvent::Agent(event) => self.handle_agent(event, process).await,
            ProcessEvent::ParseError { raw, error } => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %error,
                    raw_len = raw.len(),
                    "Dropped malformed agent output"
                );
                Handled::Forwarded
            }
            ProcessEvent::Stderr(line) => {
                self.check_denial(None, &line);
                Handled::Forwarded
            }
            ProcessEvent::Fatal { fatal, line } => {
                self.notify(SessionUpdate::error(fatal.code(), line.clone()));
                Handled::Fatal(fatal.into_error(&line))
            }
            ProcessEvent::Exited(exit) => Handled::Exited(exit),
        }
    }

    async fn handle_agent(&mut self, event: AgentEvent, process: &Arc<AgentProcess>) -> Handled {
        match event {
            AgentEvent::ControlRequest(request) => {
                let agent: Arc<dyn AgentInput> = process.clone();
                self.broker
                    .handle_control_request(&self.session_id, request, agent)
                    .await;
                Handled::Forwarded
            }
            AgentEvent::ControlCancel { request_id } => {
                self.broker.withdraw(&self.session_id, &request_id);
                Handled::Forwarded
            }
            AgentEvent::Result(result) => Handled::Result(result),
            AgentEvent::Ignored { kind } => {
                tracing::trace!(session_id = %self.session_id, kind = %kind, "Ignored agent event");
                Handled::Forwarded
            }
            event => {
                // Denials are matched before the converter drops the tool-use entry
                self.scan_tool_results(&event);
                for update in self.converter.convert(&event, &self.session_id) {
                    self.notify(update);
                }
                match event {
                    AgentEvent::Init { session_id, .. } => Handled::Init(session_id),
                    _ => Handled::Forwarded,
                }
            }
        }
    }

    fn scan_tool_results(&self, event: &AgentEvent) {
        let errors: Vec<(&str, &str)> = match event {
            AgentEvent::ToolResults(results) => results
                .iter()
                .filter(|r| r.is_error)
                .map(|r| (r.tool_use_id.as_str(), r.content.as_str()))
                .collect(),
            AgentEvent::Assistant { blocks } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult(r) if r.is_error => {
                        Some((r.tool_use_id.as_str(), r.content.as_str()))
                    }
                    _ => None,
                })
                .collect(),
            _ => return,
        };
        for (tool_use_id, content) in errors {
            self.check_denial(Some(tool_use_id), content);
        }
    }

    fn check_denial(&self, tool_use_id: Option<&str>, text: &str) {
        if !self.broker.fallback_enabled(&self.session_id) {
            return;
        }
        let Some(denial) = detect_denial(text) else {
            return;
        };
        let entry = tool_use_id.and_then(|id| self.converter.get_tool_use(id));
        let known_tool = entry.map(|e| e.name.as_str());
        let input = entry.map(|e| e.input.clone()).unwrap_or(Value::Null);
        let on_approval = self.retry.clone().map(|retry| {
            let approval: FallbackApproval = Box::new(move |tool| retry(tool));
            approval
        });

        let opened = self.broker.request_fallback(
            &self.session_id,
            tool_use_id,
            &denial,
            known_tool,
            input,
            on_approval,
        );
        if opened {
            tracing::info!(
                session_id = %self.session_id,
                tool = ?denial.tool_name.as_deref().or(known_tool),
                "Permission denial detected in agent output"
            );
        }
    }

    /// Report a finished turn: usage then the closing updates
    pub fn report_result(&self, result: &TurnResult, total: Option<TokenUsage>) {
        if let (Some(turn), Some(total)) = (result.usage, total) {
            self.notify(SessionUpdate::Usage { turn, total });
        }
        for update in NotificationConverter::turn_complete(result) {
            self.notify(update);
        }
    }
}
