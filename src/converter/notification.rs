//! Agent event to client update conversion
//!
//! Converts classified agent events (assistant content, tool results, stream
//! deltas, results) into `session/update` payloads for the client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::protocol::{AgentEvent, ContentBlock, ContentDelta, ToolResultBlock, TurnResult};
use crate::types::{SessionUpdate, StopReason, ToolKind, ToolUseEntry};

use super::diff::propose_change;
use super::tool::tool_title;

/// Per-session converter
///
/// Maintains a cache of tool uses to correlate tool_use blocks with their results.
#[derive(Debug)]
pub struct NotificationConverter {
    /// Cache of tool use entries, keyed by tool_use_id
    tool_use_cache: HashMap<String, ToolUseEntry>,
    /// Working directory for resolving relative tool paths
    cwd: PathBuf,
}

impl NotificationConverter {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            tool_use_cache: HashMap::new(),
            cwd,
        }
    }

    /// Convert one agent event into zero or more updates
    pub fn convert(&mut self, event: &AgentEvent, session_id: &str) -> Vec<SessionUpdate> {
        let start_time = Instant::now();

        let updates = match event {
            AgentEvent::Init {
                session_id: Some(agent_session_id),
                ..
            } => vec![SessionUpdate::AgentSessionBound {
                agent_session_id: agent_session_id.clone(),
            }],
            AgentEvent::Assistant { blocks } => {
                let mut updates = Vec::new();
                for block in blocks {
                    self.convert_block(block, &mut updates);
                }
                updates
            }
            AgentEvent::ToolResults(results) => results
                .iter()
                .map(|result| self.make_tool_result(result))
                .collect(),
            AgentEvent::Delta { delta, .. } => match delta {
                ContentDelta::Text(text) => {
                    vec![SessionUpdate::AgentMessageChunk { text: text.clone() }]
                }
                ContentDelta::Thinking(text) => {
                    vec![SessionUpdate::AgentThoughtChunk { text: text.clone() }]
                }
                // Tool input is reported whole with the assistant message
                ContentDelta::InputJson(_) => vec![],
            },
            // Results need session totals and are built by the session
            _ => vec![],
        };

        tracing::trace!(
            session_id = %session_id,
            kind = event.kind(),
            output_count = updates.len(),
            conversion_duration_us = start_time.elapsed().as_micros(),
            "Event conversion completed"
        );

        updates
    }

    fn convert_block(&mut self, block: &ContentBlock, updates: &mut Vec<SessionUpdate>) {
        match block {
            ContentBlock::Text { text } => {
                updates.push(SessionUpdate::AgentMessage { text: text.clone() });
            }
            ContentBlock::Thinking { thinking } => {
                updates.push(SessionUpdate::AgentThought {
                    text: thinking.clone(),
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                self.tool_use_cache.insert(
                    id.clone(),
                    ToolUseEntry::new(id.clone(), name.clone(), input.clone()),
                );
                updates.push(SessionUpdate::ToolUse {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    title: tool_title(name, input),
                    kind: ToolKind::from_tool_name(name),
                    input: input.clone(),
                });
                // The proposed change goes right after the tool use it belongs to
                if let Some(change) = propose_change(name, input, &self.cwd) {
                    updates.push(SessionUpdate::FileChange {
                        tool_call_id: id.clone(),
                        path: change.path,
                        change_type: change.change_type,
                        proposed: true,
                        existed: change.existed,
                        diff: change.diff,
                    });
                }
            }
            ContentBlock::ToolResult(result) => updates.push(self.make_tool_result(result)),
        }
    }

    fn make_tool_result(&mut self, result: &ToolResultBlock) -> SessionUpdate {
        let tool_name = self
            .tool_use_cache
            .remove(&result.tool_use_id)
            .map(|entry| entry.name);
        SessionUpdate::ToolResult {
            tool_call_id: result.tool_use_id.clone(),
            tool_name,
            content: result.content.clone(),
            is_error: result.is_error,
            synthetic: false,
        }
    }

    /// Get a cached tool use entry
    pub fn get_tool_use(&self, tool_use_id: &str) -> Option<&ToolUseEntry> {
        self.tool_use_cache.get(tool_use_id)
    }

    /// Clear all cached tool uses
    pub fn clear_cache(&mut self) {
        self.tool_use_cache.clear();
    }

    /// Updates closing a turn: an error (when the result is one) then `turnComplete`
    pub fn turn_complete(result: &TurnResult) -> Vec<SessionUpdate> {
        let stop_reason = StopReason::from_result_subtype(&result.subtype, result.is_error);
        let mut updates = Vec::new();
        if result.is_error || stop_reason == StopReason::Error {
            updates.push(SessionUpdate::error(
                result.subtype.clone(),
                result
                    .result
                    .clone()
                    .unwrap_or_else(|| format!("Agent turn ended with {}", result.subtype)),
            ));
        }
        updates.push(SessionUpdate::TurnComplete {
            stop_reason,
            is_error: result.is_error,
            result: result.result.clone(),
            duration_ms: result.duration_ms,
            cost_usd: result.total_cost_usd,
        });
        updates
    }
}
