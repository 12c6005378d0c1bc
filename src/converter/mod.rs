//! Conversion of agent events into client updates
//!
//! This module handles:
//! - Agent `AgentEvent` → client `SessionUpdate`
//! - File-editing tool inputs → proposed `fileChange` diffs

mod diff;
mod notification;
mod tool;

pub use diff::{ProposedChange, is_file_edit_tool, propose_change, unified_diff};
pub use notification::NotificationConverter;
pub use tool::{tool_path, tool_title};
