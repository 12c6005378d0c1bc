//! Public types for the Claude Code bridge
//!
//! This module contains all the shared types used across the crate.

mod config;
mod error;
mod notification;
mod session;
mod tool;

pub use config::{AgentConfig, BridgeConfig, DEFAULT_MAX_PERSISTENT_SESSIONS, SessionTimeouts};
pub use error::{BridgeError, ErrorCode, Result};
pub use notification::{
    ClientNotification, CloseReason, ConfirmationSource, Notifier, SessionUpdate, StopReason,
};
pub use session::{SessionInfo, SessionMode, TokenUsage};
pub use tool::{ConfirmationType, FileChangeType, RiskLevel, ToolKind, ToolUseEntry};
