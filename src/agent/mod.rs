//! Bridge agent
//!
//! This module provides the bridge core that handles:
//! - JSON-RPC requests from the client (sessions, prompts, permissions)
//! - Wiring of the session registry, pool and permission broker
//! - Logging setup and the stdio server loop

mod core;
mod handlers;
mod runner;

pub use core::Bridge;
pub use handlers::{
    ConfirmParams, CreateSessionParams, InitializeResponse, PromptParams, PromptResponse,
    RenameSessionParams, SessionIdParams, SetResumeIdParams, build_router,
};
pub use runner::{run_bridge_with_cli, serve, shutdown_otel};
