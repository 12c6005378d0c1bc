//! Claude Code Bridge
//!
//! A JSON-RPC 2.0 bridge that lets an editor-side client drive Claude agent
//! processes speaking the `stream-json` protocol over stdio.
//!
//! ## Features
//!
//! - One-shot turns (a fresh agent process per prompt, resumed by id)
//! - Persistent sessions with idle timeout, health checks and crash recovery
//! - A bounded pool of persistent sessions with LRU eviction
//! - Interactive tool permissions with risk assessment and proposed diffs
//! - Forwarding of editor and permission-rule requests back to the client
//!
//! ## Quick Start
//!
//! ```no_run
//! use claude_code_bridge::{Cli, run_bridge_with_cli};
//! use futures::FutureExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_bridge_with_cli(&Cli::default(), tokio::signal::ctrl_c().map(drop)).await
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `CLAUDE_CODE_PATH`: Agent binary (otherwise the usual install locations, then `PATH`)
//! - `ANTHROPIC_BASE_URL`: Custom API base URL
//! - `ANTHROPIC_API_KEY`: API key (preferred)
//! - `ANTHROPIC_AUTH_TOKEN`: Auth token (legacy, fallback)
//! - `ANTHROPIC_MODEL`: Model passed to the agent
//! - `ANTHROPIC_SMALL_FAST_MODEL`: Fallback model passed to the agent
//! - `MAX_THINKING_TOKENS`: Thinking budget forwarded to the agent
//! - `BRIDGE_MAX_PERSISTENT_SESSIONS`: Pool capacity (default 3)

pub mod agent;
pub mod cli;
pub mod converter;
pub mod permissions;
pub mod process;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod stream;
pub mod tracing;
pub mod types;

pub use agent::{Bridge, build_router, run_bridge_with_cli, serve, shutdown_otel};
pub use cli::Cli;
pub use types::{BridgeConfig, BridgeError, Result};
