//! Session management
//!
//! This module handles:
//! - The session registry (create, list, rename, delete)
//! - One-shot turns (fresh agent process per prompt)
//! - Persistent sessions (state machine, idle timeout, crash recovery)
//! - The bounded persistent-session pool
//! - Token usage tracking

mod env;
mod events;
mod manager;
mod one_shot;
mod persistent;
mod pool;
#[allow(clippy::module_inception)]
mod session;
mod state;
mod usage;

pub use env::SessionEnv;
pub use events::{EventContext, Handled, RetryHook};
pub use manager::{DEFAULT_TITLE, SessionManager};
pub use one_shot::run_one_shot;
pub use persistent::{PersistentSession, SessionStatus};
pub use pool::{SessionPool, select_lru};
pub use session::Session;
pub use state::{CrashDecision, SendAction, SessionCore, SessionState, Transition, TurnOutcome};
pub use usage::UsageTracker;
