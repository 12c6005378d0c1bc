//! Agent subprocess management
//!
//! Binary resolution and preflight, command construction, and the
//! [`AgentProcess`] handle that turns one OS process into an ordered stream of
//! [`ProcessEvent`]s.

mod agent_process;
mod command;
pub mod preflight;
mod stderr;
mod wrapped_child;

pub use agent_process::{AgentInput, AgentProcess, ProcessEvent};
pub use command::{AgentCommand, BASE_ARGS, SpawnOptions};
pub use preflight::{CheckStatus, PreflightCheck, environment_check, preflight};
pub use stderr::{StderrFatal, StderrMonitor, classify_stderr_line};
pub use wrapped_child::{ProcessExit, WrappedChild};
