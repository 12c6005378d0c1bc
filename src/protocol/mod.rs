//! Agent stream-json protocol
//!
//! Events read from the agent's stdout and messages written to its stdin.

mod events;
pub mod input;

pub use events::{
    AgentEvent, ContentBlock, ContentDelta, ControlRequest, ToolResultBlock, TurnResult,
    flatten_content, normalize,
};
