//! Tool permission confirmations
//!
//! The broker suspends a tool call until the client decides, the risk table
//! classifies what is being asked, and the fallback detector recognizes
//! denials from agents that never send structured requests.

mod broker;
mod fallback;
mod risk;

pub use broker::{ConfirmOptions, FallbackApproval, PendingSummary, PermissionBroker};
pub use fallback::{DetectedDenial, detect_denial};
pub use risk::{RiskAssessment, assess, assess_command, contains_shell_operator};
