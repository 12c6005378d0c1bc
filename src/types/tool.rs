//! Tool-related types for client notifications

use serde::{Deserialize, Serialize};

/// Tool kind for categorizing tools in UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// File read operations
    Read,
    /// File edit/write operations
    Edit,
    /// File deletion
    Delete,
    /// Command execution
    Execute,
    /// Search operations (grep, glob)
    Search,
    /// Network fetch operations
    Fetch,
    /// Thinking/planning operations
    Think,
    /// Tools served by an external MCP server
    Mcp,
    /// Other/unknown tool types
    #[default]
    Other,
}

impl ToolKind {
    /// Categorize a tool by name
    pub fn from_tool_name(name: &str) -> Self {
        if name.starts_with("mcp__") {
            return Self::Mcp;
        }
        match name {
            "Read" | "NotebookRead" => Self::Read,
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => Self::Edit,
            "Delete" => Self::Delete,
            "Bash" | "BashOutput" | "KillShell" | "KillBash" => Self::Execute,
            "Grep" | "Glob" | "LS" => Self::Search,
            "WebFetch" | "WebSearch" => Self::Fetch,
            "Task" | "TodoWrite" | "ExitPlanMode" => Self::Think,
            _ => Self::Other,
        }
    }
}

/// Category of a permission confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationType {
    /// Shell command execution
    Bash,
    /// File creation or modification
    FileWrite,
    /// File deletion
    FileDelete,
    /// Call into an external (MCP) tool
    Mcp,
    /// Anything else that asked for permission
    Dangerous,
}

/// Derived risk of a confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Kind of change a file-editing tool proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeType {
    Created,
    Modified,
    Deleted,
}

/// Cached tool use, correlated with its result later
#[derive(Debug, Clone)]
pub struct ToolUseEntry {
    /// Tool use id assigned by the agent
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool input
    pub input: serde_json::Value,
}

impl ToolUseEntry {
    /// Create a new entry
    pub fn new(id: String, name: String, input: serde_json::Value) -> Self {
        Self { id, name, input }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_kind_from_name() {
        assert_eq!(ToolKind::from_tool_name("Read"), ToolKind::Read);
        assert_eq!(ToolKind::from_tool_name("Write"), ToolKind::Edit);
        assert_eq!(ToolKind::from_tool_name("Bash"), ToolKind::Execute);
        assert_eq!(ToolKind::from_tool_name("Glob"), ToolKind::Search);
        assert_eq!(ToolKind::from_tool_name("mcp__github__create_pr"), ToolKind::Mcp);
        assert_eq!(ToolKind::from_tool_name("Whatever"), ToolKind::Other);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_value(ConfirmationType::FileWrite).unwrap(),
            "file_write"
        );
        assert_eq!(serde_json::to_value(ConfirmationType::Bash).unwrap(), "bash");
        assert_eq!(serde_json::to_value(RiskLevel::High).unwrap(), "high");
        assert_eq!(
            serde_json::to_value(FileChangeType::Created).unwrap(),
            "created"
        );
    }

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }
}
