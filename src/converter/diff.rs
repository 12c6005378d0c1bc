//! Proposed file changes for file-editing tools
//!
//! The agent announces a Write/Edit before executing it. The proposed content
//! is diffed against what is on disk now so the client can render the change.

use std::path::{Path, PathBuf};

use serde_json::Value;
use similar::TextDiff;

use super::tool::tool_path;
use crate::types::FileChangeType;

const CONTEXT_LINES: usize = 3;

/// A change a tool is about to make
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedChange {
    /// Path as given in the tool input
    pub path: String,
    pub change_type: FileChangeType,
    /// Whether the file existed when the change was proposed
    pub existed: bool,
    /// Unified diff, current contents to proposed contents
    pub diff: String,
}

/// Whether the tool edits files
pub fn is_file_edit_tool(name: &str) -> bool {
    matches!(name, "Write" | "Edit" | "MultiEdit")
}

/// Unified diff between two texts
pub fn unified_diff(old: &str, new: &str, path: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn apply_edit(content: &str, edit: &Value) -> Option<String> {
    let old = edit.get("old_string").and_then(Value::as_str)?;
    let new = edit.get("new_string").and_then(Value::as_str)?;
    if old.is_empty() {
        return Some(format!("{}{}", content, new));
    }
    if !content.contains(old) {
        return None;
    }
    let replace_all = edit
        .get("replace_all")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some(if replace_all {
        content.replace(old, new)
    } else {
        content.replacen(old, new, 1)
    })
}

/// Compute the change a file-editing tool call proposes
///
/// Returns `None` for other tools, inputs without a path, or edits whose
/// `old_string` does not occur in the file.
pub fn propose_change(tool_name: &str, input: &Value, cwd: &Path) -> Option<ProposedChange> {
    if !is_file_edit_tool(tool_name) {
        return None;
    }
    let path = tool_path(input)?;
    let current = std::fs::read_to_string(resolve(cwd, path)).ok();
    let existed = current.is_some();
    let old = current.unwrap_or_default();

    let new = match tool_name {
        "Write" => input
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        "Edit" => apply_edit(&old, input)?,
        _ => {
            let edits = input.get("edits").and_then(Value::as_array)?;
            let mut content = old.clone();
            for edit in edits {
                content = apply_edit(&content, edit)?;
            }
            content
        }
    };

    Some(ProposedChange {
        path: path.to_string(),
        change_type: if existed {
            FileChangeType::Modified
        } else {
            FileChangeType::Created
        },
        existed,
        diff: unified_diff(&old, &new, path),
    })
}
