//! Display titles for tool calls

use serde_json::Value;

fn str_input<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// File path a tool operates on (`file_path`, `path` or `notebook_path`)
pub fn tool_path(input: &Value) -> Option<&str> {
    str_input(input, "file_path")
        .or_else(|| str_input(input, "path"))
        .or_else(|| str_input(input, "notebook_path"))
}

/// Human-readable title for a tool call
pub fn tool_title(name: &str, input: &Value) -> String {
    match name {
        "Read" | "Edit" | "Write" | "MultiEdit" | "NotebookRead" | "NotebookEdit" => {
            let path = tool_path(input).unwrap_or("file");
            format!("{} {}", name, truncate_path(path))
        }
        "Bash" => str_input(input, "description")
            .map(String::from)
            .unwrap_or_else(|| {
                format!(
                    "Run: {}",
                    truncate_string(str_input(input, "command").unwrap_or(""), 50)
                )
            }),
        "Grep" => format!(
            "Search: {}",
            truncate_string(str_input(input, "pattern").unwrap_or(""), 40)
        ),
        "Glob" => format!(
            "Find: {}",
            truncate_string(str_input(input, "pattern").unwrap_or(""), 40)
        ),
        "WebFetch" => format!(
            "Fetch {}",
            truncate_string(str_input(input, "url").unwrap_or(""), 50)
        ),
        "WebSearch" => format!(
            "Search: {}",
            truncate_string(str_input(input, "query").unwrap_or(""), 40)
        ),
        "Task" => str_input(input, "description").unwrap_or("Task").to_string(),
        "TodoWrite" => "Update task list".to_string(),
        // MCP tools (format: mcp__server__tool)
        name if name.starts_with("mcp__") => {
            let tool = name.split("__").nth(2).unwrap_or(name);
            format!("MCP: {tool}")
        }
        _ => name.to_string(),
    }
}

/// Truncate a file path for display
fn truncate_path(path: &str) -> String {
    // Get just the filename if path is long
    if path.len() > 60 {
        std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .unwrap_or_else(|| truncate_string(path, 60))
    } else {
        path.to_string()
    }
}

/// Truncate a string to a maximum number of characters
fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_tool_titles() {
        assert_eq!(
            tool_title("Read", &json!({"file_path": "/path/to/file.rs"})),
            "Read /path/to/file.rs"
        );
        assert_eq!(tool_title("Write", &json!({"path": "a.txt"})), "Write a.txt");
    }

    #[test]
    fn test_bash_title_prefers_description() {
        let input = json!({"command": "cargo build", "description": "Build the project"});
        assert_eq!(tool_title("Bash", &input), "Build the project");
        assert!(tool_title("Bash", &json!({"command": "cargo test"})).starts_with("Run:"));
    }

    #[test]
    fn test_mcp_title() {
        assert_eq!(tool_title("mcp__server__custom_tool", &json!({})), "MCP: custom_tool");
    }

    #[test]
    fn test_truncate_long_path() {
        let long_path = "/very/long/path/to/some/deeply/nested/directory/structure/file.rs";
        assert_eq!(truncate_path(long_path), "file.rs");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("this is a longer string", 10), "this is...");
        assert_eq!(truncate_string("ééééééééééé", 5), "éé...");
    }
}
