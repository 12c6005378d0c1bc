//! Heuristic permission-denial detection
//!
//! Agents that never send structured `can_use_tool` requests still refuse
//! tools they were not allowed to use, and say so in plain text (in a tool
//! result or on stderr). This recognizes those phrasings well enough to offer
//! the user an equivalent confirmation. It is a heuristic: wording changes in
//! the agent break it, and it is switched off for a session as soon as a
//! structured request is observed.

use once_cell::sync::Lazy;
use regex::Regex;

/// "Claude requested permissions to use Bash, but you haven't granted it yet."
static REQUESTED_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)requested permissions? to use ([A-Za-z_][\w:-]*)")
        .expect("valid fallback pattern")
});

/// "Claude requested permissions to write to /tmp/a.txt, but ..."
static REQUESTED_WRITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)requested permissions? to (write to|edit|create|read) (\S+?)[,.]?(\s|$)")
        .expect("valid fallback pattern")
});

/// "Permission to use Bash has been denied" / "Permission denied for tool Bash"
static DENIED_TOOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)permission (to use ([A-Za-z_][\w:-]*) (has been|was) denied|denied for tool ([A-Za-z_][\w:-]*))",
    )
    .expect("valid fallback pattern")
});

static GENERIC_DENIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(haven't granted it yet|has not been granted|requires (your )?approval)")
        .expect("valid fallback pattern")
});

/// A denial recognized in agent text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDenial {
    /// Tool that was refused, when the text names it
    pub tool_name: Option<String>,
    /// File path the refused action targeted
    pub path: Option<String>,
    /// The line that matched
    pub text: String,
}

fn write_tool_for(verb: &str) -> &'static str {
    match verb.to_ascii_lowercase().as_str() {
        "edit" => "Edit",
        "read" => "Read",
        _ => "Write",
    }
}

/// Look for a permission denial in a piece of agent text
pub fn detect_denial(text: &str) -> Option<DetectedDenial> {
    let line = text
        .lines()
        .find(|l| {
            REQUESTED_USE.is_match(l)
                || REQUESTED_WRITE.is_match(l)
                || DENIED_TOOL.is_match(l)
                || GENERIC_DENIAL.is_match(l)
        })?
        .trim()
        .to_string();

    if let Some(caps) = REQUESTED_WRITE.captures(&line) {
        return Some(DetectedDenial {
            tool_name: Some(write_tool_for(&caps[1]).to_string()),
            path: Some(caps[2].to_string()),
            text: line.clone(),
        });
    }
    if let Some(caps) = REQUESTED_USE.captures(&line) {
        return Some(DetectedDenial {
            tool_name: Some(caps[1].trim_end_matches([',', '.']).to_string()),
            path: None,
            text: line.clone(),
        });
    }
    if let Some(caps) = DENIED_TOOL.captures(&line) {
        let tool = caps.get(2).or_else(|| caps.get(4)).map(|m| m.as_str().to_string());
        return Some(DetectedDenial {
            tool_name: tool,
            path: None,
            text: line.clone(),
        });
    }
    Some(DetectedDenial {
        tool_name: None,
        path: None,
        text: line,
    })
}
