//! Fatal error detection on agent stderr
//!
//! Some failures (missing credentials, a broken install) only show up as text
//! on stderr, sometimes with a zero exit code.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::BridgeError;

static AUTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(invalid api key|please run /login|not logged in|authentication (failed|required|error)|missing api key|ANTHROPIC_API_KEY is not set|\b401\b.*unauthorized)",
    )
    .expect("valid auth regex")
});

static NOT_FOUND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(command not found|cannot find module|ENOENT|no such file or directory.*claude)")
        .expect("valid not-found regex")
});

/// Fatal condition recognized on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrFatal {
    AuthRequired,
    BinaryNotFound,
}

impl StderrFatal {
    /// Machine code used in error notifications
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::BinaryNotFound => "binary_not_found",
        }
    }

    pub fn into_error(self, line: &str) -> BridgeError {
        match self {
            Self::AuthRequired => BridgeError::AuthRequired(line.trim().to_string()),
            Self::BinaryNotFound => BridgeError::preflight_failed(line.trim()),
        }
    }
}

/// Classify a single stderr line
pub fn classify_stderr_line(line: &str) -> Option<StderrFatal> {
    if AUTH_PATTERN.is_match(line) {
        Some(StderrFatal::AuthRequired)
    } else if NOT_FOUND_PATTERN.is_match(line) {
        Some(StderrFatal::BinaryNotFound)
    } else {
        None
    }
}

/// Per-process monitor that reports at most one fatal condition
#[derive(Debug, Default)]
pub struct StderrMonitor {
    reported: bool,
}

impl StderrMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a line; returns the fatal condition the first time one is seen
    pub fn inspect(&mut self, line: &str) -> Option<StderrFatal> {
        if self.reported {
            return None;
        }
        let fatal = classify_stderr_line(line)?;
        self.reported = true;
        Some(fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth() {
        assert_eq!(
            classify_stderr_line("Invalid API key · Please run /login"),
            Some(StderrFatal::AuthRequired)
        );
        assert_eq!(
            classify_stderr_line("Error: Authentication failed"),
            Some(StderrFatal::AuthRequired)
        );
    }

    #[test]
    fn test_classify_not_found() {
        assert_eq!(
            classify_stderr_line("sh: claude: command not found"),
            Some(StderrFatal::BinaryNotFound)
        );
        assert_eq!(
            classify_stderr_line("Error: Cannot find module '/usr/lib/node_modules/cli.js'"),
            Some(StderrFatal::BinaryNotFound)
        );
    }

    #[test]
    fn test_ordinary_lines_pass() {
        assert_eq!(classify_stderr_line("Loading MCP servers..."), None);
        assert_eq!(classify_stderr_line(""), None);
    }

    #[test]
    fn test_monitor_reports_once() {
        let mut monitor = StderrMonitor::new();
        assert_eq!(monitor.inspect("debug: starting"), None);
        assert_eq!(
            monitor.inspect("Invalid API key"),
            Some(StderrFatal::AuthRequired)
        );
        assert_eq!(monitor.inspect("Invalid API key"), None);
        assert_eq!(monitor.inspect("command not found"), None);
    }

    #[test]
    fn test_codes() {
        assert_eq!(StderrFatal::AuthRequired.code(), "auth_required");
        assert_eq!(StderrFatal::BinaryNotFound.code(), "binary_not_found");
        assert!(matches!(
            StderrFatal::AuthRequired.into_error("Invalid API key\n"),
            BridgeError::AuthRequired(msg) if msg == "Invalid API key"
        ));
    }
}
