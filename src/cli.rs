//! Command-line interface definitions
//!
//! Provides CLI argument parsing using clap for the Claude Code bridge.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::types::{AgentConfig, BridgeConfig, DEFAULT_MAX_PERSISTENT_SESSIONS, SessionMode};

const SERVICE_NAME: &str = "claude-code-bridge";

fn parse_mode(s: &str) -> Result<SessionMode, String> {
    SessionMode::parse(s).ok_or_else(|| format!("expected 'one-shot' or 'persistent', got '{s}'"))
}

/// Claude Code bridge - drive Claude agent processes over JSON-RPC on stdio
#[derive(Parser, Debug, Clone)]
#[command(name = "claude-code-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable diagnostic mode (auto-log to temp file)
    #[arg(short, long)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long)]
    pub quiet: bool,

    /// OpenTelemetry OTLP endpoint (e.g., http://localhost:4317)
    /// Accepted but ignored when built without the otel feature.
    #[arg(long, value_name = "URL", env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    /// OpenTelemetry service name
    #[arg(long, value_name = "NAME", default_value = SERVICE_NAME)]
    pub otel_service_name: String,

    /// Agent binary to run instead of searching the usual install locations
    #[arg(long, value_name = "PATH", env = "CLAUDE_CODE_PATH")]
    pub agent_path: Option<PathBuf>,

    /// Workspace root for sessions created without a cwd
    #[arg(short = 'w', long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Maximum number of live persistent sessions
    #[arg(
        long,
        value_name = "N",
        env = "BRIDGE_MAX_PERSISTENT_SESSIONS",
        default_value_t = DEFAULT_MAX_PERSISTENT_SESSIONS
    )]
    pub max_sessions: usize,

    /// Seconds of inactivity before a persistent session is stopped
    #[arg(long, value_name = "SECS", default_value_t = 1800)]
    pub idle_timeout_secs: u64,

    /// Mode used when a prompt does not name one (one-shot | persistent)
    #[arg(long, value_name = "MODE", default_value = "one-shot", value_parser = parse_mode)]
    pub default_mode: SessionMode,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            diagnostic: false,
            log_dir: None,
            log_file: None,
            verbose: 0,
            quiet: false,
            otel_endpoint: None,
            otel_service_name: SERVICE_NAME.to_string(),
            agent_path: None,
            workspace: None,
            max_sessions: DEFAULT_MAX_PERSISTENT_SESSIONS,
            idle_timeout_secs: 1800,
            default_mode: SessionMode::OneShot,
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    ///
    /// Returns true if `--diagnostic` is set, or if `--log-dir` or `--log-file` is specified.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Check if OpenTelemetry tracing is enabled
    #[cfg(feature = "otel")]
    pub fn is_otel_enabled(&self) -> bool {
        self.otel_endpoint.is_some()
    }

    /// Always false without the otel feature
    #[cfg(not(feature = "otel"))]
    pub fn is_otel_enabled(&self) -> bool {
        if self.otel_endpoint.is_some() {
            tracing::warn!("--otel-endpoint specified but otel feature is not enabled, ignoring");
        }
        false
    }

    /// Get the log level based on CLI arguments
    ///
    /// - `--quiet`: ERROR
    /// - default: INFO
    /// - `-v`: DEBUG
    /// - `-vv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Defaults to `claude-code-bridge-{timestamp}.log` in the system temp directory.
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("{SERVICE_NAME}-{timestamp}.log")
        });

        dir.join(filename)
    }

    /// Bridge configuration: environment first, then these flags on top
    pub fn to_config(&self) -> BridgeConfig {
        self.apply(BridgeConfig {
            agent: AgentConfig::from_env(),
            ..BridgeConfig::default()
        })
    }

    fn apply(&self, mut config: BridgeConfig) -> BridgeConfig {
        if let Some(path) = &self.agent_path {
            config.agent.agent_path = Some(path.clone());
        }
        if let Some(workspace) = &self.workspace {
            config.workspace_root = workspace.clone();
        }
        config.max_persistent_sessions = self.max_sessions;
        config.timeouts.idle = Duration::from_secs(self.idle_timeout_secs);
        config.default_mode = self.default_mode;
        config
    }
}
