//! Agent command line construction

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;

use crate::types::AgentConfig;

/// Flags passed to every agent invocation
pub const BASE_ARGS: &[&str] = &[
    "--print",
    "--verbose",
    "--input-format",
    "stream-json",
    "--output-format",
    "stream-json",
    "--include-partial-messages",
    "--permission-prompt-tool",
    "stdio",
];

/// Per-spawn options
///
/// Deserialized from the `options` object of `session/prompt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpawnOptions {
    /// Model override; falls back to `ANTHROPIC_MODEL`
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    /// `default`, `acceptEdits`, `plan` or `bypassPermissions`
    pub permission_mode: Option<String>,
    pub append_system_prompt: Option<String>,
    /// Path to an MCP server config file
    pub mcp_config: Option<PathBuf>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    /// Extra writable directories
    pub add_dirs: Vec<PathBuf>,
    /// Agent conversation id to resume
    pub resume: Option<String>,
    /// Continue the most recent conversation in the cwd
    #[serde(rename = "continue")]
    pub continue_conversation: bool,
}

impl SpawnOptions {
    /// Parse from optional JSON params
    pub fn from_value(value: Option<&serde_json::Value>) -> crate::types::Result<Self> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| crate::types::BridgeError::invalid_params(format!("options: {}", e))),
        }
    }

    /// Add tools to the allow list, skipping duplicates
    pub fn allow_tools<I: IntoIterator<Item = String>>(&mut self, tools: I) {
        for tool in tools {
            if !self.allowed_tools.contains(&tool) {
                self.allowed_tools.push(tool);
            }
        }
    }

    /// Build the agent argument list
    pub fn to_args(&self, config: &AgentConfig) -> Vec<String> {
        let mut args: Vec<String> = BASE_ARGS.iter().map(|s| (*s).to_string()).collect();

        let model = self.model.as_ref().or(config.model.as_ref());
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        let fallback = self.fallback_model.as_ref().or(config.fallback_model.as_ref());
        // The agent rejects a fallback identical to the main model
        if let Some(fallback) = fallback.filter(|f| Some(*f) != model) {
            args.push("--fallback-model".to_string());
            args.push(fallback.clone());
        }
        if let Some(mode) = &self.permission_mode {
            args.push("--permission-mode".to_string());
            args.push(mode.clone());
        }
        if let Some(prompt) = &self.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }
        if let Some(path) = &self.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(path.display().to_string());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if !self.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(self.disallowed_tools.join(","));
        }
        for dir in &self.add_dirs {
            args.push("--add-dir".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(id) = &self.resume {
            args.push("--resume".to_string());
            args.push(id.clone());
        } else if self.continue_conversation {
            args.push("--continue".to_string());
        }

        args
    }
}

/// Fully resolved agent invocation
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

impl AgentCommand {
    pub fn new(program: &Path, cwd: &Path, options: &SpawnOptions, config: &AgentConfig) -> Self {
        Self {
            program: program.to_path_buf(),
            args: options.to_args(config),
            cwd: cwd.to_path_buf(),
            env: config.to_env_vars(),
        }
    }

    /// Tokio command with all three standard streams piped
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}
