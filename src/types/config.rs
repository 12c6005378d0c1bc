//! Bridge configuration from environment variables and CLI flags

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::session::SessionMode;

/// Default maximum number of live persistent sessions
pub const DEFAULT_MAX_PERSISTENT_SESSIONS: usize = 3;

/// Agent configuration loaded from environment variables
///
/// Values here are forwarded to every spawned agent process, either as
/// environment variables or as CLI flags.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Anthropic API base URL
    /// Environment variable: `ANTHROPIC_BASE_URL`
    pub base_url: Option<String>,

    /// API key for authentication
    /// Environment variable: `ANTHROPIC_API_KEY` (preferred) or `ANTHROPIC_AUTH_TOKEN` (legacy)
    pub api_key: Option<String>,

    /// Primary model name
    /// Environment variable: `ANTHROPIC_MODEL`
    pub model: Option<String>,

    /// Fallback model used when the primary is overloaded
    /// Environment variable: `ANTHROPIC_SMALL_FAST_MODEL`
    pub fallback_model: Option<String>,

    /// Maximum tokens for thinking blocks (extended thinking mode)
    /// Environment variable: `MAX_THINKING_TOKENS`
    pub max_thinking_tokens: Option<u32>,

    /// Explicit agent binary path
    /// Environment variable: `CLAUDE_CODE_PATH`
    pub agent_path: Option<PathBuf>,
}

impl AgentConfig {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        // Prefer ANTHROPIC_API_KEY, fallback to ANTHROPIC_AUTH_TOKEN for compatibility
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .or_else(|| std::env::var("ANTHROPIC_AUTH_TOKEN").ok());

        let max_thinking_tokens = std::env::var("MAX_THINKING_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        Self {
            base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
            api_key,
            model: std::env::var("ANTHROPIC_MODEL").ok(),
            fallback_model: std::env::var("ANTHROPIC_SMALL_FAST_MODEL").ok(),
            max_thinking_tokens,
            agent_path: std::env::var_os("CLAUDE_CODE_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }


    /// Environment variables to pass to the agent process
    pub fn to_env_vars(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();

        if let Some(ref url) = self.base_url {
            env.insert("ANTHROPIC_BASE_URL".to_string(), url.clone());
        }
        if let Some(ref key) = self.api_key {
            env.insert("ANTHROPIC_API_KEY".to_string(), key.clone());
        }
        if let Some(tokens) = self.max_thinking_tokens {
            env.insert("MAX_THINKING_TOKENS".to_string(), tokens.to_string());
        }

        env
    }
}

/// Timeouts used by sessions, the permission broker and the router
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    /// Wait for the agent's `system/init` event
    pub init: Duration,
    /// Wait for a human permission decision before auto-deny
    pub permission: Duration,
    /// Wait for the client to answer a server-initiated request
    pub client_request: Duration,
    /// Inactivity before a persistent session is stopped
    pub idle: Duration,
    /// Interval between process liveness checks
    pub health_check: Duration,
    /// Delay before re-spawning a crashed persistent session
    pub crash_backoff: Duration,
    /// Crash retries allowed before the session is abandoned
    pub max_crash_retries: u32,
    /// Grace period between SIGTERM and SIGKILL
    pub stop_grace: Duration,
    /// Timeout for the `--version` preflight query
    pub version_check: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(30),
            permission: Duration::from_secs(10 * 60),
            client_request: Duration::from_secs(30),
            idle: Duration::from_secs(30 * 60),
            health_check: Duration::from_secs(60),
            crash_backoff: Duration::from_secs(2),
            max_crash_retries: 2,
            stop_grace: Duration::from_secs(5),
            version_check: Duration::from_secs(10),
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Agent settings from the environment
    pub agent: AgentConfig,
    /// Timeouts
    pub timeouts: SessionTimeouts,
    /// Workspace root used when a session does not name a cwd
    pub workspace_root: PathBuf,
    /// Maximum number of live persistent sessions
    pub max_persistent_sessions: usize,
    /// Mode used when `session/prompt` does not specify one
    pub default_mode: SessionMode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            timeouts: SessionTimeouts::default(),
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_persistent_sessions: DEFAULT_MAX_PERSISTENT_SESSIONS,
            default_mode: SessionMode::OneShot,
        }
    }
}

impl BridgeConfig {
    /// Configuration from the environment with default timeouts
    pub fn from_env() -> Self {
        Self {
            agent: AgentConfig::from_env(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.base_url.is_none());
        assert!(config.api_key.is_none());
        assert!(config.model.is_none());
        assert!(config.fallback_model.is_none());
        assert!(config.max_thinking_tokens.is_none());
    }

    #[test]
    fn test_to_env_vars() {
        let config = AgentConfig {
            base_url: Some("https://api.example.com".to_string()),
            api_key: Some("secret-key".to_string()),
            model: Some("claude-3".to_string()),
            max_thinking_tokens: Some(8000),
            ..Default::default()
        };

        let env = config.to_env_vars();
        assert_eq!(
            env.get("ANTHROPIC_BASE_URL").unwrap(),
            "https://api.example.com"
        );
        assert_eq!(env.get("ANTHROPIC_API_KEY").unwrap(), "secret-key");
        assert_eq!(env.get("MAX_THINKING_TOKENS").unwrap(), "8000");
        // Model goes through --model, not the environment
        assert!(!env.contains_key("ANTHROPIC_MODEL"));
    }

    #[test]
    #[serial]
    fn test_from_env_prefers_api_key() {
        // SAFETY: serialized with other env-mutating tests
        unsafe {
            std::env::set_var("ANTHROPIC_API_KEY", "primary");
            std::env::set_var("ANTHROPIC_AUTH_TOKEN", "legacy");
            std::env::set_var("MAX_THINKING_TOKENS", "not-a-number");
        }

        let config = AgentConfig::from_env();
        assert_eq!(config.api_key.as_deref(), Some("primary"));
        assert!(config.max_thinking_tokens.is_none());

        unsafe {
            std::env::remove_var("ANTHROPIC_API_KEY");
        }
        let config = AgentConfig::from_env();
        assert_eq!(config.api_key.as_deref(), Some("legacy"));

        unsafe {
            std::env::remove_var("ANTHROPIC_AUTH_TOKEN");
            std::env::remove_var("MAX_THINKING_TOKENS");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_agent_path() {
        unsafe {
            std::env::set_var("CLAUDE_CODE_PATH", "/opt/claude/bin/claude");
        }
        let config = AgentConfig::from_env();
        assert_eq!(
            config.agent_path,
            Some(PathBuf::from("/opt/claude/bin/claude"))
        );

        unsafe {
            std::env::set_var("CLAUDE_CODE_PATH", "");
        }
        assert!(AgentConfig::from_env().agent_path.is_none());

        unsafe {
            std::env::remove_var("CLAUDE_CODE_PATH");
        }
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = SessionTimeouts::default();
        assert_eq!(timeouts.init, Duration::from_secs(30));
        assert_eq!(timeouts.permission, Duration::from_secs(600));
        assert_eq!(timeouts.client_request, Duration::from_secs(30));
        assert_eq!(timeouts.idle, Duration::from_secs(1800));
        assert_eq!(timeouts.health_check, Duration::from_secs(60));
        assert_eq!(timeouts.crash_backoff, Duration::from_secs(2));
        assert_eq!(timeouts.max_crash_retries, 2);
    }

    #[test]
    fn test_bridge_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.max_persistent_sessions, 3);
        assert_eq!(config.default_mode, SessionMode::OneShot);
    }
}
