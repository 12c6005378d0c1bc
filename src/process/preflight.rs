//! Agent binary resolution and environment checks
//!
//! `preflight` runs before every spawn and fails the operation without
//! spawning. `environment_check` produces the full report for the client.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::types::{AgentConfig, BridgeError, Result};

/// Binary name looked up on PATH as a last resort
pub const AGENT_BINARY_NAME: &str = "claude";

const DEFAULT_API_URL: &str = "https://api.anthropic.com";
const NETWORK_TIMEOUT: Duration = Duration::from_secs(3);

/// Well-known install locations, in lookup order
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".claude").join("local").join(AGENT_BINARY_NAME));
        paths.push(home.join(".local").join("bin").join(AGENT_BINARY_NAME));
    }
    paths.push(PathBuf::from("/usr/local/bin").join(AGENT_BINARY_NAME));
    paths.push(PathBuf::from("/opt/homebrew/bin").join(AGENT_BINARY_NAME));
    paths
}

/// First executable `claude` on the given search path
fn find_on_path(path_var: Option<OsString>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    which::which_in(AGENT_BINARY_NAME, path_var, cwd).ok()
}

/// Resolve the agent binary
///
/// An explicit path wins even if it does not exist, so the preflight reports
/// the configured path rather than silently picking another install.
pub fn resolve_agent_binary(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    candidate_paths()
        .into_iter()
        .find(|p| is_executable(p))
        .or_else(|| find_on_path(std::env::var_os("PATH")))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Run `<binary> --version` with a timeout
pub async fn query_version(binary: &Path, timeout: Duration) -> Result<String> {
    let mut cmd = Command::new(binary);
    cmd.arg("--version").kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            BridgeError::preflight_failed(format!(
                "'{} --version' timed out after {}s",
                binary.display(),
                timeout.as_secs()
            ))
        })?
        .map_err(|e| {
            BridgeError::preflight_failed(format!("failed to run {}: {}", binary.display(), e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BridgeError::preflight_failed(format!(
            "'{} --version' failed: {}",
            binary.display(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check the agent binary is present, executable and answers `--version`
///
/// Returns the resolved binary path.
pub async fn preflight(config: &AgentConfig, version_timeout: Duration) -> Result<PathBuf> {
    let binary = resolve_agent_binary(config.agent_path.as_deref()).ok_or_else(|| {
        BridgeError::preflight_failed(format!(
            "agent binary '{}' not found (set CLAUDE_CODE_PATH)",
            AGENT_BINARY_NAME
        ))
    })?;

    if !binary.exists() {
        return Err(BridgeError::preflight_failed(format!(
            "agent binary not found at {}",
            binary.display()
        )));
    }
    if !is_executable(&binary) {
        return Err(BridgeError::preflight_failed(format!(
            "agent binary is not executable: {}",
            binary.display()
        )));
    }

    let version = query_version(&binary, version_timeout).await?;
    tracing::debug!(binary = %binary.display(), version = %version, "Preflight passed");
    Ok(binary)
}

/// Outcome of a single environment check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// One line of the environment report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl PreflightCheck {
    fn new(name: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: message.into(),
        }
    }
}

fn has_stored_credentials() -> bool {
    dirs::home_dir().is_some_and(|home| {
        home.join(".claude").join(".credentials.json").is_file()
            || home.join(".claude.json").is_file()
    })
}

/// Split a base URL into `host:port` for a TCP reachability check
pub fn api_socket_addr(base_url: &str) -> Option<String> {
    let (default_port, rest) = if let Some(rest) = base_url.strip_prefix("https://") {
        (443, rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        (80, rest)
    } else {
        (443, base_url)
    };
    let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
    if authority.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        Some(authority.to_string())
    } else {
        Some(format!("{}:{}", authority, default_port))
    }
}

async fn check_network(base_url: &str) -> PreflightCheck {
    let Some(addr) = api_socket_addr(base_url) else {
        return PreflightCheck::new(
            "network",
            CheckStatus::Warn,
            format!("cannot parse API URL '{}'", base_url),
        );
    };
    match tokio::time::timeout(NETWORK_TIMEOUT, tokio::net::TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => PreflightCheck::new("network", CheckStatus::Pass, format!("{} reachable", addr)),
        Ok(Err(e)) => PreflightCheck::new(
            "network",
            CheckStatus::Warn,
            format!("{} unreachable: {}", addr, e),
        ),
        Err(_) => PreflightCheck::new(
            "network",
            CheckStatus::Warn,
            format!("{} timed out after {}s", addr, NETWORK_TIMEOUT.as_secs()),
        ),
    }
}

/// Full environment report: binary, executable bit, version, credentials, network
pub async fn environment_check(
    config: &AgentConfig,
    version_timeout: Duration,
) -> Vec<PreflightCheck> {
    let mut checks = Vec::new();

    let binary = resolve_agent_binary(config.agent_path.as_deref()).filter(|p| p.exists());
    match &binary {
        Some(path) => checks.push(PreflightCheck::new(
            "binary",
            CheckStatus::Pass,
            path.display().to_string(),
        )),
        None => checks.push(PreflightCheck::new(
            "binary",
            CheckStatus::Fail,
            "agent binary not found (set CLAUDE_CODE_PATH)",
        )),
    }

    if let Some(path) = &binary {
        if is_executable(path) {
            checks.push(PreflightCheck::new("executable", CheckStatus::Pass, "ok"));
            match query_version(path, version_timeout).await {
                Ok(version) => checks.push(PreflightCheck::new("version", CheckStatus::Pass, version)),
                Err(e) => checks.push(PreflightCheck::new("version", CheckStatus::Fail, e.to_string())),
            }
        } else {
            checks.push(PreflightCheck::new(
                "executable",
                CheckStatus::Fail,
                format!("{} is not executable", path.display()),
            ));
        }
    }

    if config.api_key.is_some() {
        checks.push(PreflightCheck::new("credentials", CheckStatus::Pass, "API key set"));
    } else if has_stored_credentials() {
        checks.push(PreflightCheck::new(
            "credentials",
            CheckStatus::Pass,
            "stored login found",
        ));
    } else {
        checks.push(PreflightCheck::new(
            "credentials",
            CheckStatus::Warn,
            "no API key or stored login found",
        ));
    }

    let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_API_URL);
    checks.push(check_network(base_url).await);

    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = PathBuf::from("/nonexistent/claude");
        assert_eq!(resolve_agent_binary(Some(&path)), Some(path));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_lookup_skips_non_executable() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::create_dir_all(&bin).unwrap();
        write_script(&plain, "claude", "#!/bin/sh\n", 0o644);
        let expected = write_script(&bin, "claude", "#!/bin/sh\n", 0o755);

        let path_var = std::env::join_paths([&plain, &bin]).unwrap();
        assert_eq!(find_on_path(Some(path_var)), Some(expected));

        let only_plain = std::env::join_paths([&plain]).unwrap();
        assert_eq!(find_on_path(Some(only_plain)), None);
    }

    #[test]
    fn test_candidate_order() {
        let paths = candidate_paths();
        let tail: Vec<_> = paths.iter().rev().take(2).collect();
        assert_eq!(tail[0], &PathBuf::from("/opt/homebrew/bin/claude"));
        assert_eq!(tail[1], &PathBuf::from("/usr/local/bin/claude"));
    }

    #[test]
    fn test_api_socket_addr() {
        assert_eq!(
            api_socket_addr("https://api.anthropic.com").as_deref(),
            Some("api.anthropic.com:443")
        );
        assert_eq!(
            api_socket_addr("http://localhost:8080/v1").as_deref(),
            Some("localhost:8080")
        );
        assert_eq!(
            api_socket_addr("http://proxy.internal/").as_deref(),
            Some("proxy.internal:80")
        );
        assert_eq!(api_socket_addr("https://"), None);
    }

    #[tokio::test]
    async fn test_preflight_missing_binary() {
        let config = AgentConfig {
            agent_path: Some(PathBuf::from("/nonexistent/claude")),
            ..Default::default()
        };
        let err = preflight(&config, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BridgeError::PreflightFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preflight_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "claude", "#!/bin/sh\necho 1.0.0\n", 0o644);
        let config = AgentConfig {
            agent_path: Some(path),
            ..Default::default()
        };
        let err = preflight(&config, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preflight_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write_script(dir.path(), "claude", "#!/bin/sh\necho '1.0.0 (Claude Code)'\n", 0o755);
        let config = AgentConfig {
            agent_path: Some(ok.clone()),
            ..Default::default()
        };
        assert_eq!(preflight(&config, Duration::from_secs(5)).await.unwrap(), ok);
        assert_eq!(
            query_version(&ok, Duration::from_secs(5)).await.unwrap(),
            "1.0.0 (Claude Code)"
        );

        let failing = write_script(dir.path(), "broken", "#!/bin/sh\necho boom >&2\nexit 3\n", 0o755);
        let err = query_version(&failing, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_check_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let slow = write_script(dir.path(), "slow", "#!/bin/sh\nsleep 5\n", 0o755);
        let err = query_version(&slow, Duration::from_millis(200)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
