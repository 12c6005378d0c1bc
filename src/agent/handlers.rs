//! Bridge request handlers
//!
//! One function per JSON-RPC method. Each takes typed params and returns a
//! serializable result; [`build_router`] wires them into the dispatch table
//! and adds the methods forwarded to the client unchanged.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::core::Bridge;
use crate::permissions::{ConfirmOptions, PendingSummary};
use crate::process::{PreflightCheck, SpawnOptions, environment_check};
use crate::rpc::{FORWARDED_METHODS, ProtocolRouter};
use crate::session::{SessionStatus, run_one_shot};
use crate::tracing::ErrorTraceExt;
use crate::types::{
    BridgeError, CloseReason, Result, SessionInfo, SessionMode, StopReason, TokenUsage,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSessionParams {
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSessionParams {
    pub session_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResumeIdParams {
    pub session_id: String,
    pub agent_session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmParams {
    pub session_id: String,
    pub tool_call_id: String,
    pub approved: bool,
    #[serde(default)]
    pub options: ConfirmOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub modes: Vec<SessionMode>,
    pub default_mode: SessionMode,
    pub max_persistent_sessions: usize,
    pub forwarded_methods: Vec<&'static str>,
    pub permission_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub stop_reason: StopReason,
    /// Usage of this turn
    pub usage: TokenUsage,
}

/// Pool occupancy returned by `pool/status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub capacity: usize,
    /// Live members
    pub active: usize,
    /// Every tracked member, closed ones included
    pub members: Vec<SessionStatus>,
}

/// Handle `initialize`
#[instrument(name = "bridge_initialize", skip(bridge))]
pub fn initialize(bridge: &Bridge) -> InitializeResponse {
    tracing::info!(
        name = bridge.name(),
        version = bridge.version(),
        "Handling initialize request"
    );
    InitializeResponse {
        name: bridge.name(),
        version: bridge.version(),
        capabilities: Capabilities {
            modes: vec![SessionMode::OneShot, SessionMode::Persistent],
            default_mode: bridge.config().default_mode,
            max_persistent_sessions: bridge.pool().capacity(),
            forwarded_methods: FORWARDED_METHODS.to_vec(),
            permission_fallback: true,
        },
    }
}

/// Absolute working directory for a new session
fn resolve_cwd(bridge: &Bridge, cwd: Option<PathBuf>) -> Result<PathBuf> {
    let root = &bridge.config().workspace_root;
    let cwd = match cwd {
        None => return Ok(root.clone()),
        Some(path) if path.is_absolute() => path,
        Some(path) => root.join(path),
    };
    if !cwd.is_dir() {
        return Err(BridgeError::invalid_params(format!(
            "cwd is not a directory: {}",
            cwd.display()
        )));
    }
    Ok(cwd)
}

/// Handle `session/create`
#[instrument(name = "bridge_session_create", skip(bridge), fields(session_id = ?params.session_id))]
pub fn create_session(bridge: &Bridge, params: CreateSessionParams) -> Result<SessionInfo> {
    let cwd = resolve_cwd(bridge, params.cwd)?;
    let session = bridge
        .sessions()
        .create_session(params.session_id, params.title, cwd)?;
    Ok(session.info())
}

/// Handle `session/list`
pub fn list_sessions(bridge: &Bridge) -> Vec<SessionInfo> {
    bridge.sessions().list()
}

/// Handle `session/rename`
#[instrument(name = "bridge_session_rename", skip(bridge, params), fields(session_id = %params.session_id))]
pub fn rename_session(bridge: &Bridge, params: RenameSessionParams) -> Result<SessionInfo> {
    bridge
        .sessions()
        .rename_session(&params.session_id, &params.title)
}

/// Handle `session/delete`
///
/// Stops whatever runs for the session and drops its permission state.
#[instrument(name = "bridge_session_delete", skip(bridge, params), fields(session_id = %params.session_id))]
pub async fn delete_session(bridge: &Bridge, params: SessionIdParams) -> Result<()> {
    let session_id = params.session_id.as_str();
    let session = bridge.sessions().get_session_or_error(session_id)?;
    session.cancel_one_shot();
    bridge.pool().remove(session_id).await;
    bridge.broker().forget_session(session_id);
    bridge.sessions().remove_session(session_id);
    tracing::info!(session_id = %session_id, "Session deleted");
    Ok(())
}

/// Handle `session/prompt`
///
/// An unknown session id creates the session in the workspace root.
#[instrument(
    name = "bridge_session_prompt",
    skip(bridge, params),
    fields(session_id = %params.session_id, mode = ?params.mode, prompt_len = params.prompt.len())
)]
pub async fn prompt(bridge: &Bridge, params: PromptParams) -> Result<PromptResponse> {
    let mode = match params.mode.as_deref() {
        None => bridge.config().default_mode,
        Some(mode) => SessionMode::parse(mode)
            .ok_or_else(|| BridgeError::invalid_params(format!("unknown mode '{}'", mode)))?,
    };
    let options = SpawnOptions::from_value(params.options.as_ref())?;
    let session = bridge
        .sessions()
        .get_or_create(&params.session_id, bridge.config().workspace_root.clone());
    let start = std::time::Instant::now();

    let response = match mode {
        SessionMode::OneShot => {
            let outcome = run_one_shot(bridge.env(), &session, &params.prompt, options)
                .await
                .inspect_err(|e| {
                    e.trace_error();
                })?;
            PromptResponse {
                stop_reason: outcome.stop_reason,
                usage: outcome.turn_usage,
            }
        }
        SessionMode::Persistent => {
            let member = bridge
                .pool()
                .get_or_start(&session, options)
                .await
                .inspect_err(|e| {
                    e.trace_error();
                })?;
            let waiter = member.send_message(&params.prompt).await?;
            match waiter.await {
                Ok(outcome) => PromptResponse {
                    stop_reason: outcome.stop_reason,
                    usage: outcome.turn_usage,
                },
                Err(_) => match member.close_reason() {
                    Some(CloseReason::Stopped) => PromptResponse {
                        stop_reason: StopReason::Cancelled,
                        usage: TokenUsage::default(),
                    },
                    Some(reason) => {
                        return Err(BridgeError::ProcessExited(format!(
                            "session closed ({:?}) before the turn finished",
                            reason
                        )));
                    }
                    None => {
                        return Err(BridgeError::ProcessExited(
                            "agent process crashed during the turn".to_string(),
                        ));
                    }
                },
            }
        }
    };

    tracing::info!(
        session_id = %session.session_id,
        stop_reason = ?response.stop_reason,
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        elapsed_ms = start.elapsed().as_millis(),
        "Prompt completed"
    );
    Ok(response)
}

/// Handle `session/cancel` (request or notification)
///
/// Cancels a running one-shot turn, stops a persistent process and denies
/// every pending confirmation. Unknown sessions are ignored.
#[instrument(name = "bridge_session_cancel", skip(bridge, params), fields(session_id = %params.session_id))]
pub async fn cancel(bridge: &Bridge, params: SessionIdParams) -> Result<()> {
    let session_id = params.session_id.as_str();
    let one_shot = bridge
        .sessions()
        .get_session(session_id)
        .is_some_and(|session| session.cancel_one_shot());
    let persistent = bridge.pool().remove(session_id).await;
    let confirmations = bridge.broker().cancel_session(session_id);
    tracing::info!(
        session_id = %session_id,
        one_shot,
        persistent,
        confirmations,
        "Session cancelled"
    );
    Ok(())
}

/// Handle `session/stop`
#[instrument(name = "bridge_session_stop", skip(bridge, params), fields(session_id = %params.session_id))]
pub async fn stop(bridge: &Bridge, params: SessionIdParams) -> Result<()> {
    bridge.sessions().get_session_or_error(&params.session_id)?;
    if !bridge.pool().remove(&params.session_id).await {
        tracing::debug!(session_id = %params.session_id, "No persistent process to stop");
    }
    Ok(())
}

/// Handle `session/status`
pub fn status(bridge: &Bridge, params: &SessionIdParams) -> Option<SessionStatus> {
    bridge.pool().get(&params.session_id).map(|m| m.status())
}

/// Handle `pool/status`
pub fn pool_status(bridge: &Bridge) -> PoolStatus {
    let pool = bridge.pool();
    PoolStatus {
        capacity: pool.capacity(),
        active: pool.len(),
        members: pool.snapshot(),
    }
}

/// Handle `session/setResumeId`
///
/// Binding is ignored once the session's persistent process has started.
#[instrument(name = "bridge_set_resume_id", skip(bridge, params), fields(session_id = %params.session_id))]
pub fn set_resume_id(bridge: &Bridge, params: SetResumeIdParams) -> Result<()> {
    let session = bridge.sessions().get_session_or_error(&params.session_id)?;
    let bound = match bridge.pool().get(&params.session_id) {
        Some(member) => member.set_resume_session_id(params.agent_session_id.clone()),
        None => true,
    };
    if bound {
        session.bind_agent_session_id(params.agent_session_id);
    }
    Ok(())
}

/// Handle `permission/confirm`; unknown confirmations are a no-op
#[instrument(
    name = "bridge_permission_confirm",
    skip(bridge, params),
    fields(session_id = %params.session_id, tool_call_id = %params.tool_call_id, approved = params.approved)
)]
pub fn confirm(bridge: &Bridge, params: ConfirmParams) {
    bridge.broker().confirm(
        &params.session_id,
        &params.tool_call_id,
        params.approved,
        params.options,
    );
}

/// Handle `permission/pending`
pub fn pending(bridge: &Bridge, params: &SessionIdParams) -> Vec<PendingSummary> {
    bridge.broker().pending_for(&params.session_id)
}

/// Handle `environment/check`
#[instrument(name = "bridge_environment_check", skip(bridge))]
pub async fn check_environment(bridge: &Bridge) -> Vec<PreflightCheck> {
    let config = bridge.config();
    environment_check(&config.agent, config.timeouts.version_check).await
}

/// Decode params; a missing params member reads as `{}`
fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| BridgeError::invalid_params(e.to_string()))
}

fn reply<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Give a handler its own handle on the bridge
fn bind<F, Fut>(bridge: &Arc<Bridge>, handler: F) -> impl Fn(Value) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<Bridge>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let bridge = Arc::clone(bridge);
    move |params| handler(Arc::clone(&bridge), params)
}

/// Build the dispatch table for a bridge
pub fn build_router(bridge: &Arc<Bridge>) -> Arc<ProtocolRouter> {
    ProtocolRouter::builder(bridge.outbound().clone())
        .on_request(
            "initialize",
            bind(bridge, |b, _| async move { reply(initialize(&b)) }),
        )
        .on_request(
            "session/create",
            bind(bridge, |b, p| async move { reply(create_session(&b, parse(p)?)?) }),
        )
        .on_request(
            "session/list",
            bind(bridge, |b, _| async move { reply(list_sessions(&b)) }),
        )
        .on_request(
            "session/rename",
            bind(bridge, |b, p| async move { reply(rename_session(&b, parse(p)?)?) }),
        )
        .on_request(
            "session/delete",
            bind(bridge, |b, p| async move {
                reply(delete_session(&b, parse(p)?).await?)
            }),
        )
        .on_request(
            "session/prompt",
            bind(bridge, |b, p| async move { reply(prompt(&b, parse(p)?).await?) }),
        )
        .on_request(
            "session/cancel",
            bind(bridge, |b, p| async move { reply(cancel(&b, parse(p)?).await?) }),
        )
        .on_request(
            "session/stop",
            bind(bridge, |b, p| async move { reply(stop(&b, parse(p)?).await?) }),
        )
        .on_request(
            "session/status",
            bind(bridge, |b, p| async move { reply(status(&b, &parse(p)?)) }),
        )
        .on_request(
            "pool/status",
            bind(bridge, |b, _| async move { reply(pool_status(&b)) }),
        )
        .on_request(
            "session/setResumeId",
            bind(bridge, |b, p| async move { reply(set_resume_id(&b, parse(p)?)?) }),
        )
        .on_request(
            "permission/confirm",
            bind(bridge, |b, p| async move {
                confirm(&b, parse(p)?);
                Ok::<_, BridgeError>(Value::Null)
            }),
        )
        .on_request(
            "permission/pending",
            bind(bridge, |b, p| async move { reply(pending(&b, &parse(p)?)) }),
        )
        .on_request(
            "environment/check",
            bind(bridge, |b, _| async move { reply(check_environment(&b).await) }),
        )
        .forward_all(FORWARDED_METHODS)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BridgeConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn bridge() -> Arc<Bridge> {
        let config = BridgeConfig {
            workspace_root: std::env::temp_dir(),
            ..BridgeConfig::default()
        };
        Bridge::new(config).0
    }

    #[test]
    fn test_initialize_response() {
        let bridge = bridge();
        let value = serde_json::to_value(initialize(&bridge)).unwrap();
        assert_eq!(value["name"], "claude-code-bridge");
        assert_eq!(value["capabilities"]["modes"], json!(["oneShot", "persistent"]));
        assert_eq!(value["capabilities"]["defaultMode"], "oneShot");
        assert_eq!(value["capabilities"]["maxPersistentSessions"], 3);
    }

    #[test]
    fn test_parse_null_params_as_empty_object() {
        let params: CreateSessionParams = parse(Value::Null).unwrap();
        assert!(params.session_id.is_none());

        let err = parse::<SessionIdParams>(json!({})).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParams(_)));
    }

    #[test]
    fn test_create_rename_list() {
        let bridge = bridge();
        let info = create_session(
            &bridge,
            CreateSessionParams {
                session_id: Some("s1".to_string()),
                title: None,
                cwd: None,
            },
        )
        .unwrap();
        assert_eq!(info.cwd, std::env::temp_dir());

        let renamed = rename_session(
            &bridge,
            RenameSessionParams {
                session_id: "s1".to_string(),
                title: "Refactor".to_string(),
            },
        )
        .unwrap();
        assert_eq!(renamed.title, "Refactor");
        assert_eq!(list_sessions(&bridge).len(), 1);

        let duplicate = create_session(
            &bridge,
            CreateSessionParams {
                session_id: Some("s1".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(duplicate, Err(BridgeError::SessionAlreadyExists(_))));
    }

    #[test]
    fn test_create_rejects_missing_cwd() {
        let bridge = bridge();
        let err = create_session(
            &bridge,
            CreateSessionParams {
                cwd: Some(PathBuf::from("/definitely/not/here")),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_session() {
        let bridge = bridge();
        let err = delete_session(
            &bridge,
            SessionIdParams {
                session_id: "missing".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_prompt_rejects_unknown_mode() {
        let bridge = bridge();
        let err = prompt(
            &bridge,
            PromptParams {
                session_id: "s1".to_string(),
                prompt: "hi".to_string(),
                mode: Some("sometimes".to_string()),
                options: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_session_is_noop() {
        let bridge = bridge();
        cancel(
            &bridge,
            SessionIdParams {
                session_id: "nobody".to_string(),
            },
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_set_resume_id_binds_session() {
        let bridge = bridge();
        bridge
            .sessions()
            .create_session(Some("s1".to_string()), None, std::env::temp_dir())
            .unwrap();
        set_resume_id(
            &bridge,
            SetResumeIdParams {
                session_id: "s1".to_string(),
                agent_session_id: "agent-9".to_string(),
            },
        )
        .unwrap();
        let session = bridge.sessions().get_session("s1").unwrap();
        assert_eq!(session.agent_session_id().as_deref(), Some("agent-9"));
    }

    #[test]
    fn test_confirm_unknown_is_noop() {
        let bridge = bridge();
        confirm(
            &bridge,
            ConfirmParams {
                session_id: "s1".to_string(),
                tool_call_id: "toolu_1".to_string(),
                approved: true,
                options: ConfirmOptions::default(),
            },
        );
        assert_eq!(bridge.broker().pending_count(), 0);
        assert!(
            pending(
                &bridge,
                &SessionIdParams {
                    session_id: "s1".to_string()
                }
            )
            .is_empty()
        );
    }

    #[tokio::test]
    async fn test_router_dispatches_bridge_methods() {
        let (bridge, mut frames) = Bridge::new(BridgeConfig {
            workspace_root: std::env::temp_dir(),
            ..BridgeConfig::default()
        });
        let router = build_router(&bridge);

        router.dispatch_line(
            r#"{"jsonrpc":"2.0","id":1,"method":"session/create","params":{"sessionId":"a","title":"T"}}"#,
        );
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["result"]["sessionId"], "a");
        assert_eq!(frame["result"]["title"], "T");

        router.dispatch_line(
            r#"{"jsonrpc":"2.0","id":2,"method":"session/status","params":{"sessionId":"a"}}"#,
        );
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["result"], Value::Null);

        router.dispatch_line(r#"{"jsonrpc":"2.0","id":4,"method":"pool/status"}"#);
        let frame = frames.recv().await.unwrap();
        assert_eq!(
            frame["result"],
            json!({"capacity": 3, "active": 0, "members": []})
        );

        router.dispatch_line(r#"{"jsonrpc":"2.0","id":3,"method":"session/rename","params":{}}"#);
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["error"]["code"], -32000);
    }
}
