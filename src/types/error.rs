//! Error types for the Claude Code bridge

use thiserror::Error;

/// JSON-RPC error codes
///
/// Standard JSON-RPC error codes and bridge-specific codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors (-32xxx)
    /// Parse error: Invalid JSON
    ParseError = -32700,
    /// Invalid request: Not a valid request object
    InvalidRequest = -32600,
    /// Method not found
    MethodNotFound = -32601,
    /// Invalid params
    InvalidParams = -32602,
    /// Internal error
    InternalError = -32603,

    // Bridge-specific errors (-32000 to -32099)
    /// Generic server error (handler failure)
    ServerError = -32000,
    /// Session not found
    SessionNotFound = -32001,
    /// Session already exists
    SessionAlreadyExists = -32002,
    /// Session already has a live agent process
    SessionBusy = -32003,
    /// Authentication required
    AuthRequired = -32004,
    /// Agent binary failed preflight
    PreflightFailed = -32005,
    /// Operation cancelled
    Cancelled = -32006,
    /// Agent process failed
    ProcessFailed = -32007,
    /// Permission confirmation error
    PermissionFailed = -32009,
    /// Request to the client timed out
    ClientTimeout = -32011,
    /// Agent reported an error result
    AgentError = -32012,
}

impl ErrorCode {
    /// Get the error code value
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    // === Session errors ===
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session already exists
    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    /// Session is closed
    #[error("Session is closed: {0}")]
    SessionClosed(String),

    /// Session already owns a live agent process
    #[error("Session already has an active agent process: {0}")]
    SessionBusy(String),

    /// Persistent session was used before `start()`
    #[error("Session not started: {0}")]
    SessionNotStarted(String),

    // === Process errors ===
    /// Agent binary missing, not executable or unversionable
    #[error("Preflight failed: {0}")]
    PreflightFailed(String),

    /// Failed to spawn the agent process
    #[error("Failed to spawn agent process: {0}")]
    SpawnFailed(String),

    /// Agent process exited abnormally
    #[error("Agent process exited abnormally: {0}")]
    ProcessExited(String),

    /// Agent did not report init in time
    #[error("Agent init timeout after {0}ms")]
    InitTimeout(u64),

    /// Agent stdin is closed
    #[error("Agent stdin closed")]
    StdinClosed,

    /// Authentication required
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    // === Prompt errors ===
    /// Empty prompt
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    /// Agent reported an error result
    #[error("Agent error ({subtype}): {message}")]
    AgentResult { subtype: String, message: String },

    // === Permission errors ===
    /// Permission handshake failed
    #[error("Permission confirmation failed: {0}")]
    PermissionFailed(String),

    // === RPC errors ===
    /// Invalid params for a method
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Request to the client timed out
    #[error("Client request '{method}' timed out after {timeout_ms}ms")]
    ClientTimeout { method: String, timeout_ms: u64 },

    /// Client answered a request with an error
    #[error("Client error {code}: {message}")]
    ClientError { code: i64, message: String },

    /// Outbound transport is closed
    #[error("Client transport closed")]
    TransportClosed,

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic errors ===
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Get the error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BridgeError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            BridgeError::SessionAlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            BridgeError::SessionClosed(_) => ErrorCode::SessionNotFound,
            BridgeError::SessionBusy(_) => ErrorCode::SessionBusy,
            BridgeError::SessionNotStarted(_) => ErrorCode::ProcessFailed,
            BridgeError::PreflightFailed(_) => ErrorCode::PreflightFailed,
            BridgeError::SpawnFailed(_) => ErrorCode::ProcessFailed,
            BridgeError::ProcessExited(_) => ErrorCode::ProcessFailed,
            BridgeError::InitTimeout(_) => ErrorCode::ProcessFailed,
            BridgeError::StdinClosed => ErrorCode::ProcessFailed,
            BridgeError::AuthRequired(_) => ErrorCode::AuthRequired,
            BridgeError::EmptyPrompt => ErrorCode::InvalidParams,
            BridgeError::AgentResult { .. } => ErrorCode::AgentError,
            BridgeError::PermissionFailed(_) => ErrorCode::PermissionFailed,
            BridgeError::InvalidParams(_) => ErrorCode::InvalidParams,
            BridgeError::ClientTimeout { .. } => ErrorCode::ClientTimeout,
            BridgeError::ClientError { .. } => ErrorCode::ServerError,
            BridgeError::TransportClosed => ErrorCode::InternalError,
            BridgeError::Io(_) => ErrorCode::InternalError,
            BridgeError::Json(_) => ErrorCode::ParseError,
            BridgeError::Internal(_) => ErrorCode::InternalError,
            BridgeError::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::ProcessExited(_)
                | BridgeError::InitTimeout(_)
                | BridgeError::ClientTimeout { .. }
        )
    }

    /// Check if this error is a client error (caused by invalid input)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BridgeError::SessionNotFound(_)
                | BridgeError::SessionAlreadyExists(_)
                | BridgeError::SessionBusy(_)
                | BridgeError::EmptyPrompt
                | BridgeError::InvalidParams(_)
        )
    }

    /// Machine-readable code used in `error` session updates
    pub fn notification_code(&self) -> &'static str {
        match self {
            BridgeError::PreflightFailed(_) => "preflight_failed",
            BridgeError::AuthRequired(_) => "auth_required",
            BridgeError::SpawnFailed(_) => "spawn_failed",
            BridgeError::ProcessExited(_) => "process_exited",
            BridgeError::InitTimeout(_) => "init_timeout",
            BridgeError::AgentResult { .. } => "agent_error",
            BridgeError::Cancelled => "cancelled",
            _ => "internal_error",
        }
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::Internal(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        BridgeError::SessionNotFound(session_id.into())
    }

    /// Create a session already exists error
    pub fn session_already_exists(session_id: impl Into<String>) -> Self {
        BridgeError::SessionAlreadyExists(session_id.into())
    }

    /// Create a session busy error
    pub fn session_busy(session_id: impl Into<String>) -> Self {
        BridgeError::SessionBusy(session_id.into())
    }

    /// Create an invalid params error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        BridgeError::InvalidParams(msg.into())
    }

    /// Create a preflight failure
    pub fn preflight_failed(msg: impl Into<String>) -> Self {
        BridgeError::PreflightFailed(msg.into())
    }

    /// Create a spawn failure
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        BridgeError::SpawnFailed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::session_not_found("test-123");
        assert_eq!(err.to_string(), "Session not found: test-123");

        let err = BridgeError::ClientTimeout {
            method: "editor/hover".to_string(),
            timeout_ms: 30_000,
        };
        assert_eq!(
            err.to_string(),
            "Client request 'editor/hover' timed out after 30000ms"
        );
    }

    #[test]
    fn test_error_codes() {
        let err = BridgeError::session_not_found("test");
        assert_eq!(err.error_code(), ErrorCode::SessionNotFound);
        assert_eq!(err.error_code().code(), -32001);

        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::ServerError.code(), -32000);
        assert_eq!(BridgeError::Cancelled.error_code(), ErrorCode::Cancelled);
    }

    #[test]
    fn test_is_retryable() {
        assert!(BridgeError::ProcessExited("code 1".into()).is_retryable());
        assert!(BridgeError::InitTimeout(30_000).is_retryable());
        assert!(!BridgeError::session_not_found("x").is_retryable());
        assert!(!BridgeError::Cancelled.is_retryable());
    }

    #[test]
    fn test_is_client_error() {
        assert!(BridgeError::session_not_found("x").is_client_error());
        assert!(BridgeError::session_busy("x").is_client_error());
        assert!(BridgeError::EmptyPrompt.is_client_error());
        assert!(!BridgeError::StdinClosed.is_client_error());
        assert!(!BridgeError::internal("oops").is_client_error());
    }

    #[test]
    fn test_notification_codes() {
        assert_eq!(
            BridgeError::AuthRequired("missing key".into()).notification_code(),
            "auth_required"
        );
        assert_eq!(
            BridgeError::preflight_failed("no binary").notification_code(),
            "preflight_failed"
        );
        assert_eq!(BridgeError::EmptyPrompt.notification_code(), "internal_error");
    }

    #[test]
    fn test_agent_result_display() {
        let err = BridgeError::AgentResult {
            subtype: "error_max_turns".to_string(),
            message: "Reached max turns".to_string(),
        };
        assert_eq!(err.to_string(), "Agent error (error_max_turns): Reached max turns");
        assert_eq!(err.error_code(), ErrorCode::AgentError);
    }
}
