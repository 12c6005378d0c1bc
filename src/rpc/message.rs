//! JSON-RPC 2.0 frames
//!
//! Inbound frames are classified by shape: `method` plus a non-null `id` is
//! a request, `method` alone a notification, and `id` without `method` a
//! response to one of our own requests.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{BridgeError, ErrorCode};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound.code() as i64,
            format!("Method not found: {}", method),
        )
    }

    /// Handler failure: `-32000` with the bridge error code in `data`
    pub fn from_error(error: &BridgeError) -> Self {
        match error {
            // Forwarded failures keep the client's own code
            BridgeError::ClientError { code, message } => Self::new(*code, message.clone()),
            other => Self {
                code: ErrorCode::ServerError.code() as i64,
                message: other.to_string(),
                data: Some(json!({ "errorCode": other.error_code().code() })),
            },
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError.code() as i64, message)
    }
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: Value,
        result: std::result::Result<Value, RpcError>,
    },
}

/// Why a line was not a usable frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("frame is not an object")]
    NotAnObject,
    #[error("frame has neither method nor id")]
    Unclassifiable,
    #[error("method is not a string")]
    BadMethod,
}

/// Classify a decoded frame
pub fn classify(value: Value) -> Result<Incoming, FrameError> {
    let Value::Object(mut map) = value else {
        return Err(FrameError::NotAnObject);
    };
    let id = map.remove("id").filter(|id| !id.is_null());
    let params = map.remove("params").unwrap_or(Value::Null);

    match map.remove("method") {
        Some(Value::String(method)) => Ok(match id {
            Some(id) => Incoming::Request { id, method, params },
            None => Incoming::Notification { method, params },
        }),
        Some(_) => Err(FrameError::BadMethod),
        None => {
            let id = id.ok_or(FrameError::Unclassifiable)?;
            let result = match map.remove("error") {
                Some(error) => Err(serde_json::from_value(error)
                    .unwrap_or_else(|_| RpcError::internal("malformed error object"))),
                None => Ok(map.remove("result").unwrap_or(Value::Null)),
            };
            Ok(Incoming::Response { id, result })
        }
    }
}

/// Decode and classify one line
pub fn parse_frame(line: &str) -> Result<Incoming, FrameError> {
    let value: Value = serde_json::from_str(line).map_err(|e| FrameError::Json(e.to_string()))?;
    classify(value)
}

pub fn response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

pub fn error_response(id: &Value, error: &RpcError) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params })
}

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params })
}
