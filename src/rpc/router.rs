//! JSON-RPC dispatch
//!
//! Each inbound request runs on its own task so a long `session/prompt`
//! never blocks a `permission/confirm`. Handler errors and panics become
//! error responses; the router itself keeps reading.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use super::message::{Incoming, RpcError, parse_frame};
use super::outbound::{Outbound, write_frames};
use crate::types::Result;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Methods re-issued to the client unchanged
pub const FORWARDED_METHODS: &[&str] = &[
    "editor/gotoDefinition",
    "editor/findReferences",
    "editor/hover",
    "editor/diagnostics",
    "permissions/listRules",
    "permissions/addRule",
    "permissions/removeRule",
];

pub struct RouterBuilder {
    handlers: HashMap<String, Handler>,
    forwarded: HashSet<String>,
    outbound: Arc<Outbound>,
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .field("forwarded", &self.forwarded)
            .finish_non_exhaustive()
    }
}

impl RouterBuilder {
    /// Register a handler; its result is sent as `result` (`null` for unit)
    pub fn on_request<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |params| -> HandlerFuture { Box::pin(handler(params)) });
        self.handlers.insert(method.to_string(), handler);
        self
    }

    /// Re-issue `method` to the client and relay its answer
    pub fn forward(mut self, method: &str) -> Self {
        self.forwarded.insert(method.to_string());
        self
    }

    pub fn forward_all(self, methods: &[&str]) -> Self {
        methods.iter().fold(self, |builder, m| builder.forward(m))
    }

    pub fn build(self) -> Arc<ProtocolRouter> {
        Arc::new(ProtocolRouter {
            handlers: self.handlers,
            forwarded: self.forwarded,
            outbound: self.outbound,
        })
    }
}

pub struct ProtocolRouter {
    handlers: HashMap<String, Handler>,
    forwarded: HashSet<String>,
    outbound: Arc<Outbound>,
}

impl std::fmt::Debug for ProtocolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRouter")
            .field("methods", &self.handlers.len())
            .field("forwarded", &self.forwarded.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolRouter {
    pub fn builder(outbound: Arc<Outbound>) -> RouterBuilder {
        RouterBuilder {
            handlers: HashMap::new(),
            forwarded: HashSet::new(),
            outbound,
        }
    }

    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    /// Decode one line and dispatch it
    pub fn dispatch_line(self: &Arc<Self>, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match parse_frame(line) {
            Ok(frame) => self.dispatch(frame),
            // No id can be recovered from a malformed frame, so nothing is sent back
            Err(e) => tracing::warn!(error = %e, len = line.len(), "Dropped malformed client frame"),
        }
    }

    pub fn dispatch(self: &Arc<Self>, frame: Incoming) {
        match frame {
            Incoming::Request { id, method, params } => {
                tracing::debug!(id = %id, method = %method, "Client request");
                let router = Arc::clone(self);
                tokio::spawn(async move {
                    let reply = router.run(&method, params).await;
                    if let Err(error) = &reply {
                        tracing::debug!(method = %method, code = error.code, message = %error.message, "Request failed");
                    }
                    router.outbound.respond(&id, reply);
                });
            }
            Incoming::Notification { method, params } => {
                if !self.handlers.contains_key(&method) {
                    tracing::debug!(method = %method, "Unhandled client notification");
                    return;
                }
                let router = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(error) = router.run(&method, params).await {
                        tracing::warn!(method = %method, message = %error.message, "Notification handler failed");
                    }
                });
            }
            Incoming::Response { id, result } => {
                self.outbound.resolve(&id, result);
            }
        }
    }

    async fn run(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        if let Some(handler) = self.handlers.get(method) {
            // A nested task turns a handler panic into a JoinError
            let task = tokio::spawn(handler(params));
            return match task.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(RpcError::from_error(&error)),
                Err(join) => {
                    tracing::error!(method = %method, error = %join, "Handler panicked");
                    Err(RpcError::internal(format!("Handler for {} failed", method)))
                }
            };
        }
        if self.forwarded.contains(method) {
            return self
                .outbound
                .request(method, params)
                .await
                .map_err(|e| RpcError::from_error(&e));
        }
        Err(RpcError::method_not_found(method))
    }

    /// Read frames from `reader` until EOF
    ///
    /// `frames` is the stream paired with this router's [`Outbound`]; a
    /// writer task drains it into `writer` and outlives this call so late
    /// notifications still reach the client.
    pub async fn serve<R, W>(
        self: Arc<Self>,
        reader: R,
        writer: W,
        frames: mpsc::UnboundedReceiver<Value>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(write_frames(frames, writer));

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            self.dispatch_line(&String::from_utf8_lossy(&buf));
        }

        tracing::info!("Client transport closed");
        self.outbound.fail_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BridgeError;
    use serde_json::json;
    use std::time::Duration;

    fn router() -> (Arc<ProtocolRouter>, mpsc::UnboundedReceiver<Value>) {
        let (outbound, frames) = Outbound::new(Duration::from_secs(5));
        let router = ProtocolRouter::builder(outbound)
            .on_request("echo", |params| async move { Ok(params) })
            .on_request("void", |_| async move { Ok(Value::Null) })
            .on_request("fail", |_| async move {
                Err(BridgeError::session_not_found("s9"))
            })
            .on_request("panic", |_| async move {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            })
            .forward("editor/hover")
            .build();
        (router, frames)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (router, mut frames) = router();
        router.dispatch_line(r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":{"a":1}}"#);
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame, json!({"jsonrpc": "2.0", "id": 1, "result": {"a": 1}}));

        router.dispatch_line(r#"{"jsonrpc":"2.0","id":"v","method":"void"}"#);
        let frame = frames.recv().await.unwrap();
        assert!(frame.as_object().unwrap().contains_key("result"));
        assert_eq!(frame["result"], Value::Null);
    }

    #[tokio::test]
    async fn test_errors() {
        let (router, mut frames) = router();
        router.dispatch_line(r#"{"jsonrpc":"2.0","id":2,"method":"nope"}"#);
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["error"]["code"], -32601);

        router.dispatch_line(r#"{"jsonrpc":"2.0","id":3,"method":"fail"}"#);
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["error"]["code"], -32000);
        assert_eq!(frame["error"]["message"], "Session not found: s9");
    }

    #[tokio::test]
    async fn test_panic_does_not_kill_router() {
        let (router, mut frames) = router();
        router.dispatch_line(r#"{"jsonrpc":"2.0","id":4,"method":"panic"}"#);
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["id"], 4);
        assert_eq!(frame["error"]["code"], -32603);

        router.dispatch_line(r#"{"jsonrpc":"2.0","id":5,"method":"echo","params":1}"#);
        assert_eq!(frames.recv().await.unwrap()["result"], 1);
    }

    #[tokio::test]
    async fn test_malformed_and_notifications_are_silent() {
        let (router, mut frames) = router();
        router.dispatch_line("{garbage");
        router.dispatch_line(r#"{"jsonrpc":"2.0","method":"unknown/notification"}"#);
        router.dispatch_line(r#"{"jsonrpc":"2.0","method":"void"}"#);
        router.dispatch_line(r#"{"jsonrpc":"2.0","id":6,"method":"void"}"#);
        // Only the request produced a frame
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["id"], 6);
    }

    #[tokio::test]
    async fn test_forwarded_method_round_trip() {
        let (router, mut frames) = router();
        router.dispatch_line(
            r#"{"jsonrpc":"2.0","id":"c-1","method":"editor/hover","params":{"line":3}}"#,
        );

        let reissued = frames.recv().await.unwrap();
        assert_eq!(reissued["method"], "editor/hover");
        assert_eq!(reissued["params"], json!({"line": 3}));
        let private_id = reissued["id"].clone();
        assert!(private_id.is_u64());

        router.dispatch_line(
            &json!({"jsonrpc": "2.0", "id": private_id, "result": {"text": "docs"}}).to_string(),
        );
        let answer = frames.recv().await.unwrap();
        assert_eq!(answer, json!({"jsonrpc": "2.0", "id": "c-1", "result": {"text": "docs"}}));
    }
}
