//! Frames from the bridge to the client
//!
//! Everything written to the client goes through one unbounded channel
//! drained by a single writer task, so frames never interleave. Requests the
//! bridge issues to the client (forwarding, reverse RPC) are correlated by a
//! private monotonic id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::message::{self, RpcError};
use crate::types::{BridgeError, ClientNotification, Notifier, Result};

type Reply = std::result::Result<Value, RpcError>;

#[derive(Debug)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Value>,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Reply>>,
    timeout: Duration,
}

impl Outbound {
    /// Create the sender and the frame stream for the writer task
    pub fn new(timeout: Duration) -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound = Self {
            tx,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            timeout,
        };
        (std::sync::Arc::new(outbound), rx)
    }

    fn send_frame(&self, frame: Value) -> bool {
        if self.tx.send(frame).is_err() {
            tracing::debug!("Client writer gone, frame dropped");
            return false;
        }
        true
    }

    pub fn notify_method(&self, method: &str, params: Value) {
        self.send_frame(message::notification(method, params));
    }

    pub fn respond(&self, id: &Value, result: Reply) {
        let frame = match result {
            Ok(value) => message::response(id, value),
            Err(error) => message::error_response(id, &error),
        };
        self.send_frame(frame);
    }

    /// Issue a request to the client and wait for its answer
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if !self.send_frame(message::request(id, method, params)) {
            self.pending.remove(&id);
            return Err(BridgeError::TransportClosed);
        }
        tracing::debug!(id, method = %method, "Request sent to client");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(BridgeError::ClientError {
                code: error.code,
                message: error.message,
            }),
            Ok(Err(_)) => Err(BridgeError::TransportClosed),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!(id, method = %method, "Client request timed out");
                Err(BridgeError::ClientTimeout {
                    method: method.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Complete a pending request; false for unknown or late ids
    pub fn resolve(&self, id: &Value, result: Reply) -> bool {
        let Some((_, tx)) = id.as_u64().and_then(|id| self.pending.remove(&id)) else {
            tracing::warn!(id = %id, "Response for unknown request id ignored");
            return false;
        };
        drop(tx.send(result));
        true
    }

    /// Fail every outstanding request (transport closed)
    pub fn fail_all(&self) {
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            tracing::debug!(count, "Dropped outstanding client requests");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Notifier for Outbound {
    fn notify(&self, notification: ClientNotification) {
        self.notify_method(notification.method(), notification.params());
    }
}

/// Write frames as newline-delimited JSON until the channel closes
pub async fn write_frames<W>(mut frames: mpsc::UnboundedReceiver<Value>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let mut line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode outbound frame");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "Client transport write failed");
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(error = %e, "Client transport flush failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_resolved_by_response() {
        let (outbound, mut frames) = Outbound::new(Duration::from_secs(5));
        let requester = {
            let outbound = outbound.clone();
            tokio::spawn(async move { outbound.request("editor/hover", json!({"line": 1})).await })
        };

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["method"], "editor/hover");
        let id = frame["id"].clone();
        assert!(outbound.resolve(&id, Ok(json!({"contents": "fn main()"}))));

        let value = requester.await.unwrap().unwrap();
        assert_eq!(value, json!({"contents": "fn main()"}));
        assert_eq!(outbound.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_ids_monotonic() {
        let (outbound, mut frames) = Outbound::new(Duration::from_secs(5));
        for _ in 0..2 {
            let outbound = outbound.clone();
            tokio::spawn(async move { outbound.request("x", Value::Null).await });
        }
        let a = frames.recv().await.unwrap()["id"].as_u64().unwrap();
        let b = frames.recv().await.unwrap()["id"].as_u64().unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_client_error_propagated() {
        let (outbound, mut frames) = Outbound::new(Duration::from_secs(5));
        let requester = {
            let outbound = outbound.clone();
            tokio::spawn(async move { outbound.request("permissions/listRules", Value::Null).await })
        };
        let id = frames.recv().await.unwrap()["id"].clone();
        outbound.resolve(&id, Err(RpcError::new(-32050, "no rules")));
        let err = requester.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::ClientError { code: -32050, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let (outbound, _frames) = Outbound::new(Duration::from_secs(30));
        let err = outbound.request("editor/diagnostics", Value::Null).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ClientTimeout { timeout_ms: 30_000, .. }
        ));
        assert_eq!(outbound.pending_count(), 0);
        // A late answer is ignored
        assert!(!outbound.resolve(&json!(1), Ok(Value::Null)));
    }

    #[test]
    fn test_notifier_frames() {
        let (outbound, mut frames) = Outbound::new(Duration::from_secs(1));
        outbound.notify(ClientNotification::Evicted {
            session_id: "s1".to_string(),
        });
        let frame = frames.try_recv().unwrap();
        assert_eq!(
            frame,
            json!({"jsonrpc": "2.0", "method": "session/evicted", "params": {"sessionId": "s1"}})
        );
    }
}
