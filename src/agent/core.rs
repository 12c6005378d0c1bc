//! Core bridge structure
//!
//! The Bridge holds the configuration and every shared collaborator the
//! request handlers need: the session registry, the persistent-session
//! pool, the permission broker and the client-bound outbound channel.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::permissions::PermissionBroker;
use crate::rpc::Outbound;
use crate::session::{SessionEnv, SessionManager, SessionPool};
use crate::types::{BridgeConfig, Notifier};

/// Shared state of one client connection
#[derive(Debug)]
pub struct Bridge {
    config: Arc<BridgeConfig>,
    sessions: SessionManager,
    pool: SessionPool,
    broker: Arc<PermissionBroker>,
    outbound: Arc<Outbound>,
    env: SessionEnv,
}

impl Bridge {
    /// Create the bridge and the frame stream its writer task drains
    pub fn new(config: BridgeConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let config = Arc::new(config);
        let (outbound, frames) = Outbound::new(config.timeouts.client_request);
        let notifier: Arc<dyn Notifier> = outbound.clone();
        let broker = PermissionBroker::new(notifier.clone(), config.timeouts.permission);
        let env = SessionEnv::new(config.clone(), broker.clone(), notifier);

        let bridge = Self {
            pool: SessionPool::new(env.clone()),
            sessions: SessionManager::new(),
            config,
            broker,
            outbound,
            env,
        };
        (Arc::new(bridge), frames)
    }

    pub fn config(&self) -> &Arc<BridgeConfig> {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn broker(&self) -> &Arc<PermissionBroker> {
        &self.broker
    }

    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    pub fn env(&self) -> &SessionEnv {
        &self.env
    }

    /// Name reported by `initialize`
    pub fn name(&self) -> &'static str {
        "claude-code-bridge"
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Stop every persistent session and drop outstanding client requests
    pub async fn shutdown(&self) {
        self.pool.shutdown_all().await;
        for session_id in self.sessions.session_ids() {
            self.broker.forget_session(&session_id);
        }
        self.outbound.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_new() {
        let (bridge, _frames) = Bridge::new(BridgeConfig::default());
        assert_eq!(bridge.name(), "claude-code-bridge");
        assert_eq!(bridge.sessions().session_count(), 0);
        assert!(bridge.pool().is_empty());
        assert_eq!(bridge.pool().capacity(), 3);
    }

    #[test]
    fn test_bridge_pool_capacity_floor() {
        let config = BridgeConfig {
            max_persistent_sessions: 0,
            ..BridgeConfig::default()
        };
        let (bridge, _frames) = Bridge::new(config);
        assert_eq!(bridge.pool().capacity(), 1);
    }
}
