//! Shared collaborators of every session and the spawn path they use

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::permissions::PermissionBroker;
use crate::process::{AgentCommand, AgentProcess, ProcessEvent, SpawnOptions, preflight};
use crate::types::{BridgeConfig, Notifier, Result};

/// Configuration, permission broker and client notifier
#[derive(Debug, Clone)]
pub struct SessionEnv {
    pub config: Arc<BridgeConfig>,
    pub broker: Arc<PermissionBroker>,
    pub notifier: Arc<dyn Notifier>,
}

impl SessionEnv {
    pub fn new(
        config: Arc<BridgeConfig>,
        broker: Arc<PermissionBroker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            broker,
            notifier,
        }
    }

    /// Preflight, then spawn an agent for `session_id` in `cwd`
    ///
    /// Tools approved through the fallback permission path are added to the
    /// allow list.
    pub async fn spawn_agent(
        &self,
        session_id: &str,
        cwd: &Path,
        options: &SpawnOptions,
    ) -> Result<(Arc<AgentProcess>, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let binary = preflight(&self.config.agent, self.config.timeouts.version_check).await?;

        let mut options = options.clone();
        options.allow_tools(self.broker.fallback_allowed_tools(session_id));

        let command = AgentCommand::new(&binary, cwd, &options, &self.config.agent);
        let (process, events) = AgentProcess::spawn(&command, self.config.timeouts.stop_grace)?;
        tracing::debug!(
            session_id = %session_id,
            pid = process.pid(),
            resume = ?options.resume,
            "Agent spawned for session"
        );
        Ok((Arc::new(process), events))
    }
}
