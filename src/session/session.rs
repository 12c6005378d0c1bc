//! Registry session record
//!
//! A session is the client's conversation handle. It outlives any single
//! agent process: one-shot turns and a pooled persistent process both run
//! against the same record, which carries the bound agent conversation id and
//! cumulative usage.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::types::{BridgeError, Result, SessionInfo, SessionMode};

use super::usage::UsageTracker;

#[derive(Debug)]
struct Meta {
    title: String,
    updated_at: DateTime<Utc>,
    agent_session_id: Option<String>,
    /// Cancels the in-flight one-shot turn
    one_shot: Option<CancellationToken>,
    /// Pool member that owns the persistent process
    persistent_member: Option<u64>,
    last_mode: Option<SessionMode>,
}

/// A client conversation
#[derive(Debug)]
pub struct Session {
    /// Bridge-level session id
    pub session_id: String,
    /// Working directory of the agent
    pub cwd: PathBuf,
    created_at: DateTime<Utc>,
    meta: Mutex<Meta>,
    usage: UsageTracker,
}

impl Session {
    pub fn new(session_id: String, title: String, cwd: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            cwd,
            created_at: now,
            meta: Mutex::new(Meta {
                title,
                updated_at: now,
                agent_session_id: None,
                one_shot: None,
                persistent_member: None,
                last_mode: None,
            }),
            usage: UsageTracker::new(),
        }
    }

    fn meta(&self) -> MutexGuard<'_, Meta> {
        // Meta updates cannot panic midway, so a poisoned lock still holds valid data
        self.meta.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn title(&self) -> String {
        self.meta().title.clone()
    }

    pub fn rename(&self, title: impl Into<String>) {
        let mut meta = self.meta();
        meta.title = title.into();
        meta.updated_at = Utc::now();
    }

    pub fn agent_session_id(&self) -> Option<String> {
        self.meta().agent_session_id.clone()
    }

    /// Record the agent's resumable conversation id
    pub fn bind_agent_session_id(&self, id: impl Into<String>) {
        let id = id.into();
        let mut meta = self.meta();
        if meta.agent_session_id.as_deref() != Some(id.as_str()) {
            tracing::debug!(
                session_id = %self.session_id,
                agent_session_id = %id,
                "Bound agent session id"
            );
            meta.agent_session_id = Some(id);
            meta.updated_at = Utc::now();
        }
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn last_mode(&self) -> Option<SessionMode> {
        self.meta().last_mode
    }

    pub fn touch(&self, mode: SessionMode) {
        let mut meta = self.meta();
        meta.updated_at = Utc::now();
        meta.last_mode = Some(mode);
    }

    /// Claim the session for a one-shot turn
    ///
    /// Fails with `SessionBusy` while another one-shot turn is running or a
    /// persistent process is attached.
    pub fn begin_one_shot(&self) -> Result<CancellationToken> {
        let mut meta = self.meta();
        if meta.one_shot.is_some() || meta.persistent_member.is_some() {
            return Err(BridgeError::session_busy(&self.session_id));
        }
        let token = CancellationToken::new();
        meta.one_shot = Some(token.clone());
        Ok(token)
    }

    pub fn end_one_shot(&self) {
        self.meta().one_shot = None;
    }

    /// Claim the session for a persistent pool member
    ///
    /// Fails with `SessionBusy` while a one-shot turn is running. The claim
    /// moves to the newest member and is held until that member closes.
    pub fn attach_persistent(&self, member_id: u64) -> Result<()> {
        let mut meta = self.meta();
        if meta.one_shot.is_some() {
            return Err(BridgeError::session_busy(&self.session_id));
        }
        meta.persistent_member = Some(member_id);
        Ok(())
    }

    /// Release the persistent claim if `member_id` still holds it
    pub fn detach_persistent(&self, member_id: u64) {
        let mut meta = self.meta();
        if meta.persistent_member == Some(member_id) {
            meta.persistent_member = None;
        }
    }

    /// Cancel the running one-shot turn, if any
    pub fn cancel_one_shot(&self) -> bool {
        match self.meta().one_shot.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn info(&self) -> SessionInfo {
        let meta = self.meta();
        SessionInfo {
            session_id: self.session_id.clone(),
            title: meta.title.clone(),
            cwd: self.cwd.clone(),
            created_at: self.created_at,
            updated_at: meta.updated_at,
            agent_session_id: meta.agent_session_id.clone(),
        }
    }
}
