//! Session registry
//!
//! Uses DashMap for concurrent access with entry API to avoid deadlocks.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::types::{BridgeError, Result, SessionInfo};

use super::session::Session;

/// Title given to sessions created without one
pub const DEFAULT_TITLE: &str = "New session";

/// In-memory registry of client sessions
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create and store a session
    ///
    /// A missing id is generated (UUID v4); a missing title defaults to
    /// [`DEFAULT_TITLE`].
    pub fn create_session(
        &self,
        session_id: Option<String>,
        title: Option<String>,
        cwd: PathBuf,
    ) -> Result<Arc<Session>> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        match self.sessions.entry(session_id.clone()) {
            dashmap::Entry::Occupied(_) => Err(BridgeError::session_already_exists(session_id)),
            dashmap::Entry::Vacant(vacant) => {
                let title = title.unwrap_or_else(|| DEFAULT_TITLE.to_string());
                let session = Arc::new(Session::new(session_id, title, cwd));
                vacant.insert(Arc::clone(&session));
                tracing::info!(
                    session_id = %session.session_id,
                    cwd = %session.cwd.display(),
                    "Session created"
                );
                Ok(session)
            }
        }
    }

    /// Existing session, or a new one with that id
    pub fn get_or_create(&self, session_id: &str, cwd: PathBuf) -> Arc<Session> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = %session_id, "Creating session implicitly");
                Arc::new(Session::new(
                    session_id.to_string(),
                    DEFAULT_TITLE.to_string(),
                    cwd,
                ))
            })
            .clone()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|r| Arc::clone(&r))
    }

    /// Get an existing session or return `SessionNotFound`
    pub fn get_session_or_error(&self, session_id: &str) -> Result<Arc<Session>> {
        self.get_session(session_id)
            .ok_or_else(|| BridgeError::session_not_found(session_id))
    }

    pub fn rename_session(&self, session_id: &str, title: &str) -> Result<SessionInfo> {
        let session = self.get_session_or_error(session_id)?;
        session.rename(title);
        Ok(session.info())
    }

    pub fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(session_id).map(|(_, v)| v)
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshots of all sessions, most recently updated first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.iter().map(|r| r.info()).collect();
        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        infos
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }
}
