//! Bounded pool of live persistent sessions
//!
//! Membership is a plain mutex-guarded map; it is never held across an
//! `.await`. Starting, stopping and eviction happen after the lock is
//! released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use super::env::SessionEnv;
use super::persistent::{PersistentSession, SessionStatus};
use super::session::Session;
use crate::process::SpawnOptions;
use crate::types::{ClientNotification, CloseReason, Result};

/// Id of the least recently active member
pub fn select_lru<'a, I>(members: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, Instant)>,
{
    members
        .into_iter()
        .min_by_key(|(_, last_activity)| *last_activity)
        .map(|(id, _)| id.to_string())
}

#[derive(Debug)]
pub struct SessionPool {
    members: Mutex<HashMap<String, Arc<PersistentSession>>>,
    capacity: usize,
    env: SessionEnv,
}

impl SessionPool {
    pub fn new(env: SessionEnv) -> Self {
        let capacity = env.config.max_persistent_sessions.max(1);
        Self {
            members: Mutex::new(HashMap::new()),
            capacity,
            env,
        }
    }

    fn members(&self) -> MutexGuard<'_, HashMap<String, Arc<PersistentSession>>> {
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live (not closed) members
    pub fn len(&self) -> usize {
        self.members().values().filter(|m| !m.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live member for a session
    pub fn get(&self, session_id: &str) -> Option<Arc<PersistentSession>> {
        self.members()
            .get(session_id)
            .filter(|m| !m.is_closed())
            .cloned()
    }

    /// The session's started persistent member, creating it if needed
    ///
    /// At capacity the least recently active member is stopped first. A
    /// closed member is replaced. `options` apply only when a new member is
    /// created. Fails with `SessionBusy` while the session runs a one-shot
    /// turn.
    pub async fn get_or_start(
        &self,
        session: &Arc<Session>,
        options: SpawnOptions,
    ) -> Result<Arc<PersistentSession>> {
        let (member, victim) = {
            let mut members = self.members();
            members.retain(|_, m| !m.is_closed());

            match members.get(&session.session_id) {
                Some(existing) => (existing.clone(), None),
                None => {
                    let member =
                        PersistentSession::new(session.clone(), self.env.clone(), options);
                    // Checked and set under the session lock, against one-shot turns
                    session.attach_persistent(member.member_id())?;
                    let victim = if members.len() >= self.capacity {
                        select_lru(
                            members
                                .iter()
                                .map(|(id, m)| (id.as_str(), m.last_activity())),
                        )
                        .and_then(|id| members.remove(&id))
                    } else {
                        None
                    };
                    members.insert(session.session_id.clone(), member.clone());
                    (member, victim)
                }
            }
        };

        if let Some(victim) = victim {
            tracing::info!(
                evicted = %victim.session_id(),
                admitted = %session.session_id,
                capacity = self.capacity,
                "Evicting least recently used persistent session"
            );
            victim.close(CloseReason::Evicted).await;
            self.env.notifier.notify(ClientNotification::Evicted {
                session_id: victim.session_id().to_string(),
            });
        }

        if let Err(e) = member.start().await {
            self.remove_member(&session.session_id, &member);
            return Err(e);
        }
        Ok(member)
    }

    fn remove_member(&self, session_id: &str, member: &Arc<PersistentSession>) {
        let mut members = self.members();
        if members
            .get(session_id)
            .is_some_and(|m| Arc::ptr_eq(m, member))
        {
            members.remove(session_id);
        }
    }

    /// Stop and drop a session's member
    pub async fn remove(&self, session_id: &str) -> bool {
        let member = self.members().remove(session_id);
        match member {
            Some(member) => {
                member.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every member
    pub async fn shutdown_all(&self) {
        let members: Vec<_> = self.members().drain().map(|(_, m)| m).collect();
        if members.is_empty() {
            return;
        }
        tracing::info!(count = members.len(), "Stopping persistent sessions");
        futures::future::join_all(members.iter().map(|m| m.stop())).await;
    }

    /// Status of every member, closed ones included
    pub fn snapshot(&self) -> Vec<SessionStatus> {
        let members: Vec<_> = self.members().values().cloned().collect();
        let mut statuses: Vec<SessionStatus> = members.iter().map(|m| m.status()).collect();
        statuses.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        statuses
    }
}
