//! Persistent session state machine
//!
//! Pure bookkeeping with no I/O: the owning [`PersistentSession`] holds a
//! [`SessionCore`] behind a mutex, applies these operations, and emits the
//! resulting notifications after releasing the lock.
//!
//! [`PersistentSession`]: super::PersistentSession

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::types::{BridgeError, Result, StopReason, TokenUsage};

/// Lifecycle state of a persistent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Started (or not yet started), no message sent
    Idle,
    /// A turn is running
    Processing,
    /// Last turn finished, process alive
    Waiting,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether `self → to` is a legal transition
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle, Processing) | (Processing, Waiting) | (Waiting, Processing)
        ) || (to == Closed && self != Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Waiting => "waiting",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change to report
pub type Transition = (SessionState, SessionState);

/// How a turn ended, delivered to whoever sent the message
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub stop_reason: StopReason,
    pub is_error: bool,
    /// Usage of this turn (zero when the agent reported none)
    pub turn_usage: TokenUsage,
    /// Session total after this turn
    pub total_usage: TokenUsage,
    pub result: Option<String>,
}

/// What `send_message` should do after updating the core
#[derive(Debug, PartialEq, Eq)]
pub enum SendAction {
    /// Write to the process now
    Deliver(Option<Transition>),
    /// Held until recovery finishes
    Buffered,
}

/// Reaction to an abnormal exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashDecision {
    Recover { attempt: u32 },
    Abandon,
}

type Waiter = oneshot::Sender<TurnOutcome>;

/// Mutable state of one persistent session
#[derive(Debug)]
pub struct SessionCore {
    state: SessionState,
    started: bool,
    message_count: u64,
    started_at: Option<DateTime<Utc>>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    crash_count: u32,
    recovering: bool,
    agent_session_id: Option<String>,
    /// Waiters for messages already written to the process
    in_flight: VecDeque<Waiter>,
    /// Messages sent while recovering
    replay: VecDeque<(String, Waiter)>,
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCore {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            started: false,
            message_count: 0,
            started_at: None,
            last_activity: Instant::now(),
            last_activity_at: Utc::now(),
            crash_count: 0,
            recovering: false,
            agent_session_id: None,
            in_flight: VecDeque::new(),
            replay: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn crash_count(&self) -> u32 {
        self.crash_count
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn agent_session_id(&self) -> Option<&str> {
        self.agent_session_id.as_deref()
    }

    pub fn buffered(&self) -> usize {
        self.replay.len()
    }

    /// Reset the idle clock
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    /// Apply a transition; `None` if already there or not allowed
    pub fn transition(&mut self, to: SessionState) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        if !self.state.can_transition(to) {
            tracing::warn!(from = %self.state, to = %to, "Ignoring illegal session transition");
            return None;
        }
        let previous = self.state;
        self.state = to;
        Some((previous, to))
    }

    /// Bind a resumable id before start; after start the init-reported id wins
    pub fn bind_resume_id(&mut self, id: String) -> bool {
        if self.started {
            return false;
        }
        self.agent_session_id = Some(id);
        true
    }

    /// Process reported its conversation id
    pub fn on_init(&mut self, id: Option<String>) {
        if let Some(id) = id {
            self.agent_session_id = Some(id);
        }
        self.touch();
    }

    pub fn mark_started(&mut self) {
        self.started = true;
        self.started_at = Some(Utc::now());
        self.touch();
    }

    /// Account for an outgoing message
    pub fn on_send(&mut self, text: &str, waiter: Waiter) -> Result<SendAction> {
        if self.is_closed() {
            return Err(BridgeError::SessionClosed("persistent session is closed".to_string()));
        }
        if !self.started {
            return Err(BridgeError::SessionNotStarted(
                "persistent session not started".to_string(),
            ));
        }
        self.message_count += 1;
        self.touch();

        let transition = self.transition(SessionState::Processing);
        if self.recovering {
            self.replay.push_back((text.to_string(), waiter));
            return Ok(SendAction::Buffered);
        }
        self.in_flight.push_back(waiter);
        Ok(SendAction::Deliver(transition))
    }

    /// A `result` arrived; returns the transition and the waiter it completes
    pub fn on_result(&mut self) -> (Option<Transition>, Option<Waiter>) {
        self.touch();
        let transition = if self.state == SessionState::Processing {
            self.transition(SessionState::Waiting)
        } else {
            None
        };
        (transition, self.in_flight.pop_front())
    }

    /// Abnormal exit: count it and decide whether to recover
    ///
    /// Messages already written to the dead process are failed.
    pub fn record_crash(&mut self, max_retries: u32) -> CrashDecision {
        self.crash_count += 1;
        self.in_flight.clear();
        if self.crash_count <= max_retries && self.agent_session_id.is_some() {
            self.recovering = true;
            CrashDecision::Recover {
                attempt: self.crash_count,
            }
        } else {
            CrashDecision::Abandon
        }
    }

    /// Recovery succeeded: hand back buffered messages in order
    pub fn finish_recovery(&mut self) -> (Vec<String>, Option<Transition>) {
        self.recovering = false;
        self.touch();
        let mut texts = Vec::with_capacity(self.replay.len());
        for (text, waiter) in self.replay.drain(..) {
            texts.push(text);
            self.in_flight.push_back(waiter);
        }
        // The interrupted turn will never produce a result
        let transition = if texts.is_empty() && self.state == SessionState::Processing {
            self.transition(SessionState::Waiting)
        } else {
            None
        };
        (texts, transition)
    }

    /// Close; buffered messages and waiting senders are dropped
    pub fn close(&mut self) -> Option<Transition> {
        self.recovering = false;
        self.replay.clear();
        self.in_flight.clear();
        self.transition(SessionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn waiter() -> (Waiter, oneshot::Receiver<TurnOutcome>) {
        oneshot::channel()
    }

    fn started() -> SessionCore {
        let mut core = SessionCore::new();
        core.mark_started();
        core
    }

    #[test]
    fn test_transition_table() {
        use SessionState::*;
        assert!(Idle.can_transition(Processing));
        assert!(Processing.can_transition(Waiting));
        assert!(Waiting.can_transition(Processing));
        assert!(Idle.can_transition(Closed));
        assert!(Waiting.can_transition(Closed));
        assert!(!Idle.can_transition(Waiting));
        assert!(!Closed.can_transition(Idle));
        assert!(!Closed.can_transition(Closed));
        assert!(!Waiting.can_transition(Idle));
    }

    #[test]
    fn test_idle_to_waiting_refused() {
        let mut core = started();
        assert_eq!(core.transition(SessionState::Waiting), None);
        assert_eq!(core.state(), SessionState::Idle);
    }

    #[test]
    fn test_send_result_cycle() {
        let mut core = started();
        assert_eq!(core.state(), SessionState::Idle);

        let (tx, _rx) = waiter();
        let action = core.on_send("hi", tx).unwrap();
        assert_eq!(
            action,
            SendAction::Deliver(Some((SessionState::Idle, SessionState::Processing)))
        );
        assert_eq!(core.message_count(), 1);

        let (transition, done) = core.on_result();
        assert_eq!(
            transition,
            Some((SessionState::Processing, SessionState::Waiting))
        );
        assert!(done.is_some());

        let (tx, _rx) = waiter();
        assert_eq!(
            core.on_send("again", tx).unwrap(),
            SendAction::Deliver(Some((SessionState::Waiting, SessionState::Processing)))
        );
    }

    #[test]
    fn test_send_while_processing_no_transition() {
        let mut core = started();
        let (tx1, _rx1) = waiter();
        let (tx2, _rx2) = waiter();
        core.on_send("one", tx1).unwrap();
        assert_eq!(core.on_send("two", tx2).unwrap(), SendAction::Deliver(None));
        assert_eq!(core.message_count(), 2);
    }

    #[test]
    fn test_send_before_start_or_after_close() {
        let mut core = SessionCore::new();
        let (tx, _rx) = waiter();
        assert!(matches!(
            core.on_send("x", tx),
            Err(BridgeError::SessionNotStarted(_))
        ));

        let mut core = started();
        core.close();
        let (tx, _rx) = waiter();
        assert!(matches!(core.on_send("x", tx), Err(BridgeError::SessionClosed(_))));
    }

    #[test]
    fn test_resume_binding_only_before_start() {
        let mut core = SessionCore::new();
        assert!(core.bind_resume_id("abc".to_string()));
        assert_eq!(core.agent_session_id(), Some("abc"));

        core.mark_started();
        assert!(!core.bind_resume_id("other".to_string()));
        assert_eq!(core.agent_session_id(), Some("abc"));

        // The id reported by the running agent wins
        core.on_init(Some("from-init".to_string()));
        assert_eq!(core.agent_session_id(), Some("from-init"));
    }

    #[test]
    fn test_crash_budget() {
        let mut core = started();
        assert_eq!(core.record_crash(2), CrashDecision::Abandon);

        let mut core = started();
        core.on_init(Some("agent-1".to_string()));
        assert_eq!(core.record_crash(2), CrashDecision::Recover { attempt: 1 });
        assert!(core.is_recovering());
        assert_eq!(core.record_crash(2), CrashDecision::Recover { attempt: 2 });
        assert_eq!(core.record_crash(2), CrashDecision::Abandon);
        assert_eq!(core.crash_count(), 3);
    }

    #[test]
    fn test_buffered_during_recovery_replayed_in_order() {
        let mut core = started();
        core.on_init(Some("agent-1".to_string()));
        let (tx, mut in_flight_rx) = waiter();
        core.on_send("first", tx).unwrap();
        core.record_crash(2);
        // The message lost with the process is failed
        assert!(in_flight_rx.try_recv().is_err());

        let (tx_a, _rx_a) = waiter();
        let (tx_b, _rx_b) = waiter();
        assert_eq!(core.on_send("a", tx_a).unwrap(), SendAction::Buffered);
        assert_eq!(core.on_send("b", tx_b).unwrap(), SendAction::Buffered);
        assert_eq!(core.buffered(), 2);

        let (texts, transition) = core.finish_recovery();
        assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(transition, None);
        assert!(!core.is_recovering());
        assert_eq!(core.buffered(), 0);

        let (_, done) = core.on_result();
        assert!(done.is_some());
    }

    #[test]
    fn test_recovery_without_buffer_settles_to_waiting() {
        let mut core = started();
        core.on_init(Some("agent-1".to_string()));
        let (tx, _rx) = waiter();
        core.on_send("first", tx).unwrap();
        core.record_crash(2);
        let (texts, transition) = core.finish_recovery();
        assert!(texts.is_empty());
        assert_eq!(
            transition,
            Some((SessionState::Processing, SessionState::Waiting))
        );
    }

    #[test]
    fn test_close_drops_buffer_and_is_terminal() {
        let mut core = started();
        core.on_init(Some("agent-1".to_string()));
        core.record_crash(2);
        let (tx, mut rx) = waiter();
        core.on_send("a", tx).unwrap();

        assert_eq!(
            core.close(),
            Some((SessionState::Processing, SessionState::Closed))
        );
        assert_eq!(core.buffered(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(core.close(), None);
        assert_eq!(core.transition(SessionState::Processing), None);
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(
            serde_json::to_value(SessionState::Processing).unwrap(),
            "processing"
        );
        assert_eq!(SessionState::Waiting.to_string(), "waiting");
    }
}
