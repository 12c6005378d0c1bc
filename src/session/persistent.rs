//! Persistent sessions
//!
//! One agent process kept alive across turns. A pump task consumes the
//! process's events in order and drives the [`SessionCore`] state machine;
//! a watchdog task enforces the idle timeout and checks liveness. Abnormal
//! exits are recovered by re-spawning with `--resume`, replaying messages
//! sent while the session was down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::env::SessionEnv;
use super::events::{EventContext, Handled};
use super::session::Session;
use super::state::{CrashDecision, SendAction, SessionCore, SessionState, Transition, TurnOutcome};
use super::usage::UsageTracker;
use crate::process::{AgentInput, AgentProcess, ProcessEvent, ProcessExit, SpawnOptions};
use crate::protocol::{TurnResult, input};
use crate::types::{
    BridgeError, ClientNotification, CloseReason, Result, SessionMode, StopReason, TokenUsage,
};

type Events = mpsc::UnboundedReceiver<ProcessEvent>;

/// Snapshot returned by `session/status`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub message_count: u64,
    pub usage: TokenUsage,
    pub crash_count: u32,
    pub recovering: bool,
    pub buffered_messages: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// A long-lived agent conversation
#[derive(Debug)]
pub struct PersistentSession {
    session: Arc<Session>,
    env: SessionEnv,
    /// Fixed at creation; recovery only changes `resume`
    options: SpawnOptions,
    core: Mutex<SessionCore>,
    process: Mutex<Option<Arc<AgentProcess>>>,
    usage: UsageTracker,
    start_gate: tokio::sync::Mutex<()>,
    /// Stops the watchdog and any pending recovery backoff
    shutdown: CancellationToken,
    closed_by: OnceLock<CloseReason>,
    /// Identifies this member's claim on the session record
    member_id: u64,
}

static NEXT_MEMBER_ID: AtomicU64 = AtomicU64::new(1);

impl PersistentSession {
    pub fn new(session: Arc<Session>, env: SessionEnv, options: SpawnOptions) -> Arc<Self> {
        let mut core = SessionCore::new();
        if let Some(id) = options.resume.clone().or_else(|| session.agent_session_id()) {
            core.bind_resume_id(id);
        }
        Arc::new(Self {
            session,
            env,
            options,
            core: Mutex::new(core),
            process: Mutex::new(None),
            usage: UsageTracker::new(),
            start_gate: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            closed_by: OnceLock::new(),
            member_id: NEXT_MEMBER_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    // Core operations cannot panic midway, so a poisoned lock still holds valid state
    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn process_slot(&self) -> MutexGuard<'_, Option<Arc<AgentProcess>>> {
        self.process.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_process(&self) -> Option<Arc<AgentProcess>> {
        self.process_slot().clone()
    }

    pub fn state(&self) -> SessionState {
        self.core().state()
    }

    pub fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    /// Why the session closed, once it has
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed_by.get().copied()
    }

    pub fn last_activity(&self) -> Instant {
        self.core().last_activity()
    }

    /// Bind the agent conversation to resume; ignored once started
    pub fn set_resume_session_id(&self, id: impl Into<String>) -> bool {
        let bound = self.core().bind_resume_id(id.into());
        if !bound {
            tracing::debug!(session_id = %self.session_id(), "Resume id ignored after start");
        }
        bound
    }

    pub fn status(&self) -> SessionStatus {
        let pid = self.current_process().map(|p| p.pid());
        let core = self.core();
        SessionStatus {
            session_id: self.session.session_id.clone(),
            state: core.state(),
            message_count: core.message_count(),
            usage: self.usage.get(),
            crash_count: core.crash_count(),
            recovering: core.is_recovering(),
            buffered_messages: core.buffered(),
            started_at: core.started_at(),
            last_activity_at: core.last_activity_at(),
            agent_session_id: core.agent_session_id().map(String::from),
            pid,
        }
    }

    fn emit_transition(&self, transition: Option<Transition>) {
        if let Some((previous, state)) = transition {
            tracing::debug!(
                session_id = %self.session_id(),
                from = %previous,
                to = %state,
                "Session state changed"
            );
            self.env.notifier.notify(ClientNotification::StateChanged {
                session_id: self.session.session_id.clone(),
                previous,
                state,
            });
        }
    }

    fn event_context(self: &Arc<Self>) -> EventContext {
        let weak: Weak<Self> = Arc::downgrade(self);
        EventContext::new(
            self.session.session_id.clone(),
            self.session.cwd.clone(),
            self.env.broker.clone(),
            self.env.notifier.clone(),
        )
        .with_retry(Arc::new(move |tool: String| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let text = format!("Permission to use {} has been granted. Please retry.", tool);
                if let Err(e) = this.send_message(&text).await {
                    tracing::debug!(session_id = %this.session_id(), error = %e, "Fallback retry not sent");
                }
            });
        }))
    }

    /// Spawn the agent and wait for `system/init`
    ///
    /// Idempotent: a started session returns immediately, concurrent callers
    /// wait for the first start to finish.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _gate = self.start_gate.lock().await;
        {
            let core = self.core();
            if core.is_closed() {
                return Err(BridgeError::SessionClosed(self.session.session_id.clone()));
            }
            if core.is_started() {
                return Ok(());
            }
        }

        let mut ctx = self.event_context();
        let resume = self.core().agent_session_id().map(String::from);
        let started = Instant::now();
        match self.launch(&mut ctx, resume).await {
            Ok((process, events)) => {
                self.core().mark_started();
                *self.process_slot() = Some(process.clone());
                tracing::info!(
                    session_id = %self.session_id(),
                    pid = process.pid(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Persistent session started"
                );
                tokio::spawn(Arc::clone(self).pump(ctx, process, events));
                tokio::spawn(Arc::clone(self).watchdog());
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id(), error = %e, "Persistent session failed to start");
                let transition = self.core().close();
                self.session.detach_persistent(self.member_id);
                self.shutdown.cancel();
                self.emit_transition(transition);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        ctx: &mut EventContext,
        resume: Option<String>,
    ) -> Result<(Arc<AgentProcess>, Events)> {
        let mut options = self.options.clone();
        if resume.is_some() {
            options.resume = resume;
            options.continue_conversation = false;
        }
        let (process, mut events) = self
            .env
            .spawn_agent(self.session_id(), self.session.cwd(), &options)
            .await?;

        let init_timeout = self.env.config.timeouts.init;
        let deadline = Instant::now() + init_timeout;
        let mut fatal = None;
        loop {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return Err(BridgeError::ProcessExited(
                        "agent event stream ended before init".to_string(),
                    ));
                }
                Err(_) => {
                    process.terminate(self.env.config.timeouts.stop_grace).await;
                    return Err(BridgeError::InitTimeout(init_timeout.as_millis() as u64));
                }
            };
            match ctx.handle(event, &process).await {
                Handled::Init(id) => {
                    self.on_init(id);
                    return Ok((process, events));
                }
                Handled::Fatal(e) => fatal = Some(e),
                Handled::Exited(exit) => {
                    return Err(fatal.unwrap_or_else(|| {
                        BridgeError::ProcessExited(format!("{} before init", exit))
                    }));
                }
                Handled::Result(_) => {
                    tracing::debug!(session_id = %self.session_id(), "Result before init ignored");
                }
                Handled::Forwarded => {}
            }
        }
    }

    fn on_init(&self, id: Option<String>) {
        self.core().on_init(id.clone());
        if let Some(id) = id {
            self.session.bind_agent_session_id(id);
        }
    }

    /// Send a user message
    ///
    /// The receiver resolves when the matching `result` arrives and is dropped
    /// if the session closes or the process crashes first. While recovering
    /// the message is buffered and replayed after the re-spawn.
    pub async fn send_message(&self, text: &str) -> Result<oneshot::Receiver<TurnOutcome>> {
        if text.trim().is_empty() {
            return Err(BridgeError::EmptyPrompt);
        }
        let (tx, rx) = oneshot::channel();
        let action = self.core().on_send(text, tx)?;
        self.session.touch(SessionMode::Persistent);

        match action {
            SendAction::Buffered => {
                tracing::debug!(session_id = %self.session_id(), "Message buffered during recovery");
            }
            SendAction::Deliver(transition) => {
                self.emit_transition(transition);
                let process = self.current_process().ok_or(BridgeError::StdinClosed)?;
                process.send_json(&input::user_message(text)).await?;
            }
        }
        Ok(rx)
    }

    /// Close the session, marking it with `reason`; returns false if already closed
    fn finish(&self, reason: CloseReason, fallback_to_one_shot: bool) -> bool {
        let transition = self.core().close();
        if transition.is_none() {
            return false;
        }
        if self.closed_by.set(reason).is_err() {
            tracing::trace!(session_id = %self.session_id(), "Close reason already recorded");
        }
        self.session.detach_persistent(self.member_id);
        self.shutdown.cancel();
        self.env.broker.cancel_session(self.session_id());
        self.emit_transition(transition);
        self.env.notifier.notify(ClientNotification::Closed {
            session_id: self.session.session_id.clone(),
            reason,
            fallback_to_one_shot,
        });
        tracing::info!(
            session_id = %self.session_id(),
            reason = ?reason,
            fallback_to_one_shot,
            "Persistent session closed"
        );
        true
    }

    /// Graceful stop: SIGTERM, SIGKILL after the grace period
    pub async fn stop(&self) {
        self.close(CloseReason::Stopped).await;
    }

    pub async fn close(&self, reason: CloseReason) {
        if !self.finish(reason, false) {
            return;
        }
        let process = self.process_slot().take();
        if let Some(process) = process {
            process.terminate(self.env.config.timeouts.stop_grace).await;
        }
    }

    /// Immediate SIGKILL
    pub async fn kill(&self) {
        if !self.finish(CloseReason::Stopped, false) {
            return;
        }
        let process = self.process_slot().take();
        if let Some(process) = process {
            process.kill().await;
        }
    }

    async fn pump(
        self: Arc<Self>,
        mut ctx: EventContext,
        mut process: Arc<AgentProcess>,
        mut events: Events,
    ) {
        loop {
            let handled = match events.recv().await {
                Some(event) => ctx.handle(event, &process).await,
                None => Handled::Exited(ProcessExit::unknown()),
            };
            self.core().touch();

            match handled {
                Handled::Init(id) => self.on_init(id),
                Handled::Result(result) => self.on_result(&ctx, result),
                Handled::Fatal(e) => {
                    tracing::warn!(session_id = %self.session_id(), error = %e, "Fatal agent error");
                }
                Handled::Exited(exit) => {
                    let Some(attempt) = self.on_exit(exit) else {
                        break;
                    };
                    match self.recover(&mut ctx, attempt).await {
                        Some((next, next_events)) => {
                            process = next;
                            events = next_events;
                        }
                        None => break,
                    }
                }
                Handled::Forwarded => {}
            }
        }
        tracing::debug!(session_id = %self.session_id(), "Session event loop finished");
    }

    fn on_result(&self, ctx: &EventContext, result: TurnResult) {
        let total = result.usage.map(|usage| {
            self.session.usage().add(&usage);
            self.usage.add(&usage)
        });
        let (transition, waiter) = self.core().on_result();
        self.emit_transition(transition);
        ctx.report_result(&result, total);

        if let Some(waiter) = waiter {
            drop(waiter.send(TurnOutcome {
                stop_reason: StopReason::from_result_subtype(&result.subtype, result.is_error),
                is_error: result.is_error,
                turn_usage: result.usage.unwrap_or_default(),
                total_usage: total.unwrap_or_else(|| self.usage.get()),
                result: result.result,
            }));
        }
    }

    /// Returns the recovery attempt to make, if any
    fn on_exit(&self, exit: ProcessExit) -> Option<u32> {
        self.process_slot().take();
        let decision = {
            let mut core = self.core();
            if core.is_closed() {
                return None;
            }
            if exit.is_intentional() {
                None
            } else {
                Some(core.record_crash(self.env.config.timeouts.max_crash_retries))
            }
        };

        match decision {
            None => {
                self.finish(CloseReason::Exited, false);
                None
            }
            Some(CrashDecision::Recover { attempt }) => {
                tracing::warn!(session_id = %self.session_id(), exit = %exit, attempt, "Agent crashed, recovering");
                Some(attempt)
            }
            Some(CrashDecision::Abandon) => {
                tracing::error!(session_id = %self.session_id(), exit = %exit, "Agent crashed, giving up");
                self.finish(CloseReason::Crashed, true);
                None
            }
        }
    }

    async fn recover(
        &self,
        ctx: &mut EventContext,
        mut attempt: u32,
    ) -> Option<(Arc<AgentProcess>, Events)> {
        let timeouts = &self.env.config.timeouts;
        loop {
            self.env.notifier.notify(ClientNotification::Recovering {
                session_id: self.session.session_id.clone(),
                attempt,
                max_attempts: timeouts.max_crash_retries,
            });
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(timeouts.crash_backoff) => {}
            }

            ctx.reset();
            let resume = self.core().agent_session_id().map(String::from);
            let error = match self.launch(ctx, resume).await {
                Ok((process, events)) => {
                    *self.process_slot() = Some(process.clone());
                    // Stopped while the re-spawn was in flight
                    if self.is_closed() {
                        let orphan = self.process_slot().take();
                        if let Some(orphan) = orphan {
                            orphan.terminate(timeouts.stop_grace).await;
                        }
                        return None;
                    }

                    let (replay, transition) = self.core().finish_recovery();
                    self.emit_transition(transition);
                    for text in &replay {
                        if let Err(e) = process.send_json(&input::user_message(text)).await {
                            tracing::warn!(session_id = %self.session_id(), error = %e, "Replay interrupted");
                            break;
                        }
                    }
                    let agent_session_id = self.core().agent_session_id().map(String::from);
                    tracing::info!(
                        session_id = %self.session_id(),
                        pid = process.pid(),
                        replayed = replay.len(),
                        "Persistent session recovered"
                    );
                    self.env.notifier.notify(ClientNotification::Recovered {
                        session_id: self.session.session_id.clone(),
                        agent_session_id,
                        replayed: replay.len(),
                    });
                    return Some((process, events));
                }
                Err(e) => e,
            };

            tracing::warn!(session_id = %self.session_id(), attempt, error = %error, "Recovery attempt failed");
            if self.is_closed() {
                return None;
            }
            let decision = self.core().record_crash(timeouts.max_crash_retries);
            match decision {
                CrashDecision::Recover { attempt: next } => attempt = next,
                CrashDecision::Abandon => {
                    self.finish(CloseReason::Crashed, true);
                    return None;
                }
            }
        }
    }

    async fn watchdog(self: Arc<Self>) {
        let idle = self.env.config.timeouts.idle;
        let period = self.env.config.timeouts.health_check;
        let mut health = tokio::time::interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let idle_deadline = self.last_activity() + idle;
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(idle_deadline) => {
                    let expired = self.last_activity() + idle <= Instant::now();
                    if expired {
                        tracing::info!(
                            session_id = %self.session_id(),
                            idle_secs = idle.as_secs(),
                            "Persistent session idle, stopping"
                        );
                        self.close(CloseReason::IdleTimeout).await;
                        break;
                    }
                }
                _ = health.tick() => {
                    let Some(process) = self.current_process() else {
                        continue;
                    };
                    // An observed exit is handled by the event loop
                    if !process.check_alive().await && process.exit_status().is_none() {
                        tracing::warn!(
                            session_id = %self.session_id(),
                            pid = process.pid(),
                            "Agent process failed liveness check"
                        );
                        self.close(CloseReason::Unhealthy).await;
                        break;
                    }
                }
            }
        }
    }
}
