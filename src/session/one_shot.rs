//! One-shot turns
//!
//! Each turn spawns a fresh agent, writes the prompt and streams events until
//! the terminal `result`, then tears the process down. The agent conversation
//! id reported by `system/init` is bound to the session so the next turn
//! resumes it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::env::SessionEnv;
use super::events::{EventContext, Handled};
use super::session::Session;
use super::state::TurnOutcome;
use crate::process::{AgentInput, AgentProcess, ProcessEvent, SpawnOptions};
use crate::protocol::{TurnResult, input};
use crate::types::{BridgeError, Result, SessionMode, SessionUpdate, StopReason, TokenUsage};

/// Releases the session's one-shot slot
struct TurnGuard<'a>(&'a Session);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.end_one_shot();
    }
}

enum Finish {
    Result(TurnResult),
    Cancelled,
}

/// Run one prompt to completion in a fresh agent process
///
/// Fails with `SessionBusy` if the session already runs a one-shot turn or
/// has a persistent process attached.
pub async fn run_one_shot(
    env: &SessionEnv,
    session: &Arc<Session>,
    prompt: &str,
    mut options: SpawnOptions,
) -> Result<TurnOutcome> {
    if prompt.trim().is_empty() {
        return Err(BridgeError::EmptyPrompt);
    }
    let cancel = session.begin_one_shot()?;
    let _guard = TurnGuard(session);
    session.touch(SessionMode::OneShot);

    if options.resume.is_none() && !options.continue_conversation {
        options.resume = session.agent_session_id();
    }

    let start = std::time::Instant::now();
    let (process, events) = env
        .spawn_agent(&session.session_id, session.cwd(), &options)
        .await?;

    let mut ctx = EventContext::new(
        session.session_id.clone(),
        session.cwd.clone(),
        env.broker.clone(),
        env.notifier.clone(),
    );

    let finish = match process.send_json(&input::user_message(prompt)).await {
        Ok(()) => drive(&mut ctx, session, &process, events, &cancel).await,
        Err(e) => Err(e),
    };

    // Late permission requests die with the process
    env.broker.cancel_session(&session.session_id);
    if process.is_running() {
        process.terminate(env.config.timeouts.stop_grace).await;
    }

    let outcome = match finish? {
        Finish::Result(result) => {
            if let Some(id) = &result.session_id {
                session.bind_agent_session_id(id.clone());
            }
            let total = result.usage.map(|usage| session.usage().add(&usage));
            ctx.report_result(&result, total);
            TurnOutcome {
                stop_reason: StopReason::from_result_subtype(&result.subtype, result.is_error),
                is_error: result.is_error,
                turn_usage: result.usage.unwrap_or_default(),
                total_usage: total.unwrap_or_else(|| session.usage().get()),
                result: result.result,
            }
        }
        Finish::Cancelled => {
            ctx.notify(SessionUpdate::TurnComplete {
                stop_reason: StopReason::Cancelled,
                is_error: false,
                result: None,
                duration_ms: None,
                cost_usd: None,
            });
            TurnOutcome {
                stop_reason: StopReason::Cancelled,
                is_error: false,
                turn_usage: TokenUsage::default(),
                total_usage: session.usage().get(),
                result: None,
            }
        }
    };

    tracing::info!(
        session_id = %session.session_id,
        pid = process.pid(),
        stop_reason = ?outcome.stop_reason,
        elapsed_ms = start.elapsed().as_millis(),
        "One-shot turn finished"
    );
    Ok(outcome)
}

async fn drive(
    ctx: &mut EventContext,
    session: &Session,
    process: &Arc<AgentProcess>,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    cancel: &CancellationToken,
) -> Result<Finish> {
    let mut fatal: Option<BridgeError> = None;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(session_id = %session.session_id, "One-shot turn cancelled");
                return Ok(Finish::Cancelled);
            }
            event = events.recv() => event,
        };
        let Some(event) = event else {
            return Err(BridgeError::ProcessExited(
                "agent event stream ended".to_string(),
            ));
        };

        match ctx.handle(event, process).await {
            Handled::Init(Some(id)) => session.bind_agent_session_id(id),
            Handled::Result(result) => return Ok(Finish::Result(result)),
            Handled::Fatal(e) => fatal = Some(e),
            Handled::Exited(exit) => {
                // A fatal stderr condition was already reported
                if let Some(error) = fatal.take() {
                    return Err(error);
                }
                let error = BridgeError::ProcessExited(format!("{} before a result", exit));
                ctx.notify(SessionUpdate::error(error.notification_code(), error.to_string()));
                return Err(error);
            }
            Handled::Init(None) | Handled::Forwarded => {}
        }
    }
}
