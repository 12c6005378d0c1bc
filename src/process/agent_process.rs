//! One running agent subprocess
//!
//! Spawning starts three tasks: a stdout reader (framed scanner,
//! classifier), a stderr reader (fatal-pattern monitor) and a supervisor that
//! owns the child and handles termination and liveness checks. Everything the
//! process produces arrives in order on a single [`ProcessEvent`] channel; the
//! `Exited` event is always last.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use process_wrap::tokio::{CommandWrap, KillOnDrop, ProcessGroup};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use super::command::AgentCommand;
use super::stderr::{StderrFatal, StderrMonitor};
use super::wrapped_child::{ProcessExit, WrappedChild};
use crate::protocol::AgentEvent;
use crate::stream::StreamJsonScanner;
use crate::types::{BridgeError, Result};

/// Upper bound on waiting for stdout to drain after the process exited
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything observed from one agent process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Classified stdout event
    Agent(AgentEvent),
    /// A balanced stdout span that was not valid JSON
    ParseError { raw: String, error: String },
    /// A raw stderr line
    Stderr(String),
    /// Fatal stderr condition, reported at most once
    Fatal { fatal: StderrFatal, line: String },
    /// The process is gone; always the final event
    Exited(ProcessExit),
}

/// Writes JSON messages to the agent's stdin
#[async_trait]
pub trait AgentInput: Send + Sync + std::fmt::Debug {
    /// Serialize and write one newline-terminated message
    async fn send_json(&self, message: &Value) -> Result<()>;
}

#[derive(Debug)]
enum Control {
    Terminate(Duration),
    Kill,
    CheckAlive(oneshot::Sender<bool>),
}

/// Handle to a running agent process
///
/// Dropping the handle terminates the process.
#[derive(Debug)]
pub struct AgentProcess {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    control_tx: mpsc::UnboundedSender<Control>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl AgentProcess {
    /// Spawn the agent in its own process group
    pub fn spawn(
        command: &AgentCommand,
        stop_grace: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let mut wrapped = CommandWrap::from(command.to_command());
        wrapped.wrap(ProcessGroup::leader());
        wrapped.wrap(KillOnDrop);

        let child = wrapped.spawn().map_err(|e| {
            BridgeError::spawn_failed(format!("{}: {}", command.program.display(), e))
        })?;
        let mut child = WrappedChild::new(child);
        let pid = child.id();

        let stdin = child.inner_mut().stdin().take();
        let stdout = child
            .inner_mut()
            .stdout()
            .take()
            .ok_or_else(|| BridgeError::spawn_failed("stdout not captured"))?;
        let stderr = child
            .inner_mut()
            .stderr()
            .take()
            .ok_or_else(|| BridgeError::spawn_failed("stderr not captured"))?;

        tracing::info!(
            pid = pid,
            program = %command.program.display(),
            cwd = %command.cwd.display(),
            args = ?command.args,
            "Spawned agent process"
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let stdout_task = tokio::spawn(read_stdout(stdout, event_tx.clone(), pid));
        let stderr_task = tokio::spawn(read_stderr(stderr, event_tx.clone(), pid));
        tokio::spawn(supervise(
            child,
            control_rx,
            stop_grace,
            stdout_task,
            stderr_task,
            event_tx,
            exit_tx,
        ));

        Ok((
            Self {
                pid,
                stdin: Mutex::new(stdin),
                control_tx,
                exit_rx,
            },
            event_rx,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status, once the process is gone
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.exit_status().is_none()
    }

    /// Ask the supervisor whether the OS process is alive with stdout open
    pub async fn check_alive(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(Control::CheckAlive(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Wait until the process has exited
    pub async fn wait_exit(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        exit.unwrap_or_else(ProcessExit::unknown)
    }

    /// SIGTERM, then SIGKILL after `grace`; resolves once the process is gone
    pub async fn terminate(&self, grace: Duration) -> ProcessExit {
        self.close_stdin().await;
        // A closed channel means the supervisor already observed the exit
        drop(self.control_tx.send(Control::Terminate(grace)));
        self.wait_exit().await
    }

    /// Kill immediately
    pub async fn kill(&self) -> ProcessExit {
        drop(self.control_tx.send(Control::Kill));
        self.wait_exit().await
    }

    /// Close stdin; the agent treats EOF as end of input
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }
}

#[async_trait]
impl AgentInput for AgentProcess {
    async fn send_json(&self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(BridgeError::StdinClosed)?;
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::warn!(pid = self.pid, error = %e, "Agent stdin write failed");
            guard.take();
            return Err(BridgeError::StdinClosed);
        }
        stdin.flush().await.map_err(|_| BridgeError::StdinClosed)?;
        tracing::trace!(pid = self.pid, bytes = line.len(), "Wrote agent stdin");
        Ok(())
    }
}

fn classify(raw: String, pid: u32) -> ProcessEvent {
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => {
            let event = AgentEvent::from_value(value);
            tracing::trace!(pid = pid, kind = event.kind(), "Agent event");
            ProcessEvent::Agent(event)
        }
        Err(e) => {
            tracing::warn!(pid = pid, error = %e, raw_len = raw.len(), "Dropping malformed agent output");
            ProcessEvent::ParseError {
                raw,
                error: e.to_string(),
            }
        }
    }
}

async fn read_stdout<R>(stdout: R, tx: mpsc::UnboundedSender<ProcessEvent>, pid: u32)
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(stdout, StreamJsonScanner::new());

    while let Some(frame) = framed.next().await {
        match frame {
            Ok(raw) => {
                if tx.send(classify(raw, pid)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(pid = pid, error = %e, "Agent stdout read failed");
                break;
            }
        }
    }
}

async fn read_stderr<R>(stderr: R, tx: mpsc::UnboundedSender<ProcessEvent>, pid: u32)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut monitor = StderrMonitor::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(pid = pid, line = %line, "Agent stderr");
                if let Some(fatal) = monitor.inspect(&line) {
                    tracing::error!(pid = pid, code = fatal.code(), line = %line, "Fatal agent error on stderr");
                    drop(tx.send(ProcessEvent::Fatal {
                        fatal,
                        line: line.clone(),
                    }));
                }
                if tx.send(ProcessEvent::Stderr(line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(pid = pid, error = %e, "Agent stderr read failed");
                break;
            }
        }
    }
}

async fn supervise(
    mut child: WrappedChild,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    stop_grace: Duration,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let pid = child.id();
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            control = control_rx.recv() => match control {
                Some(Control::CheckAlive(reply)) => {
                    // A live process whose stdout closed can no longer report events
                    let alive = matches!(child.try_wait(), Ok(None)) && !stdout_task.is_finished();
                    if reply.send(alive).is_err() {
                        tracing::trace!(pid = pid, "Liveness check caller went away");
                    }
                }
                Some(Control::Terminate(grace)) => break child.terminate(grace).await,
                Some(Control::Kill) => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(pid = pid, error = %e, "Kill failed");
                    }
                    break child.wait().await;
                }
                // Handle dropped
                None => break child.terminate(stop_grace).await,
            },
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit::from_status(status),
        Err(e) => {
            tracing::warn!(pid = pid, error = %e, "Failed to collect agent exit status");
            ProcessExit::unknown()
        }
    };

    // Deliver all remaining output before the exit event
    if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, stdout_task)
        .await
        .is_err()
    {
        tracing::warn!(pid = pid, "Agent stdout did not close after exit");
    }
    stderr_task.abort();

    tracing::info!(pid = pid, exit = %exit, "Agent process exited");
    exit_tx.send_replace(Some(exit));
    drop(event_tx.send(ProcessEvent::Exited(exit)));
}
