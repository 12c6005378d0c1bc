//! Wrapped agent child process with process group support
//!
//! The agent spawns its own tool subprocesses, so signals go to the whole
//! process group through process-wrap's ChildWrapper.

use std::io;
use std::pin::Pin;
use std::process::ExitStatus;
use std::time::Duration;

use process_wrap::tokio::ChildWrapper;

/// How an agent process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal (Unix)
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Exit status could not be collected
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Clean exit, or ended by our own SIGTERM/SIGKILL
    ///
    /// A shell wrapper that forwards the signal exits with `128 + signal`
    /// instead of being signalled itself.
    pub fn is_intentional(&self) -> bool {
        if self.is_success() {
            return true;
        }
        #[cfg(unix)]
        {
            const SHELL_SIGNAL_BASE: i32 = 128;
            matches!(self.signal, Some(libc::SIGTERM | libc::SIGKILL))
                || self.code.is_some_and(|code| {
                    code == SHELL_SIGNAL_BASE + libc::SIGTERM
                        || code == SHELL_SIGNAL_BASE + libc::SIGKILL
                })
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Wrapper around Box<dyn ChildWrapper>
#[derive(Debug)]
pub struct WrappedChild {
    inner: Box<dyn ChildWrapper>,
}

impl WrappedChild {
    /// Create a new wrapped child from a process-wrap ChildWrapper
    pub fn new(inner: Box<dyn ChildWrapper>) -> Self {
        Self { inner }
    }

    /// Get mutable reference to inner ChildWrapper
    pub fn inner_mut(&mut self) -> &mut dyn ChildWrapper {
        self.inner.as_mut()
    }

    /// Kill the process group and wait for exit
    pub async fn kill(&mut self) -> io::Result<()> {
        Pin::from(self.inner.kill()).await
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        Pin::from(self.inner.wait()).await
    }

    /// Returns Some(status) if the process has exited, None if still running.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.inner.try_wait()
    }

    /// Send a specific signal to the process group (Unix only)
    #[cfg(unix)]
    pub fn signal(&self, sig: i32) -> io::Result<()> {
        self.inner.signal(sig)
    }

    /// SIGTERM the group, then SIGKILL once `grace` has elapsed
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        #[cfg(unix)]
        {
            if let Err(e) = self.signal(libc::SIGTERM) {
                tracing::debug!(pid = self.id(), error = %e, "SIGTERM failed");
            }
            if let Ok(status) = tokio::time::timeout(grace, self.wait()).await {
                return status;
            }
            tracing::warn!(
                pid = self.id(),
                grace_ms = grace.as_millis(),
                "Agent process ignored SIGTERM, killing"
            );
        }
        #[cfg(not(unix))]
        let _ = grace;

        self.kill().await?;
        self.wait().await
    }

    /// Get the process ID
    pub fn id(&self) -> u32 {
        self.inner.id().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classification() {
        let clean = ProcessExit {
            code: Some(0),
            signal: None,
        };
        assert!(clean.is_success());
        assert!(clean.is_intentional());

        let crashed = ProcessExit {
            code: Some(1),
            signal: None,
        };
        assert!(!crashed.is_intentional());
        assert_eq!(crashed.to_string(), "exit code 1");

        assert!(!ProcessExit::unknown().is_intentional());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_exits() {
        let term = ProcessExit {
            code: None,
            signal: Some(libc::SIGTERM),
        };
        assert!(term.is_intentional());

        let kill = ProcessExit {
            code: None,
            signal: Some(libc::SIGKILL),
        };
        assert!(kill.is_intentional());

        let segv = ProcessExit {
            code: None,
            signal: Some(libc::SIGSEGV),
        };
        assert!(!segv.is_intentional());
        assert_eq!(segv.to_string(), format!("signal {}", libc::SIGSEGV));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_reported_signal_codes() {
        for code in [143, 137] {
            let exit = ProcessExit {
                code: Some(code),
                signal: None,
            };
            assert!(exit.is_intentional(), "exit code {code}");
        }
        let segv = ProcessExit {
            code: Some(139),
            signal: None,
        };
        assert!(!segv.is_intentional());
    }
}
