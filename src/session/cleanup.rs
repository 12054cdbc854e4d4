//! Session teardown.
//!
//! Every trigger (channel closed, transport error, shell exited, explicit
//! close request, server shutdown) funnels into [`CleanupCoordinator::teardown`].
//! The first caller runs the teardown; concurrent and later callers wait for
//! it and observe the same end state. Each step is best-effort: a failure is
//! logged and the remaining steps still run.

use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::gateway::channel::CLOSE_NORMAL;
use crate::session::registry::SessionRegistry;
use crate::session::terminal::TerminalSession;

/// What asked for a session to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    /// The client closed the channel.
    ChannelClosed,
    /// The channel failed with a transport error.
    TransportError,
    /// Both output streams ended because the shell exited.
    ProcessExited,
    /// An operator asked for the session to be closed.
    Explicit,
    /// The server is shutting down.
    Shutdown,
}

impl CloseTrigger {
    /// Reason text carried in the channel close frame.
    #[must_use]
    pub fn close_reason(self) -> &'static str {
        match self {
            Self::ChannelClosed | Self::TransportError => "channel closed",
            Self::ProcessExited => "shell exited",
            Self::Explicit => "session closed",
            Self::Shutdown => "server shutting down",
        }
    }
}

impl Display for CloseTrigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChannelClosed => "channel_closed",
            Self::TransportError => "transport_error",
            Self::ProcessExited => "process_exited",
            Self::Explicit => "explicit",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Idempotent teardown routine shared by every session.
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    registry: Arc<SessionRegistry<TerminalSession>>,
    pump_shutdown: Duration,
}

impl CleanupCoordinator {
    /// Create a coordinator over `registry`.
    ///
    /// `pump_shutdown` bounds how long teardown waits for each pump to exit
    /// (and for a busy send to finish) before giving up on it.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry<TerminalSession>>, pump_shutdown: Duration) -> Self {
        Self {
            registry,
            pump_shutdown,
        }
    }

    /// Registry this coordinator removes sessions from.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry<TerminalSession>> {
        &self.registry
    }

    /// Close the session registered under `session_id`.
    ///
    /// Returns `false` when no such session is registered, which includes a
    /// session that has already been torn down.
    pub async fn close(&self, session_id: &str, trigger: CloseTrigger) -> bool {
        match self.registry.get(session_id) {
            Ok(session) => {
                self.teardown(&session, trigger).await;
                true
            }
            Err(_) => {
                debug!(session_id, %trigger, "close requested for unknown session");
                false
            }
        }
    }

    /// Close every registered session.
    pub async fn close_all(&self, trigger: CloseTrigger) {
        let sessions = self.registry.snapshot();
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), %trigger, "closing all sessions");
        let closing = sessions
            .iter()
            .map(|session| self.teardown(session, trigger));
        futures_util::future::join_all(closing).await;
    }

    /// Tear `session` down exactly once.
    ///
    /// Concurrent callers converge on the first teardown and return once it
    /// has finished.
    pub async fn teardown(&self, session: &Arc<TerminalSession>, trigger: CloseTrigger) {
        let span = info_span!("cleanup", session_id = %session.id(), pid = session.pid(), %trigger);
        session
            .teardown
            .get_or_init(|| self.run_teardown(session, trigger).instrument(span))
            .await;
    }

    async fn run_teardown(&self, session: &Arc<TerminalSession>, trigger: CloseTrigger) {
        info!("tearing down session");

        // ACTIVE -> CLOSED first, then wait out any send already holding the
        // lock. After this barrier no pump can emit another message.
        session.mark_closed();
        if tokio::time::timeout(self.pump_shutdown, session.channel().lock())
            .await
            .is_err()
        {
            warn!("timed out waiting for in-flight send");
        }

        session.cancel_pumps();
        self.close_input(session).await;
        self.join_pumps(session).await;
        kill_process(session).await;

        if self.registry.remove_if_same(session.id(), session).is_none() {
            debug!("session was not registered");
        }

        session
            .channel()
            .close(CLOSE_NORMAL, trigger.close_reason())
            .await;

        info!("session closed");
    }

    async fn join_pumps(&self, session: &TerminalSession) {
        let handles: Vec<_> = session
            .pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.pump_shutdown, handle).await {
                Ok(Ok(exit)) => {
                    debug!(stream = %exit.stream, bytes = exit.bytes_read, reason = ?exit.reason, "pump joined");
                }
                Ok(Err(err)) => warn!(%err, "pump task failed"),
                Err(_) => {
                    warn!("pump did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
    }

    // Bounded: a writer wedged on a full pipe must not hold up the kill.
    async fn close_input(&self, session: &TerminalSession) {
        let Ok(mut guard) = tokio::time::timeout(self.pump_shutdown, session.stdin.lock()).await
        else {
            warn!("timed out waiting for stdin, leaving it to the kill");
            return;
        };
        if let Some(mut stdin) = guard.take() {
            drop(guard);
            match tokio::time::timeout(self.pump_shutdown, stdin.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(%err, "stdin already closed"),
                Err(_) => warn!("timed out closing stdin"),
            }
        }
    }
}

async fn kill_process(session: &TerminalSession) {
    // Jobs the shell started stay in its group and can outlive it.
    #[cfg(unix)]
    kill_process_group(session.pid());

    let child = session.child.lock().await.take();
    let Some(mut child) = child else {
        return;
    };

    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(?status, "shell already exited");
            return;
        }
        Ok(None) => {}
        Err(err) => warn!(%err, "failed to poll shell status"),
    }

    if let Err(err) = child.kill().await {
        warn!(%err, "failed to force-kill shell");
    } else {
        info!("shell force-killed");
    }
}

/// Kill anything the shell started in its process group.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if raw <= 1 {
        return;
    }
    if let Err(errno) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, %errno, "process group kill skipped");
    }
}
