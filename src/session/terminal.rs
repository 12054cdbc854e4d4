//! A live terminal session: one channel bound to one shell process.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::Identity;
use crate::gateway::channel::ChannelSender;
use crate::models::session::{SessionState, SessionSummary, ShellVariant};
use crate::shell::encoding::encode_input;
use crate::shell::launcher::LaunchedShell;
use crate::shell::pump::{
    spawn_pump, OutputSink, PumpConfig, PumpExit, RelayOutcome, StreamKind,
};
use crate::{AppError, Result};

/// Output streams of a freshly adopted shell, consumed by
/// [`TerminalSession::start_pumps`].
#[derive(Debug)]
pub struct OutputStreams {
    stdout: ChildStdout,
    stderr: ChildStderr,
}

/// One client channel bound to one shell process.
///
/// The session exclusively owns the process and its stdin; the two output
/// streams are owned by the pump tasks. Teardown is driven by the
/// [`CleanupCoordinator`](crate::session::cleanup::CleanupCoordinator).
pub struct TerminalSession {
    id: String,
    identity: Identity,
    program: String,
    variant: Option<ShellVariant>,
    pid: u32,
    created_at: DateTime<Utc>,
    encoding: &'static Encoding,
    state: Mutex<SessionState>,
    channel: Arc<ChannelSender>,
    pub(crate) stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pub(crate) child: tokio::sync::Mutex<Option<Child>>,
    pub(crate) pumps: Mutex<Vec<JoinHandle<PumpExit>>>,
    live_pumps: AtomicUsize,
    cancel: CancellationToken,
    drained: CancellationToken,
    pub(crate) teardown: OnceCell<()>,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("user", &self.identity.user)
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TerminalSession {
    /// Take ownership of a launched shell and bind it to `channel`.
    ///
    /// Pumps are not started yet so the caller can register the session
    /// first; pass the returned [`OutputStreams`] to [`start_pumps`](Self::start_pumps).
    #[must_use]
    pub fn adopt(
        id: String,
        identity: Identity,
        variant: Option<ShellVariant>,
        shell: LaunchedShell,
        channel: Arc<ChannelSender>,
        encoding: &'static Encoding,
    ) -> (Arc<Self>, OutputStreams) {
        let LaunchedShell {
            program,
            pid,
            child,
            stdin,
            stdout,
            stderr,
        } = shell;

        let session = Arc::new(Self {
            id,
            identity,
            program,
            variant,
            pid,
            created_at: Utc::now(),
            encoding,
            state: Mutex::new(SessionState::Active),
            channel,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(Some(child)),
            pumps: Mutex::new(Vec::with_capacity(2)),
            live_pumps: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            drained: CancellationToken::new(),
            teardown: OnceCell::new(),
        });

        (session, OutputStreams { stdout, stderr })
    }

    /// Spawn the stdout and stderr pumps.
    pub fn start_pumps(self: &Arc<Self>, streams: OutputStreams, chunk_size: usize) {
        let config = PumpConfig {
            encoding: self.encoding,
            chunk_size,
        };
        let OutputStreams { stdout, stderr } = streams;

        self.live_pumps.store(2, Ordering::Release);
        let handles = vec![
            self.spawn_tracked_pump(StreamKind::Stdout, stdout, config),
            self.spawn_tracked_pump(StreamKind::Stderr, stderr, config),
        ];

        self.pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    fn spawn_tracked_pump<R>(
        self: &Arc<Self>,
        stream: StreamKind,
        reader: R,
        config: PumpConfig,
    ) -> JoinHandle<PumpExit>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        // Completion tracking lets the gateway learn that the shell's output
        // is exhausted without the pumps triggering teardown themselves.
        let session = Arc::clone(self);
        spawn_pump(
            self.id.clone(),
            stream,
            reader,
            Arc::clone(self),
            config,
            self.cancel.child_token(),
            move |exit: &PumpExit| {
                debug!(session_id = %session.id, %stream, reason = ?exit.reason, "pump finished");
                if session.live_pumps.fetch_sub(1, Ordering::AcqRel) == 1 {
                    session.drained.cancel();
                }
            },
        )
    }

    /// Connection identifier this session is keyed by.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity that opened the channel.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// OS process identifier of the shell.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Program that was launched.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Recognized shell variant, if any.
    #[must_use]
    pub fn variant(&self) -> Option<ShellVariant> {
        self.variant
    }

    /// Channel this session is bound to.
    #[must_use]
    pub fn channel(&self) -> &Arc<ChannelSender> {
        &self.channel
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the session is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Move to `Closed`. Returns `true` only for the call that made the
    /// transition.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.can_transition_to(SessionState::Closed) {
            *state = SessionState::Closed;
            true
        } else {
            false
        }
    }

    /// Signal the pumps to stop and wake anything waiting on [`closed`](Self::closed).
    pub(crate) fn cancel_pumps(&self) {
        self.cancel.cancel();
    }

    /// Resolves once teardown has started.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Resolves once both pumps have exited.
    pub async fn outputs_drained(&self) {
        self.drained.cancelled().await;
    }

    /// Whether both pumps have exited.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.drained.is_cancelled()
    }

    /// Forward client input verbatim (re-encoded to the shell's code page)
    /// and flush.
    ///
    /// # Errors
    ///
    /// Returns `AppError::WriteFailed` if the session is closed, teardown
    /// starts while the write is pending, or the write or flush fails.
    pub async fn write_input(&self, data: &str) -> Result<()> {
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => {
                Err(AppError::WriteFailed("session closed during write".into()))
            }
            written = self.write_stdin(data) => written,
        }
    }

    // The stdin lock is held for the whole write; cancelling the caller
    // releases it.
    async fn write_stdin(&self, data: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = match guard.as_mut() {
            Some(stdin) if self.is_active() => stdin,
            _ => return Err(AppError::WriteFailed("shell input is closed".into())),
        };

        let bytes = encode_input(self.encoding, data);
        stdin
            .write_all(&bytes)
            .await
            .map_err(|err| AppError::WriteFailed(format!("stdin write failed: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::WriteFailed(format!("stdin flush failed: {err}")))
    }

    /// Resolves once the shell process has exited, polling every `interval`.
    ///
    /// Never resolves after teardown has taken the process.
    pub async fn process_exited(&self, interval: Duration) {
        loop {
            {
                let mut guard = self.child.lock().await;
                let exited = match guard.as_mut() {
                    Some(child) => match child.try_wait() {
                        Ok(status) => status.is_some(),
                        Err(err) => {
                            debug!(session_id = %self.id, %err, "failed to poll shell status");
                            false
                        }
                    },
                    None => false,
                };
                if exited {
                    return;
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Whether the shell process is still running.
    pub async fn is_process_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Snapshot for the operational API.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let state = self.state();
        SessionSummary {
            session_id: self.id.clone(),
            user: self.identity.user.clone(),
            shell: self.program.clone(),
            pid: (state == SessionState::Active).then_some(self.pid),
            state,
            created_at: self.created_at,
        }
    }
}

impl OutputSink for TerminalSession {
    fn relay(&self, text: String) -> Pin<Box<dyn Future<Output = RelayOutcome> + Send + '_>> {
        Box::pin(async move {
            let mut guard = self.channel.lock().await;
            // Checked under the send lock: teardown flips the state before
            // taking this lock, so nothing is sent after the transition.
            if !self.is_active() || !guard.is_open() {
                return RelayOutcome::ChannelClosed;
            }
            match guard.send_text(text).await {
                Ok(()) => RelayOutcome::Sent,
                Err(err) => RelayOutcome::Failed(err.to_string()),
            }
        })
    }
}
