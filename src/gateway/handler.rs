//! Channel gateway logic independent of the WebSocket transport.
//!
//! The handshake is split in two so the HTTP upgrade can be refused before
//! it is accepted:
//! 1. [`prepare_session`] authenticates the caller and launches the shell.
//! 2. [`open_session`] binds the shell to the accepted channel, registers
//!    the session, and starts both output pumps.
//!
//! [`handle_inbound`] then dispatches every text frame received on the
//! channel. Over the WebSocket, `command` text goes through the session's
//! [`InputForwarder`] instead so a blocked write never stalls the channel.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::channel::ChannelSender;
use super::protocol::{parse_inbound, InboundMessage, PONG_FRAME};
use super::AppState;
use crate::auth::{bearer_token, Identity};
use crate::session::terminal::TerminalSession;
use crate::shell::launcher::{launch, resolve_shell, LaunchedShell, ShellCommand};
use crate::{AppError, Result};

/// Command frames that may wait for the shell to read its input.
pub const INPUT_BACKLOG: usize = 256;

/// Connection-time query parameters of the terminal endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    /// Requested shell variant.
    #[serde(rename = "type", default)]
    pub shell_type: Option<String>,
    /// Initial working directory.
    #[serde(default)]
    pub path: Option<String>,
    /// Identity token; falls back to the `Authorization` header.
    #[serde(default)]
    pub token: Option<String>,
}

/// A launched shell waiting for its channel to be accepted.
///
/// Dropping it before [`open_session`] kills the shell.
#[derive(Debug)]
pub struct PendingSession {
    /// Connection identifier assigned to the channel.
    pub id: String,
    /// Authenticated caller.
    pub identity: Identity,
    /// Program selected for the connection.
    pub command: ShellCommand,
    shell: LaunchedShell,
}

/// What handling one inbound frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A `pong` was sent.
    Pong,
    /// Command text was written to the shell.
    Forwarded,
    /// Command text could not be written; the session stays open.
    WriteFailed,
    /// An interrupt was dispatched.
    Interrupted {
        /// Whether the platform reported delivery.
        delivered: bool,
    },
    /// The frame was malformed, unknown, or addressed to a missing session.
    Ignored,
}

/// Resolve the caller's identity from the query token or the bearer header.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` when no token is presented or the
/// authenticator rejects it.
pub fn authorize(state: &AppState, query_token: Option<&str>, headers: &HeaderMap) -> Result<Identity> {
    let token = query_token
        .filter(|token| !token.trim().is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(bearer_token)
        })
        .ok_or_else(|| AppError::Unauthorized("missing token".into()))?;

    state.authenticator.validate_and_identify(token)
}

/// Authenticate the caller and launch the requested shell.
///
/// Nothing is registered yet; a failure here leaves no trace.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` for a missing or rejected token and
/// `AppError::LaunchFailed` when the shell cannot be started.
pub fn prepare_session(
    state: &AppState,
    params: &ConnectParams,
    headers: &HeaderMap,
) -> Result<PendingSession> {
    let id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("handshake", session_id = %id);
    let _entered = span.enter();

    let identity = authorize(state, params.token.as_deref(), headers).inspect_err(|err| {
        warn!(%err, "handshake rejected");
    })?;

    let command = resolve_shell(params.shell_type.as_deref(), &state.config.shell);
    let shell = launch(&command, params.path.as_deref())?;

    info!(user = %identity.user, shell = %command.program, pid = shell.pid, "handshake accepted");
    Ok(PendingSession {
        id,
        identity,
        command,
        shell,
    })
}

/// Bind a prepared shell to its accepted channel, register the session,
/// and start both pumps.
///
/// # Errors
///
/// Returns `AppError::DuplicateSession` if the identifier is already
/// registered; the shell is killed when the rejected session is dropped.
pub fn open_session(
    state: &AppState,
    pending: PendingSession,
    channel: Arc<ChannelSender>,
) -> Result<Arc<TerminalSession>> {
    let PendingSession {
        id,
        identity,
        command,
        shell,
    } = pending;

    let (session, streams) = TerminalSession::adopt(
        id,
        identity,
        command.variant,
        shell,
        channel,
        state.encoding,
    );
    state.registry.put(session.id(), Arc::clone(&session))?;
    session.start_pumps(streams, state.config.shell.chunk_size);

    info!(session_id = %session.id(), pid = session.pid(), "session opened");
    Ok(session)
}

/// Dispatch one inbound text frame received on `session`'s channel.
///
/// Never fails: malformed frames, missing sessions, write failures and
/// undelivered interrupts are logged and reported through the outcome.
pub async fn handle_inbound(state: &AppState, session: &TerminalSession, raw: &str) -> InboundOutcome {
    match parse_inbound(raw) {
        Ok(message) => dispatch_message(state, session, message).await,
        Err(err) => {
            debug!(session_id = session.id(), %err, "ignoring inbound frame");
            InboundOutcome::Ignored
        }
    }
}

/// Dispatch one parsed inbound message.
pub async fn dispatch_message(
    state: &AppState,
    session: &TerminalSession,
    message: InboundMessage,
) -> InboundOutcome {
    let session_id = session.id();
    match message {
        InboundMessage::Ping => {
            if let Err(err) = session.channel().send_text(PONG_FRAME.to_owned()).await {
                debug!(session_id, %err, "pong not delivered");
            }
            InboundOutcome::Pong
        }
        InboundMessage::Command { data } => {
            let Ok(target) = state.registry.get(session_id) else {
                debug!(session_id, "command for unregistered session ignored");
                return InboundOutcome::Ignored;
            };
            match target.write_input(&data).await {
                Ok(()) => InboundOutcome::Forwarded,
                Err(err) => {
                    warn!(session_id, %err, "command not forwarded");
                    InboundOutcome::WriteFailed
                }
            }
        }
        InboundMessage::Interrupt => {
            let Ok(target) = state.registry.get(session_id) else {
                debug!(session_id, "interrupt for unregistered session ignored");
                return InboundOutcome::Ignored;
            };
            let delivered = state.dispatcher.dispatch_interrupt_async(target.pid()).await;
            InboundOutcome::Interrupted { delivered }
        }
    }
}

/// Handle to a session's input writer task.
#[derive(Debug)]
pub struct InputForwarder {
    queue: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

impl InputForwarder {
    /// Queue command text for the shell without waiting for the write.
    ///
    /// Returns `false` when the text was dropped because the backlog is full
    /// or the writer has stopped.
    #[must_use]
    pub fn forward(&self, data: String) -> bool {
        match self.queue.try_send(data) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("shell input backlog full, command dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("input writer stopped, command dropped");
                false
            }
        }
    }

    /// Stop accepting input and wait for the writer to exit.
    pub async fn shutdown(self) {
        let Self { queue, task } = self;
        drop(queue);
        if let Err(err) = task.await {
            warn!(%err, "input writer task failed");
        }
    }
}

/// Spawn the task that writes `command` text to `session`'s shell in
/// arrival order.
///
/// The channel loop never waits on the shell's stdin, so a shell that stops
/// reading cannot hide a client close. The task exits when teardown starts
/// or the forwarder is shut down.
#[must_use]
pub fn spawn_input_forwarder(state: Arc<AppState>, session: Arc<TerminalSession>) -> InputForwarder {
    let (queue, mut pending) = mpsc::channel::<String>(INPUT_BACKLOG);
    let span = info_span!("input_writer", session_id = %session.id());
    let task = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    biased;

                    () = session.closed() => break,
                    next = pending.recv() => match next {
                        Some(data) => {
                            dispatch_message(&state, &session, InboundMessage::Command { data }).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("input writer stopped");
        }
        .instrument(span),
    );
    InputForwarder { queue, task }
}
