//! Output pump task.
//!
//! One pump runs per shell output stream (stdout and stderr). Each pump
//! reads up to `chunk_size` bytes at a time, decodes them with the session
//! encoding, and relays the text through an [`OutputSink`]. Both streams
//! share the same sink, so stdout and stderr interleave on the channel
//! exactly as they would on a raw terminal.
//!
//! A pump never tears the session down. It exits on:
//! - end-of-stream (the shell closed the pipe or exited),
//! - cancellation by the cleanup coordinator,
//! - the sink reporting the channel closed,
//! - a read error (logged unless it is an expected teardown race).

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use encoding_rs::Encoding;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::shell::encoding::OutputDecoder;

/// Which shell stream a pump is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Result of handing one chunk to an [`OutputSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The chunk was sent.
    Sent,
    /// The session is closed or the channel is gone; nothing was sent.
    ChannelClosed,
    /// The transport rejected the send.
    Failed(String),
}

/// Destination for decoded shell output.
///
/// Implementations serialize sends with any other writer on the same
/// channel and must refuse to send once the session is closed.
pub trait OutputSink: Send + Sync {
    /// Relay one decoded chunk.
    fn relay(&self, text: String) -> Pin<Box<dyn Future<Output = RelayOutcome> + Send + '_>>;
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExitReason {
    /// The stream reached end-of-file.
    EndOfStream,
    /// The cleanup coordinator cancelled the pump.
    Cancelled,
    /// The sink reported the channel closed.
    ChannelClosed,
    /// The sink failed to send.
    SendFailed(String),
    /// Reading the stream failed unexpectedly.
    ReadFailed(String),
}

/// Summary returned when a pump task finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpExit {
    /// Stream the pump was bound to.
    pub stream: StreamKind,
    /// Total bytes read from the stream.
    pub bytes_read: u64,
    /// Why the pump stopped.
    pub reason: PumpExitReason,
}

/// Static settings shared by both pumps of a session.
#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    /// Encoding used to decode the stream.
    pub encoding: &'static Encoding,
    /// Maximum bytes per read.
    pub chunk_size: usize,
}

/// Read `reader` until it ends, relaying every decoded chunk to `sink`.
pub async fn run_pump<R, S>(
    session_id: &str,
    stream: StreamKind,
    mut reader: R,
    sink: &S,
    config: PumpConfig,
    cancel: &CancellationToken,
) -> PumpExit
where
    R: AsyncRead + Unpin + Send,
    S: OutputSink + ?Sized,
{
    let mut decoder = OutputDecoder::new(config.encoding);
    let mut buf = vec![0_u8; config.chunk_size.max(1)];
    let mut bytes_read: u64 = 0;

    let reason = loop {
        let read = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, %stream, "pump: cancellation received, stopping");
                break PumpExitReason::Cancelled;
            }

            read = reader.read(&mut buf) => read,
        };

        let chunk = match read {
            Ok(0) => {
                debug!(session_id, %stream, "pump: end of stream");
                let tail = decoder.finish();
                if !tail.is_empty() {
                    // Best effort; the pump is exiting either way.
                    let _ = sink.relay(tail).await;
                }
                break PumpExitReason::EndOfStream;
            }
            Ok(n) => buf.get(..n).unwrap_or_default(),
            Err(err) if cancel.is_cancelled() || is_teardown_error(&err) => {
                debug!(session_id, %stream, %err, "pump: stream closed during teardown");
                break PumpExitReason::Cancelled;
            }
            Err(err) => {
                warn!(session_id, %stream, %err, "pump: read failed, stopping");
                break PumpExitReason::ReadFailed(err.to_string());
            }
        };

        bytes_read = bytes_read.saturating_add(chunk.len() as u64);
        let text = decoder.decode(chunk);
        if text.is_empty() {
            // Only a partial multibyte sequence so far.
            continue;
        }

        match sink.relay(text).await {
            RelayOutcome::Sent => {}
            RelayOutcome::ChannelClosed => {
                debug!(session_id, %stream, "pump: channel closed, stopping");
                break PumpExitReason::ChannelClosed;
            }
            RelayOutcome::Failed(msg) => {
                warn!(session_id, %stream, error = %msg, "pump: send failed, stopping");
                break PumpExitReason::SendFailed(msg);
            }
        }
    };

    PumpExit {
        stream,
        bytes_read,
        reason,
    }
}

/// Spawn [`run_pump`] as a tokio task instrumented with a per-stream span.
///
/// `on_exit` runs inside the task once the pump stops on its own; it does
/// not run if the task is aborted.
#[must_use]
pub fn spawn_pump<R, S, F>(
    session_id: String,
    stream: StreamKind,
    reader: R,
    sink: Arc<S>,
    config: PumpConfig,
    cancel: CancellationToken,
    on_exit: F,
) -> JoinHandle<PumpExit>
where
    R: AsyncRead + Unpin + Send + 'static,
    S: OutputSink + ?Sized + 'static,
    F: FnOnce(&PumpExit) + Send + 'static,
{
    let span = info_span!("pump", session_id = %session_id, %stream);
    tokio::spawn(
        async move {
            let exit = run_pump(&session_id, stream, reader, sink.as_ref(), config, &cancel).await;
            on_exit(&exit);
            exit
        }
        .instrument(span),
    )
}

/// Whether a read error is the expected result of the pipe being closed
/// underneath an in-flight read.
#[must_use]
pub fn is_teardown_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
