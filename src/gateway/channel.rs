//! Outbound side of a client channel.
//!
//! The transport only tolerates one writer at a time, while a session has
//! up to three: the stdout pump, the stderr pump, and the `pong` reply
//! path. [`ChannelSender`] owns the transport writer behind a single async
//! mutex (the per-channel send lock) and tracks whether the channel is
//! still open.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::{AppError, Result};

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code for an internal server error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Raw transport writer. Methods take `&mut self`; exclusivity is provided
/// by [`ChannelSender`].
pub trait ChannelSink: Send {
    /// Send one text frame.
    fn send_text(&mut self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Send a close frame and release the transport.
    fn close(
        &mut self,
        code: u16,
        reason: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Serialized, open-state-aware writer for one channel.
pub struct ChannelSender {
    sink: Mutex<Box<dyn ChannelSink>>,
    open: AtomicBool,
}

impl std::fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl ChannelSender {
    /// Wrap a transport writer.
    #[must_use]
    pub fn new(sink: impl ChannelSink + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            open: AtomicBool::new(true),
        }
    }

    /// Whether the channel is still believed open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Record that the peer closed the channel; later sends are refused.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Acquire the send lock.
    pub async fn lock(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            sender: self,
            sink: self.sink.lock().await,
        }
    }

    /// Send one text frame under the send lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the channel is closed, or the
    /// transport error if the send fails.
    pub async fn send_text(&self, text: String) -> Result<()> {
        self.lock().await.send_text(text).await
    }

    /// Send a close frame if the channel is still open. Idempotent.
    pub async fn close(&self, code: u16, reason: &str) {
        let mut sink = self.sink.lock().await;
        if self.open.swap(false, Ordering::AcqRel) {
            if let Err(err) = sink.close(code, reason.to_owned()).await {
                debug!(%err, "channel close frame not delivered");
            }
        }
    }
}

/// Exclusive access to a channel's transport writer.
pub struct ChannelGuard<'a> {
    sender: &'a ChannelSender,
    sink: MutexGuard<'a, Box<dyn ChannelSink>>,
}

impl ChannelGuard<'_> {
    /// Whether the channel is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Send one text frame while holding the lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the channel is closed, or the
    /// transport error if the send fails (the channel is then marked closed).
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        if !self.sender.is_open() {
            return Err(AppError::Protocol("channel closed".into()));
        }
        let result = self.sink.send_text(text).await;
        if result.is_err() {
            self.sender.mark_closed();
        }
        result
    }
}

/// [`ChannelSink`] over the write half of an axum WebSocket.
pub struct WsSink(pub SplitSink<WebSocket, Message>);

impl ChannelSink for WsSink {
    fn send_text(&mut self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.0
                .send(Message::Text(text.into()))
                .await
                .map_err(|err| AppError::Io(format!("websocket send failed: {err}")))
        })
    }

    fn close(
        &mut self,
        code: u16,
        reason: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            self.0
                .send(Message::Close(Some(frame)))
                .await
                .map_err(|err| AppError::Io(format!("websocket close failed: {err}")))?;
            self.0
                .close()
                .await
                .map_err(|err| AppError::Io(format!("websocket close failed: {err}")))
        })
    }
}
