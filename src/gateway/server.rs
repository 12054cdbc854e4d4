//! HTTP listener, router, and the per-connection channel loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channel::{ChannelSender, WsSink, CLOSE_INTERNAL_ERROR};
use super::handler::{self, ConnectParams, PendingSession};
use super::protocol::{parse_inbound, InboundMessage};
use super::{api, status_for, AppState};
use crate::session::cleanup::CloseTrigger;
use crate::{AppError, Result};

/// Path of the terminal WebSocket endpoint.
pub const TERMINAL_PATH: &str = "/ws/terminal";

/// How often the channel loop checks whether the shell has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Build the application router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(TERMINAL_PATH, get(terminal_upgrade))
        .route("/api/sessions", get(api::list_sessions))
        .route("/api/sessions/{id}", delete(api::close_session))
        .with_state(state)
}

/// Serve on an already bound listener until `ct` is cancelled, then close
/// every remaining session.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails while running.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let app = router(Arc::clone(&state));
    let shutdown = ct.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server error: {err}")))?;

    state.cleanup.close_all(CloseTrigger::Shutdown).await;
    info!("terminal gateway shut down");
    Ok(())
}

/// Bind `config.bind_addr()` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind, or
/// `AppError::Io` if the server fails while running.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;

    info!(%bind, path = TERMINAL_PATH, "starting terminal gateway");
    serve_on(listener, state, ct).await
}

/// `GET /ws/terminal`: authenticate, launch, then upgrade.
///
/// Rejections happen before the upgrade so a refused client never sees an
/// open channel.
async fn terminal_upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let pending = match handler::prepare_session(&state, &params, &headers) {
        Ok(pending) => pending,
        Err(err) => return (status_for(&err), err.to_string()).into_response(),
    };

    ws.on_failed_upgrade(|err| warn!(%err, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_channel(socket, state, pending))
}

/// Drive one accepted channel until it, or its session, ends.
async fn run_channel(socket: WebSocket, state: Arc<AppState>, pending: PendingSession) {
    let (sink, mut inbound) = socket.split();
    let channel = Arc::new(ChannelSender::new(WsSink(sink)));

    let session = match handler::open_session(&state, pending, Arc::clone(&channel)) {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "failed to open session");
            channel.close(CLOSE_INTERNAL_ERROR, "session unavailable").await;
            return;
        }
    };

    let input = handler::spawn_input_forwarder(Arc::clone(&state), Arc::clone(&session));
    let exit_poll = state.config.pump_shutdown_timeout();

    let trigger = loop {
        tokio::select! {
            () = session.closed() => break CloseTrigger::Explicit,
            () = session.outputs_drained() => {
                info!(session_id = %session.id(), "shell output ended");
                break CloseTrigger::ProcessExited;
            }
            () = session.process_exited(EXIT_POLL_INTERVAL) => {
                // Let the pumps flush what the shell wrote before exiting.
                if tokio::time::timeout(exit_poll, session.outputs_drained()).await.is_err() {
                    debug!(session_id = %session.id(), "output still open after shell exit");
                }
                info!(session_id = %session.id(), "shell exited");
                break CloseTrigger::ProcessExited;
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => match parse_inbound(text.as_str()) {
                    Ok(InboundMessage::Command { data }) => {
                        let _ = input.forward(data);
                    }
                    Ok(message) => {
                        let outcome = handler::dispatch_message(&state, &session, message).await;
                        debug!(session_id = %session.id(), ?outcome, "inbound frame handled");
                    }
                    Err(err) => debug!(session_id = %session.id(), %err, "ignoring inbound frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    channel.mark_closed();
                    break CloseTrigger::ChannelClosed;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(session_id = %session.id(), "ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(err)) => {
                    warn!(session_id = %session.id(), %err, "channel transport error");
                    channel.mark_closed();
                    break CloseTrigger::TransportError;
                }
            },
        }
    };

    // Converges with a teardown already started elsewhere.
    state.cleanup.teardown(&session, trigger).await;
    input.shutdown().await;
}
