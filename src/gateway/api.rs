//! Operational HTTP API over the session registry.
//!
//! Both routes require `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::info;

use super::handler::authorize;
use super::{status_for, AppState};
use crate::models::session::SessionSummary;
use crate::session::cleanup::CloseTrigger;

/// `GET /api/sessions`: summaries of every live session.
pub(super) async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorize(&state, None, &headers) {
        return (status_for(&err), err.to_string()).into_response();
    }

    let mut sessions: Vec<SessionSummary> = state
        .registry
        .snapshot()
        .iter()
        .map(|session| session.summary())
        .collect();
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(sessions).into_response()
}

/// `DELETE /api/sessions/{id}`: close one session and its channel.
pub(super) async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    let identity = match authorize(&state, None, &headers) {
        Ok(identity) => identity,
        Err(err) => return status_for(&err),
    };

    if state.cleanup.close(&id, CloseTrigger::Explicit).await {
        info!(session_id = %id, requested_by = %identity.user, "session closed on request");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
