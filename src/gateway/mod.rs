//! Client-facing surface: the terminal WebSocket channel and the HTTP API.

pub mod api;
pub mod channel;
pub mod handler;
pub mod protocol;
pub mod server;

use std::sync::Arc;

use axum::http::StatusCode;
use encoding_rs::Encoding;

use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::config::GlobalConfig;
use crate::session::cleanup::CleanupCoordinator;
use crate::session::registry::SessionRegistry;
use crate::session::terminal::TerminalSession;
use crate::shell::encoding::resolve_host_encoding;
use crate::shell::signal::SignalDispatcher;
use crate::{AppError, Result};

/// Shared state handed to every connection and API request.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Token validation collaborator.
    pub authenticator: Arc<dyn Authenticator>,
    /// Live sessions keyed by connection identifier.
    pub registry: Arc<SessionRegistry<TerminalSession>>,
    /// Teardown routine shared by all sessions.
    pub cleanup: CleanupCoordinator,
    /// Interrupt delivery.
    pub dispatcher: Arc<SignalDispatcher>,
    /// Encoding used for shell input and output.
    pub encoding: &'static Encoding,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.registry.len())
            .field("dispatcher", &self.dispatcher)
            .field("encoding", &self.encoding.name())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build state from configuration using the static token table and the
    /// host's interrupt capability.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configured encoding is unknown.
    pub fn from_config(config: GlobalConfig) -> Result<Self> {
        let authenticator = Arc::new(StaticTokenAuthenticator::from_config(&config.auth));
        let dispatcher = Arc::new(SignalDispatcher::for_host(config.settle_delay()));
        Self::with_collaborators(config, authenticator, dispatcher)
    }

    /// Build state around explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configured encoding is unknown.
    pub fn with_collaborators(
        config: GlobalConfig,
        authenticator: Arc<dyn Authenticator>,
        dispatcher: Arc<SignalDispatcher>,
    ) -> Result<Self> {
        let encoding = resolve_host_encoding(config.shell.encoding.as_deref())?;
        let registry = Arc::new(SessionRegistry::new());
        let cleanup = CleanupCoordinator::new(Arc::clone(&registry), config.pump_shutdown_timeout());
        Ok(Self {
            config: Arc::new(config),
            authenticator,
            registry,
            cleanup,
            dispatcher,
            encoding,
        })
    }
}

/// HTTP status for an error surfaced at the HTTP boundary.
#[must_use]
pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
