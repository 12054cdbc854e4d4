//! Error types shared across the gateway.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all gateway failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Shell process could not be started (bad working directory, missing binary).
    LaunchFailed(String),
    /// Caller identity token is absent, malformed, or rejected.
    Unauthorized(String),
    /// A session with the same identifier is already registered.
    DuplicateSession(String),
    /// Requested session does not exist.
    NotFound(String),
    /// Forwarding input to the shell's stdin failed.
    WriteFailed(String),
    /// Reading shell output failed for a reason other than teardown.
    ReadFailed(String),
    /// Interrupt delivery to the shell failed.
    DispatchFailed(String),
    /// Inbound channel message could not be understood.
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::LaunchFailed(msg) => write!(f, "launch failed: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::DuplicateSession(msg) => write!(f, "duplicate session: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::WriteFailed(msg) => write!(f, "write failed: {msg}"),
            Self::ReadFailed(msg) => write!(f, "read failed: {msg}"),
            Self::DispatchFailed(msg) => write!(f, "dispatch failed: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
