//! JSON message protocol spoken on the terminal channel.
//!
//! Inbound frames are tagged objects:
//!
//! ```text
//! {"type":"ping"}
//! {"type":"command","data":"<text>"}
//! {"type":"interrupt"}
//! ```
//!
//! The only enveloped outbound frame is `{"type":"pong"}`. Shell output is
//! relayed as raw, unframed text.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Reply to a `ping` frame.
pub const PONG_FRAME: &str = r#"{"type":"pong"}"#;

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Liveness probe; answered with [`PONG_FRAME`].
    Ping,
    /// Text written verbatim to the shell's standard input.
    Command {
        /// Input exactly as typed, including any line terminator.
        data: String,
    },
    /// Request to interrupt the running command.
    Interrupt,
}

/// Parse one inbound text frame.
///
/// # Errors
///
/// Returns `AppError::Protocol` when the frame is not JSON, has no known
/// `type`, or lacks a required field.
pub fn parse_inbound(raw: &str) -> Result<InboundMessage> {
    serde_json::from_str(raw).map_err(|err| AppError::Protocol(format!("malformed frame: {err}")))
}
