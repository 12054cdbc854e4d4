//! Remote interactive-shell gateway.
//!
//! Relays a native shell process over an authenticated WebSocket channel:
//! shell output streams out as raw text, client input is written to the
//! shell's stdin, and an out-of-band interrupt maps to Ctrl-C.

pub mod auth;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod session;
pub mod shell;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
