//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Program and arguments used to start one shell variant.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShellProgram {
    /// Executable name or absolute path.
    pub program: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Shell launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShellConfig {
    /// Variant used when a connection does not name one.
    #[serde(default = "default_variant")]
    pub default_variant: String,
    /// Encoding label overriding the host code page (e.g. `gbk`, `utf-8`).
    #[serde(default)]
    pub encoding: Option<String>,
    /// Maximum bytes read from a shell output stream per relay message.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-variant program overrides keyed by lowercase variant name.
    #[serde(default)]
    pub programs: HashMap<String, ShellProgram>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_variant: default_variant(),
            encoding: None,
            chunk_size: default_chunk_size(),
            programs: HashMap::new(),
        }
    }
}

/// Interrupt delivery settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InterruptConfig {
    /// Pause after each console attach/detach step.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Session teardown settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Upper bound on waiting for output pumps to exit during cleanup.
    #[serde(default = "default_pump_shutdown_ms")]
    pub pump_shutdown_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pump_shutdown_ms: default_pump_shutdown_ms(),
        }
    }
}

/// One statically configured caller identity.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TokenEntry {
    /// User name reported for this token.
    pub user: String,
    /// Lowercase hex SHA-256 digest of the token.
    pub token_sha256: String,
}

/// Caller authentication settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    /// Accepted tokens.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

fn default_variant() -> String {
    "cmd".into()
}

fn default_chunk_size() -> usize {
    1024
}

fn default_settle_delay_ms() -> u64 {
    50
}

fn default_pump_shutdown_ms() -> u64 {
    2000
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_http_port() -> u16 {
    8080
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the HTTP/WebSocket listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// HTTP port for the WebSocket and API endpoints.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Shell launch settings.
    #[serde(default)]
    pub shell: ShellConfig,
    /// Interrupt delivery settings.
    #[serde(default)]
    pub interrupt: InterruptConfig,
    /// Session teardown settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Caller authentication settings.
    pub auth: AuthConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address the server listens on.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    /// Pause applied around console attach/detach when interrupting.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.interrupt.settle_delay_ms)
    }

    /// Bounded wait for pumps to stop during cleanup.
    #[must_use]
    pub fn pump_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.session.pump_shutdown_ms)
    }

    fn validate(&mut self) -> Result<()> {
        if self.shell.chunk_size == 0 {
            return Err(AppError::Config(
                "shell.chunk_size must be greater than zero".into(),
            ));
        }

        if let Some(label) = &self.shell.encoding {
            if encoding_rs::Encoding::for_label(label.trim().as_bytes()).is_none() {
                return Err(AppError::Config(format!(
                    "shell.encoding '{label}' is not a known encoding label"
                )));
            }
        }

        // Variant lookups are case-insensitive.
        self.shell.default_variant = self.shell.default_variant.trim().to_ascii_lowercase();
        self.shell.programs = std::mem::take(&mut self.shell.programs)
            .into_iter()
            .map(|(name, program)| (name.trim().to_ascii_lowercase(), program))
            .collect();

        if let Some((name, _)) = self
            .shell
            .programs
            .iter()
            .find(|(_, program)| program.program.trim().is_empty())
        {
            return Err(AppError::Config(format!(
                "shell.programs.{name} has an empty program"
            )));
        }

        if self.auth.tokens.is_empty() {
            return Err(AppError::Config("auth.tokens must not be empty".into()));
        }

        for entry in &mut self.auth.tokens {
            entry.token_sha256 = entry.token_sha256.trim().to_ascii_lowercase();
            let is_digest = entry.token_sha256.len() == 64
                && entry.token_sha256.bytes().all(|b| b.is_ascii_hexdigit());
            if !is_digest {
                return Err(AppError::Config(format!(
                    "auth token for '{}' must be a 64-character hex sha-256 digest",
                    entry.user
                )));
            }
        }

        Ok(())
    }
}
