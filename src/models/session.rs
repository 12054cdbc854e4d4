//! Terminal session model types.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a terminal session.
///
/// The only permitted transition is `Active → Closed`, performed once by
/// the cleanup coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Pumps may relay output and input is forwarded.
    Active,
    /// Torn down; nothing is relayed any more.
    Closed,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!((self, next), (Self::Active, Self::Closed))
    }
}

/// Shell flavour requested by the client through the `type` parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShellVariant {
    /// Windows command processor.
    Cmd,
    /// Windows `PowerShell`.
    PowerShell,
    /// Cross-platform `PowerShell`.
    Pwsh,
    /// GNU Bourne-again shell.
    Bash,
    /// Z shell.
    Zsh,
    /// POSIX shell.
    Sh,
}

impl ShellVariant {
    /// Parse a variant name case-insensitively.
    ///
    /// Returns `None` for unrecognized names so the caller can fall back to
    /// the platform default.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cmd" | "cmd.exe" => Some(Self::Cmd),
            "powershell" | "ps" | "powershell.exe" => Some(Self::PowerShell),
            "pwsh" | "pwsh.exe" => Some(Self::Pwsh),
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            "sh" => Some(Self::Sh),
            _ => None,
        }
    }

    /// Lowercase canonical name, also used as the config override key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cmd => "cmd",
            Self::PowerShell => "powershell",
            Self::Pwsh => "pwsh",
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Sh => "sh",
        }
    }
}

impl Display for ShellVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a live session for the operational API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    /// Connection identifier the session is keyed by.
    pub session_id: String,
    /// Authenticated user that opened the channel.
    pub user: String,
    /// Program that was launched.
    pub shell: String,
    /// OS process identifier, if the process is still attached.
    pub pid: Option<u32>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// When the session was registered.
    pub created_at: DateTime<Utc>,
}
