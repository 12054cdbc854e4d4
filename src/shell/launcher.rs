//! Shell process launcher.
//!
//! Resolves the requested shell variant to a concrete program and starts it
//! with all three stdio streams piped:
//! - `kill_on_drop(true)` so a launch that never makes it into the registry
//!   cannot leak a process.
//! - On Unix the shell leads its own process group, which lets the signal
//!   dispatcher interrupt the running command without hitting the gateway.
//! - A supplied working directory must exist; it is never silently ignored.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{error, info};

use crate::config::{ShellConfig, ShellProgram};
use crate::models::session::ShellVariant;
use crate::{AppError, Result};

/// Concrete program selected for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Recognized variant, `None` when the platform default was used.
    pub variant: Option<ShellVariant>,
    /// Executable to start.
    pub program: String,
    /// Arguments for the executable.
    pub args: Vec<String>,
}

impl ShellCommand {
    fn from_program(variant: Option<ShellVariant>, program: &ShellProgram) -> Self {
        Self {
            variant,
            program: program.program.clone(),
            args: program.args.clone(),
        }
    }
}

/// A running shell with its stdio captured.
///
/// Every field is moved into the session that adopts the shell.
#[derive(Debug)]
pub struct LaunchedShell {
    /// Program that was started.
    pub program: String,
    /// OS process identifier (also the process group on Unix).
    pub pid: u32,
    /// Process handle used for liveness checks and force-termination.
    pub child: Child,
    /// Write end of the shell's standard input.
    pub stdin: ChildStdin,
    /// Read end of the shell's standard output.
    pub stdout: ChildStdout,
    /// Read end of the shell's standard error.
    pub stderr: ChildStderr,
}

/// Select the program for a requested variant.
///
/// Lookup order: a config override under the requested name, the built-in
/// mapping for a recognized variant, then the platform default shell. An
/// absent or empty request uses `config.default_variant`.
#[must_use]
pub fn resolve_shell(requested: Option<&str>, config: &ShellConfig) -> ShellCommand {
    let name = requested
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .unwrap_or(config.default_variant.as_str())
        .to_ascii_lowercase();
    let variant = ShellVariant::parse(&name);

    let override_key = match variant {
        Some(known) => known.as_str(),
        None => name.as_str(),
    };
    if let Some(program) = config.programs.get(override_key) {
        return ShellCommand::from_program(variant, program);
    }

    match variant.and_then(builtin_program) {
        Some(program) => ShellCommand::from_program(variant, &program),
        None => ShellCommand::from_program(None, &default_program()),
    }
}

#[cfg(windows)]
fn builtin_program(variant: ShellVariant) -> Option<ShellProgram> {
    let program = match variant {
        ShellVariant::Cmd => "cmd.exe",
        ShellVariant::PowerShell => "powershell.exe",
        ShellVariant::Pwsh => "pwsh.exe",
        ShellVariant::Bash | ShellVariant::Zsh | ShellVariant::Sh => return None,
    };
    Some(ShellProgram {
        program: program.into(),
        args: Vec::new(),
    })
}

#[cfg(windows)]
fn default_program() -> ShellProgram {
    ShellProgram {
        program: "cmd.exe".into(),
        args: Vec::new(),
    }
}

#[cfg(not(windows))]
fn builtin_program(variant: ShellVariant) -> Option<ShellProgram> {
    let program = match variant {
        ShellVariant::Bash => "bash",
        ShellVariant::Zsh => "zsh",
        ShellVariant::Sh => "sh",
        ShellVariant::PowerShell | ShellVariant::Pwsh => {
            return Some(ShellProgram {
                program: "pwsh".into(),
                args: vec!["-NoLogo".into()],
            });
        }
        ShellVariant::Cmd => return None,
    };
    Some(ShellProgram {
        program: program.into(),
        args: interactive_args(),
    })
}

#[cfg(not(windows))]
fn default_program() -> ShellProgram {
    ShellProgram {
        program: "sh".into(),
        args: interactive_args(),
    }
}

/// `-i` survives SIGINT; `+m` keeps commands in the shell's process group
/// and stops the shell from claiming a controlling terminal.
#[cfg(not(windows))]
fn interactive_args() -> Vec<String> {
    vec!["-i".into(), "+m".into()]
}

/// Start `shell` in `working_dir` (or the gateway's own directory).
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns `AppError::LaunchFailed` if the working directory is not an
/// existing directory, the program cannot be spawned, or a stdio pipe
/// cannot be captured.
pub fn launch(shell: &ShellCommand, working_dir: Option<&str>) -> Result<LaunchedShell> {
    let mut cmd = Command::new(&shell.program);
    cmd.args(&shell.args);

    if let Some(dir) = working_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        let path = Path::new(dir);
        if !path.is_dir() {
            error!(working_dir = dir, "working directory is not a directory");
            return Err(AppError::LaunchFailed(format!(
                "working directory '{dir}' does not exist or is not a directory"
            )));
        }
        cmd.current_dir(path);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|err| {
        error!(program = %shell.program, %err, "failed to spawn shell");
        AppError::LaunchFailed(format!("failed to spawn '{}': {err}", shell.program))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::LaunchFailed("shell exited during launch".into()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::LaunchFailed("failed to capture shell stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::LaunchFailed("failed to capture shell stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::LaunchFailed("failed to capture shell stderr".into()))?;

    info!(pid, program = %shell.program, "shell process started");

    Ok(LaunchedShell {
        program: shell.program.clone(),
        pid,
        child,
        stdin,
        stdout,
        stderr,
    })
}
