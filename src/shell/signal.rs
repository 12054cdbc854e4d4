//! Interrupt (Ctrl-C) delivery to a shell's process group.
//!
//! The platform mechanism is an [`InterruptCapability`] injected into the
//! [`SignalDispatcher`]; the dispatcher itself is platform-neutral. Every
//! dispatch, across all sessions and dispatcher instances, holds one
//! process-wide lock: on Windows console attachment is a global resource
//! and two overlapping attach/detach sequences corrupt each other.
//!
//! | Platform | Capability                 | Mechanism                            |
//! |----------|----------------------------|--------------------------------------|
//! | Unix     | [`ProcessGroupSignal`]     | `killpg(pid, SIGINT)`                |
//! | Windows  | `ConsoleCtrlSignal`        | attach console, `CTRL_C_EVENT`       |
//! | other    | [`UnsupportedSignal`]      | always fails                         |

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Serializes dispatches process-wide.
static DISPATCH_LOCK: Mutex<()> = Mutex::new(());

/// Platform facility able to deliver an interrupt to a process group.
pub trait InterruptCapability: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver an interrupt to the group led by `pid`.
    ///
    /// Blocking. `settle` is the pause applied after each attach/detach step
    /// on platforms that need one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DispatchFailed` when any step fails.
    fn send_interrupt(&self, pid: u32, settle: Duration) -> Result<()>;
}

/// Best-effort interrupt dispatcher shared by all sessions.
pub struct SignalDispatcher {
    capability: Arc<dyn InterruptCapability>,
    settle_delay: Duration,
}

impl std::fmt::Debug for SignalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDispatcher")
            .field("capability", &self.capability.name())
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

impl SignalDispatcher {
    /// Create a dispatcher around an explicit capability.
    #[must_use]
    pub fn new(capability: Arc<dyn InterruptCapability>, settle_delay: Duration) -> Self {
        Self {
            capability,
            settle_delay,
        }
    }

    /// Create a dispatcher using the capability of the host platform.
    #[must_use]
    pub fn for_host(settle_delay: Duration) -> Self {
        Self::new(host_capability(), settle_delay)
    }

    /// Name of the injected capability.
    #[must_use]
    pub fn capability_name(&self) -> &'static str {
        self.capability.name()
    }

    /// Deliver an interrupt to `pid`, blocking the calling thread.
    ///
    /// Returns `true` when the platform reported success. Failures are
    /// logged and reported as `false`; nothing propagates to the caller.
    pub fn dispatch_interrupt(&self, pid: u32) -> bool {
        let _guard = DISPATCH_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match self.capability.send_interrupt(pid, self.settle_delay) {
            Ok(()) => {
                info!(pid, capability = self.capability.name(), "interrupt delivered");
                true
            }
            Err(err) => {
                warn!(pid, capability = self.capability.name(), %err, "interrupt not delivered");
                false
            }
        }
    }

    /// Run [`dispatch_interrupt`](Self::dispatch_interrupt) on the blocking pool.
    pub async fn dispatch_interrupt_async(self: &Arc<Self>, pid: u32) -> bool {
        let dispatcher = Arc::clone(self);
        match tokio::task::spawn_blocking(move || dispatcher.dispatch_interrupt(pid)).await {
            Ok(delivered) => delivered,
            Err(err) => {
                warn!(pid, %err, "interrupt dispatch task failed");
                false
            }
        }
    }
}

/// Capability for platforms without an interrupt facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSignal;

impl InterruptCapability for UnsupportedSignal {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn send_interrupt(&self, pid: u32, _settle: Duration) -> Result<()> {
        Err(AppError::DispatchFailed(format!(
            "interrupt delivery is not supported on this platform (pid {pid})"
        )))
    }
}

/// Sends `SIGINT` to the process group led by the shell.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupSignal;

#[cfg(unix)]
impl InterruptCapability for ProcessGroupSignal {
    fn name(&self) -> &'static str {
        "posix-killpg"
    }

    fn send_interrupt(&self, pid: u32, _settle: Duration) -> Result<()> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| AppError::DispatchFailed(format!("pid {pid} out of range")))?;
        if raw <= 1 {
            return Err(AppError::DispatchFailed(format!("refusing to signal pid {pid}")));
        }
        debug!(pid, "sending SIGINT to process group");
        killpg(Pid::from_raw(raw), Signal::SIGINT)
            .map_err(|errno| AppError::DispatchFailed(format!("killpg({pid}) failed: {errno}")))
    }
}

#[cfg(windows)]
pub use windows_console::ConsoleCtrlSignal;

#[cfg(windows)]
#[allow(unsafe_code)]
mod windows_console {
    use std::thread;
    use std::time::Duration;

    use tracing::debug;
    use windows_sys::Win32::System::Console::{
        AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, SetConsoleCtrlHandler, CTRL_C_EVENT,
    };

    use super::InterruptCapability;
    use crate::{AppError, Result};

    /// Attaches to the shell's console and raises `CTRL_C_EVENT` on it.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ConsoleCtrlSignal;

    impl InterruptCapability for ConsoleCtrlSignal {
        fn name(&self) -> &'static str {
            "win32-console-ctrl"
        }

        fn send_interrupt(&self, pid: u32, settle: Duration) -> Result<()> {
            // SAFETY: the console functions take plain integers or a null
            // handler and only mutate this process's console attachment,
            // which the dispatch lock serializes.
            unsafe {
                FreeConsole();
            }
            thread::sleep(settle);

            if unsafe { AttachConsole(pid) } == 0 {
                let err = std::io::Error::last_os_error();
                return Err(AppError::DispatchFailed(format!(
                    "cannot attach to console of pid {pid}: {err}"
                )));
            }

            // Ignore the event ourselves while attached.
            let handler_installed = unsafe { SetConsoleCtrlHandler(None, 1) } != 0;
            thread::sleep(settle);

            let generated = unsafe { GenerateConsoleCtrlEvent(CTRL_C_EVENT, 0) } != 0;
            let generate_err = std::io::Error::last_os_error();
            debug!(pid, generated, "console ctrl event generated");
            thread::sleep(settle);

            unsafe {
                FreeConsole();
            }
            thread::sleep(settle);
            if handler_installed {
                unsafe {
                    SetConsoleCtrlHandler(None, 0);
                }
            }

            if generated {
                Ok(())
            } else {
                Err(AppError::DispatchFailed(format!(
                    "GenerateConsoleCtrlEvent failed for pid {pid}: {generate_err}"
                )))
            }
        }
    }
}

/// Capability matching the compilation target.
#[must_use]
pub fn host_capability() -> Arc<dyn InterruptCapability> {
    #[cfg(unix)]
    {
        Arc::new(ProcessGroupSignal)
    }
    #[cfg(windows)]
    {
        Arc::new(ConsoleCtrlSignal)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(UnsupportedSignal)
    }
}
