//! Termination signal handling.
//!
//! A run that is interrupted still has to be cleaned up, so the handler does
//! not exit the process. It records the request and kills the payload, if
//! one is registered; the lifecycle manager notices the flag at its next
//! stage boundary or when the killed payload is reaped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

#[derive(Debug, Default)]
struct Shared {
    requested: AtomicBool,
    /// Held across the `kill` so a child cannot be forgotten mid-signal.
    child: Mutex<Option<Pid>>,
}

/// Shared interrupt state for one controller process.
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    shared: Arc<Shared>,
}

impl Interrupt {
    /// Creates an untriggered handle with no signal handler installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a process-wide handler for SIGINT, SIGTERM, and SIGHUP that
    /// triggers this handle.
    ///
    /// # Errors
    ///
    /// Fails if a handler was already installed in this process.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let handle = self.clone();
        ctrlc::set_handler(move || handle.trigger())
    }

    /// Records an interrupt request and kills the registered child.
    ///
    /// Runs on the signal handler's thread, not in signal context, so it
    /// may block on the registration lock.
    pub fn trigger(&self) {
        self.shared.requested.store(true, Ordering::SeqCst);
        // The guard lives until the end of the `if let` body.
        if let Some(pid) = *self.child() {
            let _ = kill(pid, Signal::SIGKILL);
        }
    }

    /// Returns whether an interrupt has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.shared.requested.load(Ordering::SeqCst)
    }

    /// Registers the payload so a later interrupt kills it. A request that
    /// arrived before registration kills it immediately.
    pub fn watch_child(&self, pid: Pid) {
        let mut child = self.child();
        *child = Some(pid);
        if self.is_requested() {
            tracing::debug!(pid = pid.as_raw(), "interrupt pending, killing payload");
            let _ = kill(pid, Signal::SIGKILL);
        }
    }

    /// Clears the registration. Must happen before the child is reaped.
    ///
    /// Once this returns, no [`trigger`](Self::trigger) still holds the
    /// old pid.
    pub fn forget_child(&self) {
        *self.child() = None;
    }

    fn child(&self) -> MutexGuard<'_, Option<Pid>> {
        self.shared.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
