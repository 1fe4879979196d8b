//! The spawned payload and its supervision.

use std::io;
use std::path::PathBuf;

use hutch_common::error::IsolationError;
use hutch_common::types::ExitStatus;
use nix::errno::Errno;
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid, waitpid};
use nix::unistd::Pid;

use crate::interrupt::Interrupt;

/// Handle to a running payload.
///
/// The pid is valid until the exit status is recorded; after that the
/// kernel may hand it to another process.
#[derive(Debug)]
pub struct ContainerProcess {
    pid: Option<Pid>,
    exit: Option<ExitStatus>,
    mounts: Vec<PathBuf>,
}

impl ContainerProcess {
    pub(crate) const fn new(pid: Pid, mounts: Vec<PathBuf>) -> Self {
        Self {
            pid: Some(pid),
            exit: None,
            mounts,
        }
    }

    /// Pid of the payload, or `None` once it has been reaped.
    #[must_use]
    pub const fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Exit status, once the payload has been reaped.
    #[must_use]
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Host-visible mount points this run introduced.
    #[must_use]
    pub fn mounts(&self) -> &[PathBuf] {
        &self.mounts
    }

    /// Hands over the introduced mounts for teardown.
    pub fn take_mounts(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.mounts)
    }

    /// Blocks until the payload exits and records its status.
    ///
    /// Calling this again after the status is recorded returns it without
    /// waiting.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::WaitFailed`] if waiting fails.
    pub fn supervise(&mut self, interrupt: &Interrupt) -> Result<ExitStatus, IsolationError> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let Some(pid) = self.pid else {
            return Err(IsolationError::WaitFailed {
                pid: 0,
                source: io::Error::from(Errno::ECHILD),
            });
        };
        let status = supervise_child(pid, interrupt)?;
        self.exit = Some(status);
        self.pid = None;
        Ok(status)
    }
}

/// Waits for `pid` to exit and reaps it.
///
/// The child stays a zombie until `interrupt` has forgotten it, and
/// forgetting waits for any `kill` already in flight. An interrupt racing
/// with the exit therefore only ever signals the zombie, never a recycled
/// pid.
///
/// # Errors
///
/// Returns [`IsolationError::WaitFailed`] if waiting fails.
pub fn supervise_child(pid: Pid, interrupt: &Interrupt) -> Result<ExitStatus, IsolationError> {
    tracing::debug!(pid = pid.as_raw(), "waiting for payload");
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => break,
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(wait_failed(pid, e)),
        }
    }
    interrupt.forget_child();
    reap(pid)
}

/// Reaps an exited or exiting child.
pub(crate) fn reap(pid: Pid) -> Result<ExitStatus, IsolationError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Code(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitStatus::Signaled(signal as i32));
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(wait_failed(pid, e)),
        }
    }
}

fn wait_failed(pid: Pid, errno: Errno) -> IsolationError {
    IsolationError::WaitFailed {
        pid: pid.as_raw(),
        source: io::Error::from(errno),
    }
}
