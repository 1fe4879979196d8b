//! Isolated payload start.
//!
//! [`NamespaceIsolator::spawn`] clones the payload into all requested
//! namespaces with one `clone(2)`. The child runs [`run_child_payload`]:
//!
//! 1. mount tree made private (mount namespace only)
//! 2. `chroot` into the container root and `chdir("/")`
//! 3. hostname (UTS namespace only)
//! 4. `proc` at `/proc` (PID and mount namespaces only)
//! 5. `execvp` of the payload
//!
//! Between clone and exec the child only makes raw syscalls. Everything it
//! needs is prepared by the parent. A failing step writes an 8-byte report
//! (step code and errno, little endian) to a close-on-exec pipe and the
//! child exits. End of file on the pipe without a report means `exec`
//! succeeded.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use hutch_common::constants::{CHILD_EXEC_FAILED_EXIT, CHILD_SETUP_FAILED_EXIT};
use hutch_common::error::{IsolationError, Side};
use hutch_common::spec::ContainerSpec;
use hutch_core::filesystem::mount::{is_mounted, mount_proc};
use hutch_core::filesystem::root::change_root;
use hutch_core::namespace::{NamespaceKind, NamespaceSet};
use hutch_core::namespace::mount::make_mounts_private;
use hutch_core::namespace::uts::set_hostname;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::unistd::pipe2;

use crate::process::{ContainerProcess, reap};

/// Stack size for the cloned child. It only runs until `exec`.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Child-side step that can fail before the payload runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum ChildStep {
    PrivateMounts = 1,
    RootSwitch = 2,
    Hostname = 3,
    ProcMount = 4,
    Exec = 5,
}

impl ChildStep {
    const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::PrivateMounts),
            2 => Some(Self::RootSwitch),
            3 => Some(Self::Hostname),
            4 => Some(Self::ProcMount),
            5 => Some(Self::Exec),
            _ => None,
        }
    }
}

/// A child-side failure as sent over the report pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChildReport {
    step: ChildStep,
    errno: i32,
}

impl ChildReport {
    const LEN: usize = 8;

    fn encode(self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[..4].copy_from_slice(&(self.step as u32).to_le_bytes());
        buf[4..].copy_from_slice(&self.errno.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let step = u32::from_le_bytes(buf.get(..4)?.try_into().ok()?);
        let errno = i32::from_le_bytes(buf.get(4..Self::LEN)?.try_into().ok()?);
        Some(Self {
            step: ChildStep::from_code(step)?,
            errno,
        })
    }
}

/// Starts a payload inside new namespaces and a new root.
#[derive(Debug)]
pub struct NamespaceIsolator {
    namespaces: NamespaceSet,
    root: PathBuf,
    hostname: String,
    program: String,
    argv: Vec<CString>,
    introduced_mounts: Vec<PathBuf>,
}

impl NamespaceIsolator {
    /// Prepares the spawn of `spec`'s payload.
    ///
    /// The proc mount point is only recorded for teardown if nothing is
    /// mounted there yet, so a pre-existing mount is never detached.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::InvalidCommand`] if a payload argument
    /// contains a NUL byte.
    pub fn new(spec: &ContainerSpec) -> Result<Self, IsolationError> {
        let argv = spec
            .payload()
            .iter()
            .map(|arg| {
                CString::new(arg.as_str())
                    .map_err(|_| IsolationError::InvalidCommand { arg: arg.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let program = spec.payload().first().cloned().unwrap_or_default();
        if argv.is_empty() {
            return Err(IsolationError::InvalidCommand { arg: program });
        }

        let namespaces = NamespaceSet::new(spec.namespaces());
        let mut introduced_mounts = Vec::new();
        if namespaces.mounts_proc() {
            let target = spec.proc_mount_point();
            if is_mounted(&target).unwrap_or(true) {
                tracing::debug!(path = %target.display(), "proc already mounted, not tracked");
            } else {
                introduced_mounts.push(target);
            }
        }

        Ok(Self {
            namespaces,
            root: spec.root().to_path_buf(),
            hostname: spec.hostname().to_owned(),
            program,
            argv,
            introduced_mounts,
        })
    }

    /// Namespaces this isolator creates.
    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceSet {
        &self.namespaces
    }

    /// Clones the child and waits until it has either executed the payload
    /// or reported a failure. Does not wait for the payload itself.
    ///
    /// # Errors
    ///
    /// Returns the parent-side error if the clone failed, or the child's
    /// reported error after reaping it.
    pub fn spawn(&mut self) -> Result<ContainerProcess, IsolationError> {
        let (read_end, write_end) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| IsolationError::SpawnFailed {
                source: io::Error::from(e),
            })?;
        let mut report_rx = File::from(read_end);

        let mut argv_ptrs: Vec<*const libc::c_char> =
            self.argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        let flags = self.namespaces.clone_flags();
        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        let pid = {
            let namespaces = &self.namespaces;
            let root = self.root.as_path();
            let hostname = self.hostname.as_str();
            let argv = argv_ptrs.as_slice();
            let report_tx = &write_end;
            let child = Box::new(move || {
                run_child_payload(namespaces, root, hostname, argv, report_tx)
            });
            // SAFETY: the child does not share memory with the parent
            // (no CLONE_VM) and only performs syscalls until exec or exit.
            unsafe { clone(child, &mut stack, flags, Some(libc::SIGCHLD)) }
        };
        drop(write_end);

        let pid = pid.map_err(|e| {
            let source = io::Error::from(e);
            if flags.is_empty() {
                IsolationError::SpawnFailed { source }
            } else {
                IsolationError::NamespaceRequestFailed {
                    side: Side::Parent,
                    source,
                }
            }
        })?;
        self.namespaces.mark_entered();

        let mut report = Vec::with_capacity(ChildReport::LEN);
        let read = report_rx.read_to_end(&mut report);
        if report.is_empty() && read.is_ok() {
            tracing::info!(
                pid = pid.as_raw(),
                program = %self.program,
                namespaces = %self.namespaces,
                "payload started"
            );
            return Ok(ContainerProcess::new(
                pid,
                std::mem::take(&mut self.introduced_mounts),
            ));
        }

        let status = reap(pid);
        tracing::debug!(pid = pid.as_raw(), ?status, "isolated child failed before exec");
        Err(match (read, ChildReport::decode(&report)) {
            (Ok(_), Some(report)) => self.child_error(report),
            (Err(source), _) => IsolationError::SpawnFailed { source },
            (Ok(_), None) => IsolationError::SpawnFailed {
                source: io::Error::new(io::ErrorKind::InvalidData, "malformed child report"),
            },
        })
    }

    fn child_error(&self, report: ChildReport) -> IsolationError {
        let source = io::Error::from_raw_os_error(report.errno);
        match report.step {
            ChildStep::PrivateMounts => IsolationError::NamespaceRequestFailed {
                side: Side::Child,
                source,
            },
            ChildStep::RootSwitch => IsolationError::RootSwitchFailed {
                root: self.root.clone(),
                source,
            },
            ChildStep::Hostname => IsolationError::HostnameFailed {
                hostname: self.hostname.clone(),
                source,
            },
            ChildStep::ProcMount => IsolationError::MountFailed {
                target: PathBuf::from("/proc"),
                source,
            },
            ChildStep::Exec => IsolationError::ExecFailed {
                program: self.program.clone(),
                source,
            },
        }
    }
}

/// Child side of the spawn. Returns only on failure, with the exit status
/// the child should end with.
fn run_child_payload(
    namespaces: &NamespaceSet,
    root: &Path,
    hostname: &str,
    argv: &[*const libc::c_char],
    report_tx: &OwnedFd,
) -> isize {
    let setup = || -> Result<(), (ChildStep, Errno)> {
        if namespaces.contains(NamespaceKind::Mount) {
            make_mounts_private().map_err(|e| (ChildStep::PrivateMounts, e))?;
        }
        change_root(root).map_err(|e| (ChildStep::RootSwitch, e))?;
        if namespaces.contains(NamespaceKind::Uts) {
            set_hostname(hostname).map_err(|e| (ChildStep::Hostname, e))?;
        }
        if namespaces.mounts_proc() {
            mount_proc(Path::new("/proc")).map_err(|e| (ChildStep::ProcMount, e))?;
        }
        Ok(())
    };

    let (step, errno) = match setup() {
        Ok(()) => {
            // SAFETY: argv is a NUL-terminated array of pointers into
            // CStrings that outlive this call.
            let _ = unsafe { libc::execvp(argv[0], argv.as_ptr()) };
            (ChildStep::Exec, Errno::last())
        }
        Err(failure) => failure,
    };

    let report = ChildReport {
        step,
        errno: errno as i32,
    };
    let _ = nix::unistd::write(report_tx, &report.encode());
    exit_code(step)
}

/// Exit status of a child that failed before the payload ran.
const fn exit_code(step: ChildStep) -> isize {
    match step {
        ChildStep::Exec => CHILD_EXEC_FAILED_EXIT as isize,
        _ => CHILD_SETUP_FAILED_EXIT as isize,
    }
}
