//! Container run lifecycle.
//!
//! A run moves through
//!
//! ```text
//! Idle -> Provisioning -> LimitApplied -> Isolating -> Running -> Exited -> CleanedUp
//! ```
//!
//! and any stage before `Exited` can end in `Failed(stage)` instead.
//! `CleanedUp` is reached from both `Exited` and `Failed`, exactly once.
//! The resources a run creates are recorded in a [`Teardown`] the moment
//! they exist, so cleanup never depends on how far the run got.

use chrono::{DateTime, Utc};
use hutch_common::error::{CleanupWarning, PayloadExitError, RunError, StageError};
use hutch_common::spec::ContainerSpec;
use hutch_common::types::{ContainerId, ExitStatus, RunState, Stage};
use hutch_core::cgroup::ResourceLimiter;
use hutch_core::privilege::ensure_privileged;
use serde::Serialize;

use crate::cleanup::Teardown;
use crate::interrupt::Interrupt;
use crate::isolate::NamespaceIsolator;
use crate::provision::RootFilesystemProvisioner;

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// State entered.
    pub state: RunState,
    /// When it was entered.
    pub at: DateTime<Utc>,
}

/// Outcome of a run that reached the payload.
///
/// A payload that exited non-zero is still a completed run; see
/// [`RunReport::payload_error`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub id: ContainerId,
    /// How the payload ended.
    pub exit: ExitStatus,
    /// Whether a termination signal cut the payload short.
    pub interrupted: bool,
    /// Every state the run went through.
    pub transitions: Vec<Transition>,
    /// Non-fatal teardown failures.
    pub warnings: Vec<CleanupWarning>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When cleanup finished.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Returns the payload's failure, if it did not exit with code 0.
    #[must_use]
    pub const fn payload_error(&self) -> Option<PayloadExitError> {
        if self.exit.success() {
            None
        } else {
            Some(PayloadExitError { status: self.exit })
        }
    }
}

/// Drives one container run from provisioning to cleanup.
#[derive(Debug)]
pub struct ContainerLifecycleManager {
    spec: ContainerSpec,
    provisioner: RootFilesystemProvisioner,
    limiter: ResourceLimiter,
    interrupt: Interrupt,
    check_privilege: bool,
    state: RunState,
    transitions: Vec<Transition>,
    teardown: Teardown,
}

impl ContainerLifecycleManager {
    /// Creates a manager for `spec` using the default cgroup hierarchy.
    #[must_use]
    pub fn new(spec: ContainerSpec, provisioner: RootFilesystemProvisioner) -> Self {
        Self {
            spec,
            provisioner,
            limiter: ResourceLimiter::default(),
            interrupt: Interrupt::new(),
            check_privilege: true,
            state: RunState::Idle,
            transitions: Vec::new(),
            teardown: Teardown::new(),
        }
    }

    /// Uses `limiter` instead of the default hierarchy.
    #[must_use]
    pub fn with_limiter(mut self, limiter: ResourceLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Shares `interrupt` with the run, typically one installed as the
    /// process signal handler.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Enables or disables the effective-uid check before provisioning.
    #[must_use]
    pub const fn check_privilege(mut self, enabled: bool) -> Self {
        self.check_privilege = enabled;
        self
    }

    /// The run's specification.
    #[must_use]
    pub const fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// States entered so far, oldest first. Does not include `Idle`.
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Runs the container to completion and cleans up.
    ///
    /// # Errors
    ///
    /// Returns a [`RunError`] naming the failed stage if the payload could
    /// not be started or waited on. Cleanup has already run by then. A
    /// manager runs at most once; later calls fail with
    /// [`StageError::AlreadyRun`] and change nothing.
    pub fn run(&mut self) -> Result<RunReport, RunError> {
        if self.state != RunState::Idle {
            return Err(RunError {
                stage: Stage::Preflight,
                source: StageError::AlreadyRun,
                warnings: Vec::new(),
            });
        }
        let started_at = Utc::now();
        tracing::info!(
            id = %self.spec.id(),
            root = %self.spec.root().display(),
            payload = ?self.spec.payload(),
            "starting container run"
        );

        let outcome = self.drive();
        match &outcome {
            Ok(status) => {
                self.enter(RunState::Exited);
                tracing::info!(id = %self.spec.id(), %status, "payload exited");
            }
            Err((stage, source)) => {
                self.enter(RunState::Failed(*stage));
                tracing::error!(id = %self.spec.id(), %stage, error = %source, "run failed");
            }
        }

        let warnings = self.cleanup();
        match outcome {
            Ok(exit) => Ok(RunReport {
                id: self.spec.id().clone(),
                exit,
                interrupted: self.interrupt.is_requested(),
                transitions: self.transitions.clone(),
                warnings,
                started_at,
                finished_at: Utc::now(),
            }),
            Err((stage, source)) => Err(RunError {
                stage,
                source,
                warnings,
            }),
        }
    }

    fn drive(&mut self) -> Result<ExitStatus, (Stage, StageError)> {
        if self.check_privilege {
            self.checkpoint(Stage::Preflight)?;
            ensure_privileged().map_err(|e| (Stage::Preflight, e))?;
        }

        self.checkpoint(Stage::Provisioning)?;
        self.enter(RunState::Provisioning);
        self.provisioner
            .ensure(self.spec.root())
            .map_err(|e| (Stage::Provisioning, e.into()))?;

        self.checkpoint(Stage::LimitApplied)?;
        let mut cgroup = self
            .limiter
            .create(&self.spec)
            .map_err(|e| (Stage::LimitApplied, e.into()))?;
        let applied = cgroup.apply(&self.spec);
        self.teardown.track_cgroup(cgroup);
        applied.map_err(|e| (Stage::LimitApplied, e.into()))?;
        self.enter(RunState::LimitApplied);

        self.checkpoint(Stage::Isolating)?;
        self.enter(RunState::Isolating);
        let isolation = |e| (Stage::Isolating, StageError::Isolation(e));
        let mut isolator = NamespaceIsolator::new(&self.spec).map_err(isolation)?;
        let mut process = isolator.spawn().map_err(isolation)?;
        self.teardown.track_mounts(process.take_mounts());
        if let Some(pid) = process.pid() {
            self.interrupt.watch_child(pid);
        }

        self.enter(RunState::Running);
        process
            .supervise(&self.interrupt)
            .map_err(|e| (Stage::Running, e.into()))
    }

    /// Fails with `stage` if an interrupt arrived.
    fn checkpoint(&self, stage: Stage) -> Result<(), (Stage, StageError)> {
        if self.interrupt.is_requested() {
            tracing::warn!(%stage, "interrupted before stage");
            return Err((stage, StageError::Interrupted));
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Vec<CleanupWarning> {
        debug_assert!(self.state.awaits_cleanup());
        let warnings = self.teardown.release();
        self.enter(RunState::CleanedUp);
        warnings
    }

    fn enter(&mut self, state: RunState) {
        tracing::info!(id = %self.spec.id(), from = %self.state, to = %state, "state transition");
        self.state = state;
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }
}
