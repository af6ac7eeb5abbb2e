//! Failure & cancellation handling
//!
//! Tracks each package through `Dispatched → Running → {Succeeded, Failed}`
//! (or `Dispatched → Cancelled`), writes failure logs, and decides whether a
//! failure stops the rest of the batch.

use super::error::UpdateError;
use super::progress::ProgressEmitter;
use super::workspace_pool::{LeaseTotals, TeardownReport};
use crate::models::Package;
use crate::shutdown::{CancelReason, CancellationState};
use crate::utils::lock_mutex_recover;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Exit code of a fully successful run
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when any package (or workspace cleanup) failed
pub const EXIT_FAILURE: i32 = 1;
/// Exit code of a run aborted by the operator
pub const EXIT_ABORTED: i32 = 130;

/// Lifecycle of a package within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Dispatched,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl PackageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PackageState::Succeeded | PackageState::Failed | PackageState::Cancelled
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: PackageState,
        to: PackageState,
    },

    #[error("Package already in terminal state: {0:?}")]
    AlreadyTerminal(PackageState),

    #[error("Unknown package index: {0}")]
    UnknownPackage(usize),
}

/// Validates if a package can move from one state to another
pub fn can_transition(from: PackageState, to: PackageState) -> bool {
    matches!(
        (from, to),
        (PackageState::Dispatched, PackageState::Running)
            | (PackageState::Dispatched, PackageState::Cancelled)
            | (PackageState::Running, PackageState::Succeeded)
            | (PackageState::Running, PackageState::Failed)
    )
}

/// Validates and performs a state transition
pub fn transition_state(
    current: PackageState,
    target: PackageState,
) -> Result<PackageState, StateTransitionError> {
    if current.is_terminal() {
        return Err(StateTransitionError::AlreadyTerminal(current));
    }
    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }
    Ok(target)
}

/// State of every package of a run, indexed by input position
///
/// Shared between workers (which mark packages `Running`) and the coordinator.
#[derive(Debug)]
pub struct StatusBoard {
    entries: Mutex<Vec<(String, PackageState)>>,
}

impl StatusBoard {
    pub fn new(packages: &[Package]) -> Self {
        Self {
            entries: Mutex::new(
                packages
                    .iter()
                    .map(|p| (p.name.clone(), PackageState::Dispatched))
                    .collect(),
            ),
        }
    }

    #[cfg(test)]
    pub fn state(&self, index: usize) -> Option<PackageState> {
        lock_mutex_recover(&self.entries)
            .get(index)
            .map(|(_, state)| *state)
    }

    pub fn transition(
        &self,
        index: usize,
        target: PackageState,
    ) -> Result<(), StateTransitionError> {
        let mut entries = lock_mutex_recover(&self.entries);
        let (_, state) = entries
            .get_mut(index)
            .ok_or(StateTransitionError::UnknownPackage(index))?;
        *state = transition_state(*state, target)?;
        Ok(())
    }

    /// Names of packages currently in `state`, in input order
    pub fn names_in(&self, state: PackageState) -> Vec<String> {
        lock_mutex_recover(&self.entries)
            .iter()
            .filter(|(_, s)| *s == state)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Move every package still `Dispatched` to `Cancelled`, returning their names
    pub fn cancel_pending(&self) -> Vec<String> {
        let mut entries = lock_mutex_recover(&self.entries);
        entries
            .iter_mut()
            .filter(|(_, state)| *state == PackageState::Dispatched)
            .map(|(name, state)| {
                *state = PackageState::Cancelled;
                name.clone()
            })
            .collect()
    }
}

/// A failed package as reported at the end of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageFailure {
    pub name: String,
    pub pname: String,
    pub error: String,
    /// Log file holding the captured stdout, if it could be written
    pub log_file: Option<PathBuf>,
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Packages that succeeded, in completion order
    pub succeeded: Vec<String>,
    /// Packages that failed, in completion order
    pub failed: Vec<PackageFailure>,
    /// Packages never started, in input order
    pub cancelled: Vec<String>,
    /// Whether the operator interrupted the run
    pub interrupted: bool,
    /// Workspace lease counters, all zero when commit integration is off
    pub leases: LeaseTotals,
    pub teardown: TeardownReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_ABORTED
        } else if !self.failed.is_empty() || !self.teardown.is_clean() {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Records package outcomes and applies the keep-going policy
pub struct FailureController {
    keep_going: bool,
    log_dir: PathBuf,
    cancel: CancellationState,
    emitter: Arc<dyn ProgressEmitter>,
    board: Arc<StatusBoard>,
    succeeded: Vec<String>,
    failed: Vec<PackageFailure>,
}

impl FailureController {
    pub fn new(
        keep_going: bool,
        log_dir: &Path,
        cancel: CancellationState,
        emitter: Arc<dyn ProgressEmitter>,
        board: Arc<StatusBoard>,
    ) -> Self {
        Self {
            keep_going,
            log_dir: log_dir.to_path_buf(),
            cancel,
            emitter,
            board,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record_success(&mut self, index: usize, package: &Package) {
        self.mark(index, PackageState::Succeeded);
        self.emitter.done(&package.name);
        log::info!("[Controller] {} succeeded", package.name);
        self.succeeded.push(package.name.clone());
    }

    /// Log the failure, write `<pname>.log` and stop the batch unless keep-going
    pub fn record_failure(
        &mut self,
        index: usize,
        package: &Package,
        stdout: &[u8],
        error: &UpdateError,
    ) {
        self.mark(index, PackageState::Failed);
        log::error!("[Controller] {} failed: {}", package.name, error);

        let cause = error.to_string();
        self.emitter.failed(&package.name, stdout, &cause);

        let log_file = match write_failure_log(&self.log_dir, package, stdout) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!(
                    "[Controller] Failed to write log for {}: {}",
                    package.name,
                    e
                );
                None
            }
        };

        self.failed.push(PackageFailure {
            name: package.name.clone(),
            pname: package.pname.clone(),
            error: cause,
            log_file,
        });

        if !self.keep_going {
            self.cancel.request_cancel(CancelReason::Failure);
        }
    }

    /// A package the scheduler handed back without starting it
    pub fn record_cancelled(&mut self, index: usize, package: &Package) {
        self.mark(index, PackageState::Cancelled);
        self.emitter.cancelled(&package.name);
    }

    /// Close the books: unstarted packages become `Cancelled`
    ///
    /// A package still `Running` here lost its worker; it is counted as failed.
    /// Packages still `Dispatched` were lost with a crashed worker's queue and
    /// are cancelled here.
    pub fn finish(
        mut self,
        leases: LeaseTotals,
        teardown: TeardownReport,
        started_at: DateTime<Utc>,
    ) -> RunReport {
        let stranded = self.board.names_in(PackageState::Running);
        for name in stranded {
            log::error!("[Controller] {} never reported a result", name);
            self.failed.push(PackageFailure {
                pname: name.clone(),
                name,
                error: "Worker stopped before reporting a result".to_string(),
                log_file: None,
            });
        }

        for name in self.board.cancel_pending() {
            self.emitter.cancelled(&name);
        }
        let cancelled = self.board.names_in(PackageState::Cancelled);

        RunReport {
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled,
            interrupted: self.cancel.is_interrupted(),
            leases,
            teardown,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn mark(&self, index: usize, state: PackageState) {
        if let Err(e) = self.board.transition(index, state) {
            log::warn!("[Controller] Package {}: {}", index, e);
        }
    }
}

/// Write the captured stdout of a failed package to `<log_dir>/<pname>.log`
pub fn write_failure_log(
    log_dir: &Path,
    package: &Package,
    stdout: &[u8],
) -> Result<PathBuf, UpdateError> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(package.log_file_name());
    std::fs::write(&path, stdout)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UpdateScript;
    use crate::update::error::ExecutionError;
    use crate::update::progress::RecordingEmitter;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn package(name: &str) -> Package {
        Package {
            name: format!("{}-1.0", name),
            pname: name.to_string(),
            update_script: UpdateScript::Program("true".to_string()),
            supported_features: BTreeSet::new(),
        }
    }

    fn exec_failure(stdout: &[u8]) -> UpdateError {
        UpdateError::Execution(ExecutionError::Failed {
            code: Some(1),
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
        })
    }

    #[test]
    fn test_valid_lifecycle() {
        assert_eq!(
            transition_state(PackageState::Dispatched, PackageState::Running),
            Ok(PackageState::Running)
        );
        assert_eq!(
            transition_state(PackageState::Running, PackageState::Failed),
            Ok(PackageState::Failed)
        );
        assert_eq!(
            transition_state(PackageState::Dispatched, PackageState::Cancelled),
            Ok(PackageState::Cancelled)
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            PackageState::Succeeded,
            PackageState::Failed,
            PackageState::Cancelled,
        ] {
            assert_eq!(
                transition_state(terminal, PackageState::Running),
                Err(StateTransitionError::AlreadyTerminal(terminal))
            );
        }
    }

    #[test]
    fn test_cannot_skip_running() {
        assert!(!can_transition(
            PackageState::Dispatched,
            PackageState::Succeeded
        ));
        assert!(!can_transition(
            PackageState::Running,
            PackageState::Cancelled
        ));
    }

    #[test]
    fn test_status_board() {
        let packages = vec![package("a"), package("b")];
        let board = StatusBoard::new(&packages);

        board.transition(0, PackageState::Running).unwrap();
        assert_eq!(board.state(0), Some(PackageState::Running));
        assert_eq!(board.names_in(PackageState::Dispatched), vec!["b-1.0"]);
        assert_eq!(
            board.transition(5, PackageState::Running),
            Err(StateTransitionError::UnknownPackage(5))
        );
    }

    #[test]
    fn test_failure_writes_log_and_cancels() {
        let log_dir = TempDir::new().unwrap();
        let packages = vec![package("a"), package("b")];
        let board = Arc::new(StatusBoard::new(&packages));
        let emitter = Arc::new(RecordingEmitter::new());
        let cancel = CancellationState::new();
        let mut controller = FailureController::new(
            false,
            log_dir.path(),
            cancel.clone(),
            emitter.clone(),
            board.clone(),
        );

        board.transition(0, PackageState::Running).unwrap();
        controller.record_failure(0, &packages[0], b"build log\n", &exec_failure(b"build log\n"));

        assert_eq!(cancel.reason(), Some(CancelReason::Failure));
        let log = std::fs::read(log_dir.path().join("a.log")).unwrap();
        assert_eq!(log, b"build log\n");
        assert!(emitter.contains("a-1.0: ERROR (update script exited with exit code 1)"));

        let report = controller.finish(LeaseTotals::default(), TeardownReport::default(), Utc::now());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].log_file, Some(log_dir.path().join("a.log")));
        assert_eq!(report.cancelled, vec!["b-1.0"]);
        assert!(emitter.contains("b-1.0: CANCELLED"));
        assert_eq!(report.exit_code(), EXIT_FAILURE);
        assert_eq!(board.state(1), Some(PackageState::Cancelled));
    }

    #[test]
    fn test_handed_back_packages_are_cancelled_in_input_order() {
        let log_dir = TempDir::new().unwrap();
        let packages = vec![package("a"), package("b"), package("c")];
        let board = Arc::new(StatusBoard::new(&packages));
        let emitter = Arc::new(RecordingEmitter::new());
        let mut controller = FailureController::new(
            true,
            log_dir.path(),
            CancellationState::new(),
            emitter.clone(),
            board.clone(),
        );

        controller.record_cancelled(2, &packages[2]);
        assert_eq!(board.state(2), Some(PackageState::Cancelled));
        assert_eq!(
            board.transition(2, PackageState::Running),
            Err(StateTransitionError::AlreadyTerminal(PackageState::Cancelled))
        );

        let report = controller.finish(LeaseTotals::default(), TeardownReport::default(), Utc::now());
        assert_eq!(report.cancelled, vec!["a-1.0", "b-1.0", "c-1.0"]);
        assert!(board.names_in(PackageState::Dispatched).is_empty());
        assert!(emitter.contains("c-1.0: CANCELLED"));
        assert!(emitter.contains("a-1.0: CANCELLED"));
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn test_keep_going_does_not_cancel() {
        let log_dir = TempDir::new().unwrap();
        let packages = vec![package("a")];
        let board = Arc::new(StatusBoard::new(&packages));
        let cancel = CancellationState::new();
        let mut controller = FailureController::new(
            true,
            log_dir.path(),
            cancel.clone(),
            Arc::new(RecordingEmitter::new()),
            board.clone(),
        );

        board.transition(0, PackageState::Running).unwrap();
        controller.record_failure(0, &packages[0], b"", &exec_failure(b""));

        assert!(!cancel.is_cancelled());
        assert_eq!(board.state(0), Some(PackageState::Failed));
    }

    #[test]
    fn test_stranded_running_package_counts_as_failed() {
        let log_dir = TempDir::new().unwrap();
        let packages = vec![package("a")];
        let board = Arc::new(StatusBoard::new(&packages));
        let controller = FailureController::new(
            true,
            log_dir.path(),
            CancellationState::new(),
            Arc::new(RecordingEmitter::new()),
            board.clone(),
        );

        board.transition(0, PackageState::Running).unwrap();
        let report = controller.finish(LeaseTotals::default(), TeardownReport::default(), Utc::now());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_exit_codes() {
        let mut report = RunReport {
            succeeded: vec!["a".to_string()],
            failed: Vec::new(),
            cancelled: Vec::new(),
            interrupted: false,
            leases: LeaseTotals::default(),
            teardown: TeardownReport::default(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        report.teardown.errors.push("branch busy".to_string());
        assert_eq!(report.exit_code(), EXIT_FAILURE);

        report.interrupted = true;
        assert_eq!(report.exit_code(), EXIT_ABORTED);
    }
}
