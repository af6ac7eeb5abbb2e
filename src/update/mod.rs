// Concurrent package updates with commit integration through git worktrees

pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod merger;
pub mod progress;
pub mod scheduler;
pub mod workspace_pool;

pub use config::{merge_config, ConfigManager, RunnerConfig, DEFAULT_MAX_WORKERS};
pub use controller::{
    PackageFailure, PackageState, RunReport, StatusBoard, EXIT_ABORTED, EXIT_FAILURE,
    EXIT_SUCCESS,
};
pub use error::{ExecutionError, UpdateError};
pub use merger::{MergeSummary, ResultMerger};
pub use progress::{ProgressEmitter, RecordingEmitter, StderrEmitter};
pub use workspace_pool::{
    LeaseTotals, TeardownReport, Workspace, WorkspacePool, WorkspaceStats,
};

use crate::models::Package;
use crate::shutdown::CancellationState;
use chrono::Utc;
use controller::FailureController;
use scheduler::{Completion, Scheduler, WorkerContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs a batch of packages against one repository
pub struct UpdateRunner {
    config: RunnerConfig,
    repo_root: PathBuf,
    emitter: Arc<dyn ProgressEmitter>,
    cancel: CancellationState,
}

impl UpdateRunner {
    pub fn new(config: RunnerConfig, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            repo_root: repo_root.into(),
            emitter: Arc::new(StderrEmitter),
            cancel: CancellationState::new(),
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn ProgressEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Share an existing cancellation state (e.g. one wired to signal handlers)
    pub fn with_cancellation(mut self, cancel: CancellationState) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationState {
        &self.cancel
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Run every package and return the outcome of the batch
    ///
    /// Only configuration and workspace setup errors are returned as `Err`;
    /// nothing has been dispatched in that case. Package failures, worker
    /// crashes and cleanup errors all end up in the [`RunReport`].
    pub async fn run(&self, packages: Vec<Package>) -> Result<RunReport, UpdateError> {
        self.config.validate()?;
        let started_at = Utc::now();

        log::info!(
            "[UpdateRunner] Updating {} package(s) with {} worker(s), commit: {}, keep going: {}",
            packages.len(),
            self.config.max_workers,
            self.config.commit,
            self.config.keep_going
        );

        let (merger, pool) = if self.config.commit {
            let repo_root = self.repo_root.clone();
            let size = self.config.max_workers;
            tokio::task::spawn_blocking(move || -> Result<_, UpdateError> {
                let merger = ResultMerger::new(&repo_root)?;
                let pool = WorkspacePool::create(&repo_root, size)?;
                Ok((Some(merger), pool))
            })
            .await??
        } else {
            (None, WorkspacePool::disabled())
        };

        if let Some(merger) = &merger {
            log::info!(
                "[UpdateRunner] Integrating commits into {}",
                merger.target_branch().unwrap_or("detached HEAD")
            );
        }

        let board = Arc::new(StatusBoard::new(&packages));
        let mut controller = FailureController::new(
            self.config.keep_going,
            &self.config.log_dir,
            self.cancel.clone(),
            self.emitter.clone(),
            board.clone(),
        );

        let ctx = WorkerContext {
            repo_root: self.repo_root.clone(),
            commit: self.config.commit,
            cancel: self.cancel.clone(),
            emitter: self.emitter.clone(),
            board,
        };
        let mut scheduler =
            Scheduler::spawn(packages, self.config.max_workers, pool.slots(), ctx);

        while let Some(completion) = scheduler.next_completion().await {
            handle_completion(completion, merger.as_ref(), &mut controller).await;
        }

        match scheduler.join().await {
            Ok(leftover) => {
                for (index, package) in leftover {
                    controller.record_cancelled(index, &package);
                }
            }
            Err(e) => log::error!("[UpdateRunner] {}", e),
        }

        let leases = pool.lease_totals();
        let teardown = tokio::task::spawn_blocking(move || pool.teardown())
            .await
            .unwrap_or_else(|e| TeardownReport {
                errors: vec![format!("Workspace teardown task failed: {}", e)],
                ..TeardownReport::default()
            });

        let report = controller.finish(leases, teardown, started_at);
        log::info!(
            "[UpdateRunner] Finished: {} succeeded, {} failed, {} cancelled",
            report.succeeded.len(),
            report.failed.len(),
            report.cancelled.len()
        );
        Ok(report)
    }
}

/// Merge (if applicable) and record one completion, then release its workspace
async fn handle_completion(
    completion: Completion,
    merger: Option<&ResultMerger>,
    controller: &mut FailureController,
) {
    let Completion {
        index,
        package,
        worker,
        outcome,
        lease,
    } = completion;

    log::debug!(
        "[UpdateRunner] Handling {} from worker {}",
        package.name,
        worker
    );

    match outcome {
        Err(e) => {
            let stdout = e.stdout().to_vec();
            controller.record_failure(index, &package, &stdout, &UpdateError::from(e));
        }
        Ok(execution) => {
            let merged = match (merger, &lease) {
                (Some(merger), Some(lease)) => {
                    let merger = merger.clone();
                    let workspace = lease.workspace().clone();
                    let to_merge = package.clone();
                    let stdout = execution.stdout.clone();
                    tokio::task::spawn_blocking(move || {
                        merger.merge(&to_merge, &stdout, &workspace)
                    })
                    .await
                    .map_err(UpdateError::from)
                    .and_then(|result| result)
                    .map(|summary| summary.integrated.len())
                }
                _ => Ok(0),
            };

            match merged {
                Ok(commits) => {
                    if commits > 0 {
                        log::info!(
                            "[UpdateRunner] {} integrated {} commit(s)",
                            package.name,
                            commits
                        );
                    }
                    controller.record_success(index, &package);
                }
                Err(e) => controller.record_failure(index, &package, &execution.stdout, &e),
            }
        }
    }

    drop(lease);
}
