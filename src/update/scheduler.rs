//! Task scheduler
//!
//! Spawns one worker task per slot. Workers pull packages from a shared FIFO
//! queue and report a [`Completion`] per package over a bounded channel, in
//! completion order. The channel closes once every worker has exited.

use super::controller::{PackageState, StatusBoard};
use super::error::{ExecutionError, UpdateError};
use super::executor::{run_update_script, Execution};
use super::progress::ProgressEmitter;
use super::workspace_pool::{WorkspaceLease, WorkspaceSlot};
use crate::models::Package;
use crate::shutdown::CancellationState;
use crate::utils::lock_mutex_recover;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type WorkQueue = Arc<Mutex<VecDeque<(usize, Package)>>>;

/// Result of running one package, handed from a worker to the coordinator
#[derive(Debug)]
pub struct Completion {
    /// Position of the package in the input list
    pub index: usize,
    pub package: Package,
    /// Worker that ran the package
    pub worker: usize,
    pub outcome: Result<Execution, ExecutionError>,
    /// Workspace the package ran in; held until the coordinator drops it
    pub lease: Option<WorkspaceLease>,
}

/// Everything a worker shares with the rest of the run
#[derive(Clone)]
pub struct WorkerContext {
    /// Working directory for packages that run outside a workspace
    pub repo_root: PathBuf,
    /// Whether commit-capable packages run inside their worker's workspace
    pub commit: bool,
    pub cancel: CancellationState,
    pub emitter: Arc<dyn ProgressEmitter>,
    pub board: Arc<StatusBoard>,
}

pub struct Scheduler {
    completions: mpsc::Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    queue: WorkQueue,
}

impl Scheduler {
    /// Queue `packages` and start `workers` worker tasks
    ///
    /// Worker `i` owns `slots[i]` when the pool has that many slots.
    pub fn spawn(
        packages: Vec<Package>,
        workers: usize,
        slots: Vec<WorkspaceSlot>,
        ctx: WorkerContext,
    ) -> Self {
        let queue: WorkQueue = Arc::new(Mutex::new(packages.into_iter().enumerate().collect()));
        let (tx, completions) = mpsc::channel(workers.max(1));

        let handles = (0..workers)
            .map(|worker| {
                let slot = slots.get(worker).cloned();
                let queue = queue.clone();
                let tx = tx.clone();
                let ctx = ctx.clone();
                tokio::spawn(worker_loop(worker, slot, queue, tx, ctx))
            })
            .collect();

        log::info!("[Scheduler] Started {} worker(s)", workers);

        Self {
            completions,
            workers: handles,
            queue,
        }
    }

    /// Next completion in completion order, `None` once every worker exited
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.completions.recv().await
    }

    /// Wait for all workers and return the packages that were never started
    ///
    /// A worker that panicked is reported as [`UpdateError::Task`] after the
    /// remaining workers were joined.
    pub async fn join(self) -> Result<Vec<(usize, Package)>, UpdateError> {
        drop(self.completions);

        let mut first_error = None;
        for (worker, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                log::error!("[Scheduler] Worker {} stopped abnormally: {}", worker, e);
                first_error.get_or_insert(UpdateError::from(e));
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let leftover: Vec<(usize, Package)> = lock_mutex_recover(&self.queue).drain(..).collect();
        if !leftover.is_empty() {
            log::info!("[Scheduler] {} package(s) were not started", leftover.len());
        }
        Ok(leftover)
    }
}

async fn worker_loop(
    worker: usize,
    slot: Option<WorkspaceSlot>,
    queue: WorkQueue,
    tx: mpsc::Sender<Completion>,
    ctx: WorkerContext,
) {
    loop {
        if ctx.cancel.is_cancelled() {
            log::debug!("[Scheduler] Worker {} observed cancellation", worker);
            break;
        }

        let next = lock_mutex_recover(&queue).pop_front();
        let Some((index, package)) = next else {
            break;
        };

        let lease = match &slot {
            Some(slot) if ctx.commit && package.supports_commit() => Some(slot.acquire().await),
            _ => None,
        };

        // The previous merge in this workspace may have cancelled the run
        if ctx.cancel.is_cancelled() {
            drop(lease);
            lock_mutex_recover(&queue).push_front((index, package));
            break;
        }

        if let Err(e) = ctx.board.transition(index, PackageState::Running) {
            log::warn!("[Scheduler] Package {}: {}", package.name, e);
        }
        ctx.emitter.updating(&package.name);

        let working_dir = lease
            .as_ref()
            .map(|lease| lease.path().to_path_buf())
            .unwrap_or_else(|| ctx.repo_root.clone());

        log::debug!(
            "[Scheduler] Worker {} running {} in {:?}",
            worker,
            package.name,
            working_dir
        );
        let outcome = run_update_script(&package, &working_dir).await;

        let completion = Completion {
            index,
            package,
            worker,
            outcome,
            lease,
        };
        if tx.send(completion).await.is_err() {
            log::warn!("[Scheduler] Worker {} lost the coordinator", worker);
            break;
        }
    }

    log::debug!("[Scheduler] Worker {} exiting", worker);
}
