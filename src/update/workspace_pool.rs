//! Workspace Pool for Parallel Updates
//!
//! Manages one git worktree per worker slot. Each worktree lives in a private
//! temporary directory on its own `update-*` branch and is reused by every
//! commit-capable package its worker runs. A per-workspace guard serializes
//! those packages: a worker takes a [`WorkspaceLease`] before running a
//! package, and the lease is dropped only after that package was merged.

use super::error::UpdateError;
use crate::git::GitManager;
use crate::utils::sanitize_branch_name;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Prefix of the private temporary directories
const TEMP_DIR_PREFIX: &str = "batch-updater-";

/// Name of the checkout inside each temporary directory
const CHECKOUT_DIR_NAME: &str = "checkout";

/// Lease counters of a workspace
#[derive(Debug, Default)]
pub struct WorkspaceStats {
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    overlaps: AtomicUsize,
    occupied: AtomicBool,
}

impl WorkspaceStats {
    /// Number of leases taken
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of leases dropped
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Times a lease was taken while another one was still alive (always 0)
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Whether a lease is currently alive
    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::SeqCst)
    }

    fn record_acquire(&self) {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.occupied.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record_release(&self) {
        self.occupied.store(false, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// An isolated checkout bound to one worker slot
#[derive(Debug)]
pub struct Workspace {
    /// Worker slot owning this workspace
    slot: usize,
    /// Path to the worktree checkout
    path: PathBuf,
    /// Private integration branch checked out in the worktree
    branch: String,
    stats: WorkspaceStats,
}

impl Workspace {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn stats(&self) -> &WorkspaceStats {
        &self.stats
    }
}

/// A workspace together with its guard, handed to exactly one worker
#[derive(Debug, Clone)]
pub struct WorkspaceSlot {
    workspace: Arc<Workspace>,
    guard: Arc<Mutex<()>>,
}

impl WorkspaceSlot {
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Wait until the previous package in this workspace has been merged
    pub async fn acquire(&self) -> WorkspaceLease {
        let guard = self.guard.clone().lock_owned().await;
        self.workspace.stats.record_acquire();
        log::debug!(
            "[WorkspacePool] Slot {} acquired {}",
            self.workspace.slot,
            self.workspace.branch
        );

        WorkspaceLease {
            workspace: self.workspace.clone(),
            _guard: guard,
        }
    }
}

/// Exclusive use of a workspace; dropping it releases the guard
#[derive(Debug)]
pub struct WorkspaceLease {
    workspace: Arc<Workspace>,
    _guard: OwnedMutexGuard<()>,
}

impl WorkspaceLease {
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn path(&self) -> &Path {
        &self.workspace.path
    }

    pub fn slot(&self) -> usize {
        self.workspace.slot
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        // Counters first; the guard field is dropped after this body runs
        self.workspace.stats.record_release();
        log::debug!(
            "[WorkspacePool] Slot {} released {}",
            self.workspace.slot,
            self.workspace.branch
        );
    }
}

/// Lease counters summed over every workspace of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseTotals {
    pub acquisitions: usize,
    pub releases: usize,
    pub overlaps: usize,
}

/// Result of tearing the pool down
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Number of worktrees that were removed
    pub worktrees_removed: usize,
    /// Number of branches that were deleted
    pub branches_deleted: usize,
    /// Any errors encountered during cleanup
    pub errors: Vec<String>,
}

impl TeardownReport {
    /// Check if teardown was clean (no errors)
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

struct PoolEntry {
    slot: WorkspaceSlot,
    dir: TempDir,
}

/// Pool of worktrees, one per worker slot
pub struct WorkspacePool {
    /// Path to the main checkout
    repo_path: PathBuf,
    entries: Vec<PoolEntry>,
}

impl WorkspacePool {
    /// A pool without workspaces, used when commit integration is off
    pub fn disabled() -> Self {
        Self {
            repo_path: PathBuf::new(),
            entries: Vec::new(),
        }
    }

    /// Create exactly `size` workspaces off the current HEAD
    ///
    /// Fails fast: if any workspace cannot be created, the ones already
    /// created are torn down again and nothing is returned.
    pub fn create(repo_path: &Path, size: usize) -> Result<Self, UpdateError> {
        let git_manager = GitManager::new(repo_path).map_err(|e| {
            UpdateError::Setup(format!(
                "Failed to open git repository {}: {}",
                repo_path.display(),
                e
            ))
        })?;

        let mut pool = Self {
            repo_path: repo_path.to_path_buf(),
            entries: Vec::with_capacity(size),
        };

        for slot in 0..size {
            match create_entry(&git_manager, slot) {
                Ok(entry) => pool.entries.push(entry),
                Err(e) => {
                    log::error!("[WorkspacePool] Failed to create workspace {}: {}", slot, e);
                    let report = pool.teardown();
                    if !report.is_clean() {
                        log::warn!(
                            "[WorkspacePool] Partial pool left {} cleanup error(s)",
                            report.errors.len()
                        );
                    }
                    return Err(UpdateError::Setup(e));
                }
            }
        }

        log::info!(
            "[WorkspacePool] Created {} workspace(s) for {:?}",
            size,
            repo_path
        );
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slots in worker order; slot `i` belongs to worker `i`
    pub fn slots(&self) -> Vec<WorkspaceSlot> {
        self.entries.iter().map(|entry| entry.slot.clone()).collect()
    }

    pub fn lease_totals(&self) -> LeaseTotals {
        self.entries
            .iter()
            .fold(LeaseTotals::default(), |mut totals, entry| {
                let stats = entry.slot.workspace.stats();
                totals.acquisitions += stats.acquisitions();
                totals.releases += stats.releases();
                totals.overlaps += stats.overlaps();
                totals
            })
    }

    /// Remove every worktree and delete every branch
    ///
    /// Best effort: each failure is logged and recorded, and cleanup moves on.
    pub fn teardown(self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.entries.is_empty() {
            return report;
        }

        let git_manager = match GitManager::new(&self.repo_path) {
            Ok(manager) => Some(manager),
            Err(e) => {
                log::warn!("[WorkspacePool] Failed to open git repository: {}", e);
                report
                    .errors
                    .push(format!("Failed to open git repository: {}", e));
                None
            }
        };

        for entry in self.entries {
            let workspace = entry.slot.workspace;

            if let Some(git_manager) = &git_manager {
                match git_manager.remove_worktree(&workspace.branch) {
                    Ok(()) => report.worktrees_removed += 1,
                    Err(e) => {
                        log::warn!(
                            "[WorkspacePool] Failed to remove worktree {:?}: {}",
                            workspace.path,
                            e
                        );
                        report.errors.push(format!(
                            "Failed to remove worktree {}: {}",
                            workspace.path.display(),
                            e
                        ));
                    }
                }

                match git_manager.delete_branch(&workspace.branch) {
                    Ok(()) => report.branches_deleted += 1,
                    Err(e) => {
                        log::warn!(
                            "[WorkspacePool] Failed to delete branch {}: {}",
                            workspace.branch,
                            e
                        );
                        report.errors.push(format!(
                            "Failed to delete branch {}: {}",
                            workspace.branch, e
                        ));
                    }
                }
            }

            if let Err(e) = entry.dir.close() {
                log::warn!("[WorkspacePool] Failed to remove temporary directory: {}", e);
                report
                    .errors
                    .push(format!("Failed to remove temporary directory: {}", e));
            }
        }

        log::info!(
            "[WorkspacePool] Teardown complete: {} worktrees removed, {} branches deleted",
            report.worktrees_removed,
            report.branches_deleted
        );

        report
    }
}

/// Create the worktree and branch for one slot
fn create_entry(git_manager: &GitManager, slot: usize) -> Result<PoolEntry, String> {
    let dir = tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir()
        .map_err(|e| format!("Failed to create temporary directory: {}", e))?;

    let basename = dir
        .path()
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| slot.to_string());
    let branch = format!("update-{}", sanitize_branch_name(&basename));
    let path = dir.path().join(CHECKOUT_DIR_NAME);

    git_manager
        .create_worktree(&branch, &path)
        .map_err(|e| format!("Failed to create worktree {}: {}", path.display(), e))?;

    log::info!(
        "[WorkspacePool] Created workspace {} at {:?} on branch {}",
        slot,
        path,
        branch
    );

    Ok(PoolEntry {
        slot: WorkspaceSlot {
            workspace: Arc::new(Workspace {
                slot,
                path,
                branch,
                stats: WorkspaceStats::default(),
            }),
            guard: Arc::new(Mutex::new(())),
        },
        dir,
    })
}
