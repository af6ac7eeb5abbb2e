//! Worktree management for GitManager
//!
//! Contains methods for creating, listing, and removing worktrees

use git2::{BranchType, Error as GitError, Repository, Worktree, WorktreeAddOptions, WorktreePruneOptions};
use std::path::Path;

use crate::git::types::WorktreeInfo;
use crate::git::GitManager;

impl GitManager {
    /// Create a worktree at `path` checked out on a new branch off HEAD
    ///
    /// Fails if the branch already exists, so two workspaces can never share a branch.
    pub fn create_worktree(&self, branch: &str, path: &Path) -> Result<WorktreeInfo, GitError> {
        if self.branch_exists(branch) {
            return Err(GitError::from_str(&format!(
                "Branch already exists: {}",
                branch
            )));
        }
        self.create_branch(branch, false)?;

        let branch_ref = self.repo.find_branch(branch, BranchType::Local)?;

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch_ref.get()));

        // Branch names like "update/x" would nest directories under .git/worktrees/
        let worktree_name = worktree_name_for(branch);

        let worktree = match self.repo.worktree(&worktree_name, path, Some(&opts)) {
            Ok(worktree) => worktree,
            Err(e) => {
                // Leave no dangling branch behind a failed checkout
                if let Err(cleanup) = self.delete_branch(branch) {
                    log::warn!(
                        "[Git] Failed to delete branch {} after worktree error: {}",
                        branch,
                        cleanup
                    );
                }
                return Err(e);
            }
        };

        self.worktree_to_info(&worktree)
    }

    /// List all linked worktrees
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let worktrees = self.repo.worktrees()?;

        let mut result = Vec::new();
        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                result.push(self.worktree_to_info(&worktree)?);
            }
        }

        Ok(result)
    }

    /// Remove the worktree created for `branch`, including its working directory
    pub fn remove_worktree(&self, branch: &str) -> Result<(), GitError> {
        let worktree = self.repo.find_worktree(&worktree_name_for(branch))?;

        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).working_tree(true);
        worktree.prune(Some(&mut opts))?;

        log::debug!("[Git] Removed worktree for branch {}", branch);
        Ok(())
    }

    /// Convert a Worktree to WorktreeInfo
    pub(crate) fn worktree_to_info(&self, worktree: &Worktree) -> Result<WorktreeInfo, GitError> {
        let name = worktree.name().unwrap_or("").to_string();
        let path = worktree.path().to_path_buf();

        let branch = Repository::open(worktree.path())
            .ok()
            .and_then(|wt_repo| {
                let head = wt_repo.head().ok()?;
                if head.is_branch() {
                    head.shorthand().map(|s| s.to_string())
                } else {
                    None
                }
            });

        Ok(WorktreeInfo { name, path, branch })
    }
}

/// Administrative worktree name (`.git/worktrees/<name>`) for a branch
fn worktree_name_for(branch: &str) -> String {
    branch.replace('/', "-")
}
