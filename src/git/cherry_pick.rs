//! Cherry-pick handling for GitManager
//!
//! Reapplies commits from another branch onto the current HEAD. The pick is
//! computed in memory; the working tree is only touched once it is known to
//! apply cleanly, and then only on the paths the commit changes.

use git2::build::CheckoutBuilder;
use git2::{Error as GitError, Oid};

use crate::git::types::CommitInfo;
use crate::git::GitManager;

impl GitManager {
    /// Reapply a single commit on top of HEAD and commit the result
    ///
    /// The original author and message are kept. A conflicting or empty pick
    /// returns an error and leaves HEAD, the index and the working tree as
    /// they were. Local edits on other paths survive a successful pick; a
    /// local edit on a path the commit changes makes the pick fail instead.
    pub fn cherry_pick(&self, commit_id: &str) -> Result<CommitInfo, GitError> {
        let oid = Oid::from_str(commit_id)?;
        let commit = self.repo.find_commit(oid)?;
        let head_commit = self.repo.head()?.peel_to_commit()?;

        log::info!(
            "[GitManager] Cherry-picking {} onto {}",
            &commit_id[..commit_id.len().min(7)],
            head_commit.id()
        );

        let mut picked = self.repo.cherrypick_commit(&commit, &head_commit, 0, None)?;
        if picked.has_conflicts() {
            let mut conflict_files = Vec::new();
            for conflict in picked.conflicts()?.flatten() {
                if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                    conflict_files.push(String::from_utf8_lossy(&entry.path).to_string());
                }
            }

            log::warn!("[GitManager] Cherry-pick has conflicts: {:?}", conflict_files);
            return Err(GitError::from_str(&format!(
                "Cherry-pick of {} conflicts in: {}",
                commit.id(),
                conflict_files.join(", ")
            )));
        }

        let tree_id = picked.write_tree_to(&self.repo)?;
        if tree_id == head_commit.tree_id() {
            return Err(GitError::from_str(&format!(
                "Cherry-pick of {} is empty on the current branch",
                commit.id()
            )));
        }
        let tree = self.repo.find_tree(tree_id)?;

        // Safe checkout refuses to overwrite local edits and writes nothing then
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;

        let committer = self.signature()?;
        let new_oid = self.repo.commit(
            None,
            &commit.author(),
            &committer,
            commit.message().unwrap_or(""),
            &tree,
            &[&head_commit],
        )?;

        // Resolves to the checked-out branch, or to HEAD itself when detached
        let mut head_ref = self.repo.find_reference("HEAD")?.resolve()?;
        head_ref.set_target(
            new_oid,
            &format!("cherry-pick: {}", commit.summary().unwrap_or("")),
        )?;

        let new_commit = self.repo.find_commit(new_oid)?;
        self.commit_to_info(&new_commit)
    }
}
