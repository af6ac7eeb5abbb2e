//! Branch handling for GitManager
//!
//! Workspace branches are always created off the current HEAD and deleted
//! again at teardown; the start branch of a run is read through
//! [`GitManager::get_current_branch`].

use chrono::{DateTime, Utc};
use git2::{Branch, BranchType, Commit, Error as GitError};

use crate::git::types::{BranchInfo, CommitInfo};
use crate::git::GitManager;

impl GitManager {
    /// Branch `name` off HEAD; `force` moves an existing branch instead of failing
    pub fn create_branch(&self, name: &str, force: bool) -> Result<BranchInfo, GitError> {
        let tip = self.repo.head()?.peel_to_commit()?;
        let branch = self.repo.branch(name, &tip, force)?;
        log::debug!("[Git] Created branch {} at {}", name, tip.id());
        self.branch_to_info(&branch)
    }

    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        self.repo.find_branch(name, BranchType::Local)?.delete()
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Local branches, in the order git reports them
    #[cfg(test)]
    pub fn list_branches(&self) -> Result<Vec<BranchInfo>, GitError> {
        self.repo
            .branches(Some(BranchType::Local))?
            .map(|entry| entry.and_then(|(branch, _)| self.branch_to_info(&branch)))
            .collect()
    }

    /// The branch HEAD is on; an error when HEAD is detached or unborn
    pub fn get_current_branch(&self) -> Result<BranchInfo, GitError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Err(GitError::from_str("HEAD is detached"));
        }
        self.branch_to_info(&Branch::wrap(head))
    }

    pub(crate) fn branch_to_info(&self, branch: &Branch) -> Result<BranchInfo, GitError> {
        let name = branch
            .name()?
            .ok_or_else(|| GitError::from_str("Branch name is not valid UTF-8"))?
            .to_string();

        Ok(BranchInfo {
            name,
            tip: branch.get().peel_to_commit()?.id().to_string(),
            checked_out: branch.is_head(),
        })
    }

    pub(crate) fn commit_to_info(&self, commit: &Commit) -> Result<CommitInfo, GitError> {
        let id = commit.id().to_string();
        let author = commit.author();
        let authored_at = DateTime::<Utc>::from_timestamp(author.when().seconds(), 0)
            .unwrap_or_default();

        Ok(CommitInfo {
            short_id: id.chars().take(7).collect(),
            id,
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            author_name: String::from_utf8_lossy(author.name_bytes()).into_owned(),
            author_email: String::from_utf8_lossy(author.email_bytes()).into_owned(),
            authored_at,
        })
    }
}
