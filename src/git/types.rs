// Plain values returned by GitManager

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A local branch and the commit it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    /// Commit the branch points at
    pub tip: String,
    /// Whether HEAD of the opened checkout is this branch
    pub checked_out: bool,
}

/// A commit as reported after staging, committing or cherry-picking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: String,
    /// First seven hex digits of `id`, for log lines
    pub short_id: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_at: DateTime<Utc>,
}

/// A linked worktree of the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Administrative name under `.git/worktrees/`
    pub name: String,
    pub path: PathBuf,
    /// Branch checked out in the worktree; `None` when detached or unreadable
    pub branch: Option<String>,
}
