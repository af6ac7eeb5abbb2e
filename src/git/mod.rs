//! Git operations using git2-rs
//!
//! This module provides the version-control primitives the update runner needs:
//! - `manager` - Core GitManager struct and basic operations
//! - `branches` - Branch operations (create, delete, current branch)
//! - `worktrees` - Worktree management (add, remove, list)
//! - `commits` - Staging and commit creation
//! - `cherry_pick` - Reapplying commits onto the current branch
//! - `types` - Shared data structures

mod branches;
mod cherry_pick;
mod commits;
mod manager;
mod types;
mod worktrees;

// Re-export the main GitManager struct
pub use manager::GitManager;

pub use types::{BranchInfo, CommitInfo, WorktreeInfo};
