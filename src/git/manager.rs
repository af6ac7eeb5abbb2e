//! Core GitManager implementation
//!
//! Contains the GitManager struct and its basic operations

use git2::{Error as GitError, Repository, Signature};
use std::path::Path;

/// Fallback identity used when the repository has no `user.name`/`user.email`
pub const FALLBACK_AUTHOR_NAME: &str = "batch-updater";
pub const FALLBACK_AUTHOR_EMAIL: &str = "batch-updater@localhost";

/// Git manager for repository operations
///
/// A manager may be opened on the main checkout or on any of its worktrees;
/// HEAD and the index are always those of the opened checkout.
pub struct GitManager {
    pub(crate) repo: Repository,
}

impl GitManager {
    /// Create a new GitManager for the given repository path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Get the working directory of this checkout
    pub fn workdir(&self) -> Result<&Path, GitError> {
        self.repo
            .workdir()
            .ok_or_else(|| GitError::from_str("Repository has no working directory"))
    }

    /// Signature from the repository config, or the fallback identity
    pub(crate) fn signature(&self) -> Result<Signature<'static>, GitError> {
        self.repo
            .signature()
            .or_else(|_| Signature::now(FALLBACK_AUTHOR_NAME, FALLBACK_AUTHOR_EMAIL))
    }
}
