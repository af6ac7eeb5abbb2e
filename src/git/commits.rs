//! Commit operations for GitManager
//!
//! Contains methods for staging paths, creating commits and reading history

use git2::{Error as GitError, IndexAddOption};
use std::path::{Path, PathBuf};

use crate::git::types::CommitInfo;
use crate::git::GitManager;

impl GitManager {
    /// Stage exactly the given paths, like `git add <paths>`
    ///
    /// Paths may be relative to the working directory or absolute inside it.
    /// A directory stages everything below it (ignored files excepted),
    /// including deletions. A path that no longer exists on disk is staged
    /// as a removal of the file or of everything that was below it.
    pub fn stage_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(), GitError> {
        let workdir = self.workdir()?.to_path_buf();
        let mut index = self.repo.index()?;

        for path in paths {
            let relative = relative_to_workdir(&workdir, path.as_ref())?;
            let on_disk = workdir.join(&relative);
            if on_disk.is_dir() {
                index.add_all([relative.as_path()], IndexAddOption::DEFAULT, None)?;
                index.update_all([relative.as_path()], None)?;
            } else if on_disk.exists() {
                index.add_path(&relative)?;
            } else {
                index.update_all([relative.as_path()], None)?;
            }
        }

        index.write()?;
        Ok(())
    }

    /// Commit the current index on top of HEAD
    ///
    /// Refuses to create a commit whose tree equals its parent's tree.
    pub fn create_commit(&self, message: &str) -> Result<CommitInfo, GitError> {
        let signature = self.signature()?;

        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent_commit = self.repo.head()?.peel_to_commit()?;
        if parent_commit.tree_id() == tree_id {
            return Err(GitError::from_str(&format!(
                "Nothing to commit for '{}'",
                message
            )));
        }

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent_commit],
        )?;

        let commit = self.repo.find_commit(oid)?;
        self.commit_to_info(&commit)
    }

    /// Get commit history from HEAD, newest first
    pub fn get_commit_history(&self, max_count: usize) -> Result<Vec<CommitInfo>, GitError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;

        let mut result = Vec::new();
        for oid in revwalk.take(max_count) {
            let commit = self.repo.find_commit(oid?)?;
            result.push(self.commit_to_info(&commit)?);
        }

        Ok(result)
    }

    /// Get a specific commit
    #[cfg(test)]
    pub fn get_commit(&self, commit_id: &str) -> Result<CommitInfo, GitError> {
        let oid = git2::Oid::from_str(commit_id)?;
        let commit = self.repo.find_commit(oid)?;
        self.commit_to_info(&commit)
    }
}

/// Express `path` relative to `workdir`, rejecting paths outside of it
fn relative_to_workdir(workdir: &Path, path: &Path) -> Result<PathBuf, GitError> {
    if path.is_relative() {
        return Ok(path.to_path_buf());
    }

    // Temp directories often sit behind symlinks (/tmp -> /private/tmp)
    let canonical_workdir = workdir.canonicalize().unwrap_or_else(|_| workdir.to_path_buf());
    let canonical_path = path
        .parent()
        .and_then(|parent| parent.canonicalize().ok())
        .and_then(|parent| path.file_name().map(|name| parent.join(name)))
        .unwrap_or_else(|| path.to_path_buf());

    canonical_path
        .strip_prefix(&canonical_workdir)
        .or_else(|_| path.strip_prefix(workdir))
        .map(Path::to_path_buf)
        .map_err(|_| {
            GitError::from_str(&format!(
                "Path {} is outside of the working directory {}",
                path.display(),
                workdir.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_is_kept() {
        let rel = relative_to_workdir(Path::new("/repo"), Path::new("pkgs/foo.nix")).unwrap();
        assert_eq!(rel, PathBuf::from("pkgs/foo.nix"));
    }

    #[test]
    fn test_absolute_path_inside_workdir() {
        let rel =
            relative_to_workdir(Path::new("/repo"), Path::new("/repo/pkgs/foo.nix")).unwrap();
        assert_eq!(rel, PathBuf::from("pkgs/foo.nix"));
    }

    #[test]
    fn test_absolute_path_outside_workdir() {
        assert!(relative_to_workdir(Path::new("/repo"), Path::new("/elsewhere/foo.nix")).is_err());
    }
}
