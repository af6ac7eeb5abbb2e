//! Result merger
//!
//! Turns the change records printed by a commit-capable update script into
//! commits on the workspace branch, then replays those commits onto the branch
//! checked out in the main repository. Only the coordinator calls into the
//! merger, so merges never overlap.

use super::error::UpdateError;
use super::workspace_pool::Workspace;
use crate::git::{CommitInfo, GitManager};
use crate::models::{parse_change_records, Package};
use std::path::{Path, PathBuf};

/// Commits produced for one package
#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    /// Commits created in the workspace, in record order
    pub commits: Vec<CommitInfo>,
    /// The same changes as replayed onto the main checkout
    pub integrated: Vec<CommitInfo>,
}

#[derive(Debug, Clone)]
pub struct ResultMerger {
    repo_root: PathBuf,
    /// Branch checked out in the main repository when the run started
    target_branch: Option<String>,
}

impl ResultMerger {
    /// Open the main checkout and remember which branch it is on
    ///
    /// A detached HEAD is accepted; commits then land on the detached HEAD.
    pub fn new(repo_root: &Path) -> Result<Self, UpdateError> {
        let git_manager = GitManager::new(repo_root).map_err(|e| {
            UpdateError::Setup(format!(
                "Failed to open git repository {}: {}",
                repo_root.display(),
                e
            ))
        })?;

        let target_branch = match git_manager.get_current_branch() {
            Ok(branch) => Some(branch.name),
            Err(e) => {
                log::warn!("[ResultMerger] HEAD is not on a branch ({}), committing on detached HEAD", e);
                None
            }
        };

        log::debug!(
            "[ResultMerger] Integrating into {:?} at {:?}",
            target_branch,
            repo_root
        );

        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            target_branch,
        })
    }

    pub fn target_branch(&self) -> Option<&str> {
        self.target_branch.as_deref()
    }

    /// Commit every change record of `package` and integrate the commits
    ///
    /// `stdout` is the captured output of the package's update script and
    /// must be a JSON array of change records. An empty array is a no-op.
    pub fn merge(
        &self,
        package: &Package,
        stdout: &[u8],
        workspace: &Workspace,
    ) -> Result<MergeSummary, UpdateError> {
        let records = parse_change_records(stdout)?;
        if records.is_empty() {
            log::info!("[ResultMerger] {} reported no changes", package.name);
            return Ok(MergeSummary::default());
        }

        let workspace_git = GitManager::new(workspace.path())?;
        let mut commits = Vec::with_capacity(records.len());
        for record in &records {
            workspace_git.stage_paths(&record.files)?;
            let commit = workspace_git.create_commit(&record.commit_message())?;
            log::info!(
                "[ResultMerger] {} committed {} on {}",
                package.name,
                commit.short_id,
                workspace.branch()
            );
            commits.push(commit);
        }

        let main_git = GitManager::new(&self.repo_root)?;
        self.check_target(&main_git)?;

        let mut integrated = Vec::with_capacity(commits.len());
        for commit in &commits {
            let picked = main_git.cherry_pick(&commit.id)?;
            log::info!(
                "[ResultMerger] Integrated {} as {}",
                commit.short_id,
                picked.short_id
            );
            integrated.push(picked);
        }

        Ok(MergeSummary {
            commits,
            integrated,
        })
    }

    fn check_target(&self, main_git: &GitManager) -> Result<(), UpdateError> {
        let Some(expected) = &self.target_branch else {
            return Ok(());
        };

        let current = main_git.get_current_branch()?;
        if &current.name != expected {
            return Err(UpdateError::Git(git2::Error::from_str(&format!(
                "Main checkout moved from {} to {} during the run",
                expected, current.name
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UpdateScript, FEATURE_COMMIT};
    use crate::update::workspace_pool::WorkspacePool;
    use git2::{Repository, Signature};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn setup_test_repo() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();
        std::fs::write(temp_dir.path().join("versions"), "a=1\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("versions")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        temp_dir
    }

    fn commit_package() -> Package {
        Package {
            name: "a-1".to_string(),
            pname: "a".to_string(),
            update_script: UpdateScript::Program("./update.sh".to_string()),
            supported_features: BTreeSet::from([FEATURE_COMMIT.to_string()]),
        }
    }

    fn records_json(entries: &[(&str, &str, &str)]) -> Vec<u8> {
        let records: Vec<serde_json::Value> = entries
            .iter()
            .map(|(attr, old, new)| {
                serde_json::json!({
                    "attrPath": attr,
                    "oldVersion": old,
                    "newVersion": new,
                    "files": ["versions"],
                })
            })
            .collect();
        serde_json::to_vec(&records).unwrap()
    }

    #[test]
    fn test_merge_commits_in_order() {
        let repo_dir = setup_test_repo();
        let pool = WorkspacePool::create(repo_dir.path(), 1).unwrap();
        let workspace = pool.slots().remove(0).workspace().clone();
        let merger = ResultMerger::new(repo_dir.path()).unwrap();
        let package = commit_package();

        std::fs::write(workspace.path().join("versions"), "a=2\n").unwrap();
        let summary = merger
            .merge(&package, &records_json(&[("a", "1", "2")]), &workspace)
            .unwrap();
        assert_eq!(summary.commits.len(), 1);
        assert_eq!(summary.integrated.len(), 1);

        std::fs::write(workspace.path().join("versions"), "a=3\n").unwrap();
        merger
            .merge(&package, &records_json(&[("a", "2", "3")]), &workspace)
            .unwrap();

        let main_git = GitManager::new(repo_dir.path()).unwrap();
        let history = main_git.get_commit_history(10).unwrap();
        let messages: Vec<&str> = history.iter().map(|c| c.message.trim()).collect();
        assert_eq!(messages, vec!["a: 2 → 3", "a: 1 → 2", "Initial commit"]);
        assert_eq!(
            std::fs::read_to_string(repo_dir.path().join("versions")).unwrap(),
            "a=3\n"
        );

        drop(workspace);
        assert!(pool.teardown().is_clean());
    }

    #[test]
    fn test_empty_record_list_is_noop() {
        let repo_dir = setup_test_repo();
        let pool = WorkspacePool::create(repo_dir.path(), 1).unwrap();
        let workspace = pool.slots().remove(0).workspace().clone();
        let merger = ResultMerger::new(repo_dir.path()).unwrap();

        let summary = merger.merge(&commit_package(), b"[]", &workspace).unwrap();
        assert!(summary.commits.is_empty());
        assert_eq!(
            GitManager::new(repo_dir.path())
                .unwrap()
                .get_commit_history(10)
                .unwrap()
                .len(),
            1
        );

        drop(workspace);
        assert!(pool.teardown().is_clean());
    }

    #[test]
    fn test_invalid_output_is_rejected() {
        let repo_dir = setup_test_repo();
        let pool = WorkspacePool::create(repo_dir.path(), 1).unwrap();
        let workspace = pool.slots().remove(0).workspace().clone();
        let merger = ResultMerger::new(repo_dir.path()).unwrap();

        let err = merger
            .merge(&commit_package(), b"updated a\n", &workspace)
            .unwrap_err();
        assert!(matches!(err, UpdateError::ChangeRecords(_)));

        drop(workspace);
        assert!(pool.teardown().is_clean());
    }

    #[test]
    fn test_merge_refuses_moved_main_checkout() {
        let repo_dir = setup_test_repo();
        let pool = WorkspacePool::create(repo_dir.path(), 1).unwrap();
        let workspace = pool.slots().remove(0).workspace().clone();
        let merger = ResultMerger::new(repo_dir.path()).unwrap();
        assert!(merger.target_branch().is_some());

        let repo = Repository::open(repo_dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("elsewhere", &head, false).unwrap();
        repo.set_head("refs/heads/elsewhere").unwrap();

        std::fs::write(workspace.path().join("versions"), "a=2\n").unwrap();
        let err = merger
            .merge(&commit_package(), &records_json(&[("a", "1", "2")]), &workspace)
            .unwrap_err();
        assert!(matches!(err, UpdateError::Git(_)));
        assert!(err.to_string().contains("moved from"));

        drop(workspace);
        assert!(pool.teardown().is_clean());
    }
}
