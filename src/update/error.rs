//! Error types for update runs
//!
//! Per-package failures (`Execution`, `ChangeRecords`, `Git`) are reported and
//! isolated; only `Setup` and `Config` abort a run before dispatch.

use thiserror::Error;

/// Failure of a single update script
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("update script of {package} is empty")]
    EmptyCommand { package: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("update script exited with {}", describe_exit(.code))]
    Failed {
        code: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

impl ExecutionError {
    /// Captured standard output, empty if the process never ran
    pub fn stdout(&self) -> &[u8] {
        match self {
            ExecutionError::Failed { stdout, .. } => stdout,
            _ => &[],
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Workspace setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Update script output is not a list of changes: {0}")]
    ChangeRecords(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(err: tokio::task::JoinError) -> Self {
        UpdateError::Task(err.to_string())
    }
}
