//! Update script executor
//!
//! Runs one package's update script to completion and captures its output.

use super::error::ExecutionError;
use crate::models::Package;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Output of an update script that exited successfully
#[derive(Debug, Clone)]
pub struct Execution {
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Resolve a relative program path (`./update.sh`) against the working directory
///
/// Bare names (`nix-update`) are left for `PATH` lookup.
fn resolve_program(program: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        working_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Run the update script of `package` inside `working_dir`
///
/// Output is captured in full and never streamed. A non-zero exit status is
/// returned as [`ExecutionError::Failed`] carrying the captured output.
pub async fn run_update_script(
    package: &Package,
    working_dir: &Path,
) -> Result<Execution, ExecutionError> {
    let (program, args) =
        package
            .update_script
            .split()
            .ok_or_else(|| ExecutionError::EmptyCommand {
                package: package.name.clone(),
            })?;

    let program_path = resolve_program(program, working_dir);

    log::debug!(
        "[Executor] Running {:?} {:?} in {:?} for {}",
        program_path,
        args,
        working_dir,
        package.name
    );

    let output = Command::new(&program_path)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| ExecutionError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        log::debug!(
            "[Executor] {} exited with {:?}; stderr: {}",
            package.name,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Err(ExecutionError::Failed {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    Ok(Execution {
        code: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
