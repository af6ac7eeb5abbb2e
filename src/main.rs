//! batch-updater
//!
//! Runs the update scripts of a list of packages concurrently and, with
//! `--commit`, commits the changes they report onto the current branch.

use anyhow::{Context, Result};
use batch_updater_lib::shutdown::{register_signal_handlers, CancellationState};
use batch_updater_lib::update::{
    merge_config, ConfigManager, RunReport, RunnerConfig, UpdateRunner, EXIT_ABORTED,
    EXIT_FAILURE,
};
use batch_updater_lib::{parse_package_list, Package};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "batch-updater")]
#[command(author, version, about = "Run package update scripts in parallel")]
struct Cli {
    /// JSON file listing the packages to update
    packages: PathBuf,

    /// Number of update scripts to run at the same time
    #[arg(short = 'j', long)]
    max_workers: Option<usize>,

    /// Keep running the remaining packages after a failure
    #[arg(short, long)]
    keep_going: bool,

    /// Commit the changes reported by update scripts that support it
    #[arg(short, long)]
    commit: bool,

    /// Repository the update scripts modify (defaults to the current directory)
    #[arg(long, env = "BATCH_UPDATER_REPO")]
    repo: Option<PathBuf>,

    /// Directory for the logs of failed packages
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// YAML file with default settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not ask for confirmation before starting
    #[arg(short = 'y', long)]
    yes: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let file_config = match &cli.config {
        Some(path) => {
            let manager = ConfigManager::new(path);
            if !manager.exists() {
                log::warn!("Config file {:?} not found, using defaults", manager.path());
            }
            manager.read()?
        }
        None => RunnerConfig::default(),
    };
    let config = merge_config(
        &file_config,
        cli.max_workers,
        cli.keep_going,
        cli.commit,
        cli.log_dir.as_deref(),
    );
    config.validate()?;

    let json = std::fs::read_to_string(&cli.packages)
        .with_context(|| format!("Failed to read package list {}", cli.packages.display()))?;
    let packages = parse_package_list(&json)
        .with_context(|| format!("Invalid package list {}", cli.packages.display()))?;

    if packages.is_empty() {
        eprintln!("No packages to update.");
        return Ok(0);
    }

    if !cli.yes && !confirm(&packages)? {
        eprintln!("Aborting!");
        return Ok(EXIT_ABORTED);
    }

    let repo_root = match cli.repo {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let cancel = CancellationState::new();
    register_signal_handlers(cancel.clone())?;

    let runner = UpdateRunner::new(config, repo_root).with_cancellation(cancel);
    let report = runtime.block_on(runner.run(packages))?;

    print_summary(&report);
    Ok(report.exit_code())
}

/// List the packages and wait for the operator to press Enter
fn confirm(packages: &[Package]) -> Result<bool> {
    ask_to_continue(
        packages,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
}

/// The package list goes to `log`; the prompt itself goes to `prompt`
fn ask_to_continue(
    packages: &[Package],
    input: &mut impl BufRead,
    prompt: &mut impl Write,
    log: &mut impl Write,
) -> Result<bool> {
    writeln!(log, "Going to be running update for following packages:")?;
    for package in packages {
        writeln!(log, " - {}", package.name)?;
    }
    writeln!(log)?;
    log.flush()?;

    write!(prompt, "Press Enter key to continue...")?;
    prompt.flush()?;

    let mut answer = String::new();
    let read = input.read_line(&mut answer)?;
    if read == 0 || !answer.trim_end_matches(['\r', '\n']).is_empty() {
        return Ok(false);
    }

    writeln!(log)?;
    writeln!(log, "Running update for:")?;
    Ok(true)
}

fn print_summary(report: &RunReport) {
    for failure in &report.failed {
        match &failure.log_file {
            Some(path) => eprintln!(" - {}: failed, log written to {}", failure.name, path.display()),
            None => eprintln!(" - {}: failed ({})", failure.name, failure.error),
        }
    }
    for error in &report.teardown.errors {
        eprintln!("Workspace cleanup: {}", error);
    }

    if !report.interrupted && report.cancelled.is_empty() {
        eprintln!();
        eprintln!("Packages updated!");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_updater_lib::UpdateScript;
    use std::collections::BTreeSet;

    fn packages() -> Vec<Package> {
        vec![Package {
            name: "hello-2.12".to_string(),
            pname: "hello".to_string(),
            update_script: UpdateScript::Program("./update.sh".to_string()),
            supported_features: BTreeSet::new(),
        }]
    }

    #[test]
    fn test_prompt_goes_to_stdout_and_list_to_stderr() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let confirmed =
            ask_to_continue(&packages(), &mut &b"\n"[..], &mut stdout, &mut stderr).unwrap();

        assert!(confirmed);
        assert_eq!(String::from_utf8(stdout).unwrap(), "Press Enter key to continue...");
        let stderr = String::from_utf8(stderr).unwrap();
        assert!(stderr.starts_with("Going to be running update for following packages:\n - hello-2.12\n"));
        assert!(stderr.ends_with("Running update for:\n"));
        assert!(!stderr.contains("Press Enter"));
    }

    #[test]
    fn test_answer_or_eof_declines() {
        for input in [&b"no\n"[..], &b""[..]] {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let confirmed =
                ask_to_continue(&packages(), &mut &input[..], &mut stdout, &mut stderr).unwrap();
            assert!(!confirmed);
        }
    }
}
