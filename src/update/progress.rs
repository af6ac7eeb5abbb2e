//! Operator-visible progress lines
//!
//! Status output is kept apart from `log` diagnostics: the binary prints it
//! to stderr, tests record it.

use crate::utils::lock_mutex_recover;
use std::sync::Mutex;

/// Trait for emitting per-package progress
pub trait ProgressEmitter: Send + Sync {
    /// A worker is about to run the package's update script
    fn updating(&self, name: &str);

    /// The package finished and its changes (if any) were integrated
    fn done(&self, name: &str);

    /// The package failed; `output` is the captured stdout
    fn failed(&self, name: &str, output: &[u8], cause: &str);

    /// The package was never started because the run was cancelled
    fn cancelled(&self, name: &str);
}

/// Render the failure banner around a package's captured output
pub fn error_banner(name: &str, output: &[u8], cause: &str) -> String {
    let delimiter = format!("--- SHOWING ERROR LOG FOR {} ----------------------", name);
    let mut banner = format!(" - {}: ERROR\n\n{}\n\n", name, delimiter);
    banner.push_str(&String::from_utf8_lossy(output));
    if !banner.ends_with('\n') {
        banner.push('\n');
    }
    banner.push_str(&format!("{}\n\n{}", cause, delimiter));
    banner
}

/// Emitter writing the classic status lines to stderr
#[derive(Debug, Default)]
pub struct StderrEmitter;

impl ProgressEmitter for StderrEmitter {
    fn updating(&self, name: &str) {
        eprintln!(" - {}: UPDATING ...", name);
    }

    fn done(&self, name: &str) {
        eprintln!(" - {}: DONE.", name);
    }

    fn failed(&self, name: &str, output: &[u8], cause: &str) {
        eprintln!("{}", error_banner(name, output, cause));
    }

    fn cancelled(&self, name: &str) {
        eprintln!(" - {}: CANCELLED", name);
    }
}

/// Emitter keeping every line in memory
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    lines: Mutex<Vec<String>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded lines, in emission order
    pub fn lines(&self) -> Vec<String> {
        lock_mutex_recover(&self.lines).clone()
    }

    /// Whether some recorded line equals `line`
    pub fn contains(&self, line: &str) -> bool {
        lock_mutex_recover(&self.lines).iter().any(|l| l == line)
    }

    fn push(&self, line: String) {
        lock_mutex_recover(&self.lines).push(line);
    }
}

impl ProgressEmitter for RecordingEmitter {
    fn updating(&self, name: &str) {
        self.push(format!("{}: UPDATING", name));
    }

    fn done(&self, name: &str) {
        self.push(format!("{}: DONE", name));
    }

    fn failed(&self, name: &str, _output: &[u8], cause: &str) {
        self.push(format!("{}: ERROR ({})", name, cause));
    }

    fn cancelled(&self, name: &str) {
        self.push(format!("{}: CANCELLED", name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_banner_layout() {
        let banner = error_banner("hello", b"line one\nline two", "exit code 1");

        let lines: Vec<&str> = banner.lines().collect();
        assert_eq!(lines[0], " - hello: ERROR");
        assert_eq!(
            lines[2],
            "--- SHOWING ERROR LOG FOR hello ----------------------"
        );
        assert!(banner.contains("line one\nline two\nexit code 1\n"));
        assert_eq!(lines.last(), Some(&lines[2]));
    }

    #[test]
    fn test_error_banner_with_invalid_utf8() {
        let banner = error_banner("bin", &[0xff, 0xfe, b'x'], "boom");
        assert!(banner.contains('x'));
    }

    #[test]
    fn test_recording_emitter() {
        let emitter = RecordingEmitter::new();
        emitter.updating("a");
        emitter.done("a");
        emitter.failed("b", b"", "exit code 2");
        emitter.cancelled("c");

        assert_eq!(
            emitter.lines(),
            vec![
                "a: UPDATING",
                "a: DONE",
                "b: ERROR (exit code 2)",
                "c: CANCELLED"
            ]
        );
        assert!(emitter.contains("a: DONE"));
    }
}
