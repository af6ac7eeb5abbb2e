// Cooperative cancellation and signal trapping

use anyhow::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Why a run stopped dispatching new packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelReason {
    /// A package failed and keep-going is disabled
    Failure = 1,
    /// The operator interrupted the run (SIGINT, SIGTERM, SIGHUP)
    Interrupt = 2,
}

impl CancelReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CancelReason::Failure),
            2 => Some(CancelReason::Interrupt),
            _ => None,
        }
    }
}

/// Shared cancellation flag across the coordinator, workers and signal handlers
///
/// An interrupt always wins over a failure so the run exits with the abort code.
#[derive(Clone, Default)]
pub struct CancellationState {
    reason: Arc<AtomicU8>,
}

impl CancellationState {
    /// Create a new, un-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of all packages that have not started yet
    pub fn request_cancel(&self, reason: CancelReason) {
        let previous = self.reason.fetch_max(reason as u8, Ordering::SeqCst);
        if previous < reason as u8 {
            log::info!("Cancellation requested: {:?}", reason);
        }
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.reason.load(Ordering::SeqCst) != 0
    }

    /// The strongest reason requested so far
    pub fn reason(&self) -> Option<CancelReason> {
        CancelReason::from_u8(self.reason.load(Ordering::SeqCst))
    }

    /// Whether the operator interrupted the run
    pub fn is_interrupted(&self) -> bool {
        self.reason() == Some(CancelReason::Interrupt)
    }
}

/// Register signal handlers that interrupt the run
/// This sets up handlers for SIGINT (Ctrl+C), SIGTERM, and SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: CancellationState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow::anyhow!("Failed to register signal handlers: {}", e))?;

    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT => log::info!("Received SIGINT (Ctrl+C)"),
                SIGTERM => log::info!("Received SIGTERM"),
                SIGHUP => log::info!("Received SIGHUP"),
                _ => continue,
            }
            state.request_cancel(CancelReason::Interrupt);
        }
    });

    log::info!("Signal handlers registered (SIGINT, SIGTERM, SIGHUP)");
    Ok(())
}

/// Register signal handlers for Windows
#[cfg(windows)]
pub fn register_signal_handlers(state: CancellationState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C");
        state.request_cancel(CancelReason::Interrupt);
    })
    .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    log::info!("Signal handler registered (Ctrl+C)");
    Ok(())
}
