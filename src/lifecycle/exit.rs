//! Process exit.
//!
//! # Responsibilities
//! - Define the exit outcomes and their process status codes
//! - Abstract the process-exit primitive behind a trait
//! - Guarantee exit is committed at most once per shutdown cycle
//!
//! # Design Decisions
//! - The drain path and the timeout path race; the first to claim the
//!   guard exits, the other becomes a no-op
//! - `ProcessExiter` never returns; tests substitute a recording `Exiter`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::observability::logging::{sink_log, LogSink};
use crate::observability::metrics;

/// How a shutdown cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Every notified handler completed.
    Drained,
    /// The exit timeout elapsed with handlers still pending.
    TimedOut,
}

impl ExitOutcome {
    /// Process status code for this outcome.
    pub fn code(self) -> i32 {
        match self {
            ExitOutcome::Drained => 0,
            ExitOutcome::TimedOut => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExitOutcome::Drained => "drained",
            ExitOutcome::TimedOut => "timed_out",
        }
    }
}

/// The process-exit primitive.
pub trait Exiter: Send + Sync + 'static {
    /// Terminate with the status code of `outcome`.
    fn exit(&self, outcome: ExitOutcome);
}

/// Exits the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExiter;

impl Exiter for ProcessExiter {
    fn exit(&self, outcome: ExitOutcome) {
        std::process::exit(outcome.code());
    }
}

/// One-shot guard around an [`Exiter`].
pub struct ExitGuard {
    committed: AtomicBool,
    exiter: Arc<dyn Exiter>,
}

impl ExitGuard {
    pub fn new(exiter: Arc<dyn Exiter>) -> Self {
        Self {
            committed: AtomicBool::new(false),
            exiter,
        }
    }

    /// Exit with `outcome` unless an exit was already committed.
    ///
    /// Returns true if this call performed the exit.
    pub fn commit(&self, outcome: ExitOutcome, logger: &LogSink) -> bool {
        if self.committed.swap(true, Ordering::SeqCst) {
            tracing::debug!(outcome = outcome.as_str(), "Exit already committed; ignoring");
            return false;
        }
        match outcome {
            ExitOutcome::Drained => {
                sink_log!(logger, info, "all exit handlers completed; exiting with code {}", outcome.code())
            }
            ExitOutcome::TimedOut => {
                sink_log!(logger, warn, "exiting with code {} before all exit handlers completed", outcome.code())
            }
        }
        metrics::record_exit(outcome.as_str());
        self.exiter.exit(outcome);
        true
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    /// Re-arm the guard for a fresh cycle.
    pub fn reset(&self) {
        self.committed.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ExitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitGuard")
            .field("committed", &self.is_committed())
            .finish_non_exhaustive()
    }
}
