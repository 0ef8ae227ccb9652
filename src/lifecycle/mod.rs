//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (coordinator.rs → registry.rs):
//!     add_exit_handler → arm signal listeners (first time) → subscribe handler
//!                      → raise running max timeout (timeout.rs)
//!
//! Trigger (signals.rs → coordinator.rs):
//!     SIGTERM/SIGINT or "shutdown" message → emit_shutdown
//!     → subscribe safety-net handler → snapshot subscriber count
//!     → notify every handler in registration order
//!
//! Exit (coordinator.rs → exit.rs):
//!     handler completion → all slots done? → exit 0
//!     forced-exit timer fires → still pending? → exit 1
//! ```
//!
//! # Design Decisions
//! - One broadcast per cycle; repeated signals are ignored
//! - Shutdown has timeout: forced exit after deadline
//! - Exit is committed once, whichever path wins the race
//! - `reset()` returns everything to a freshly constructed state

pub mod coordinator;
pub mod exit;
pub mod registry;
pub mod signals;
pub mod timeout;

pub use coordinator::{Completion, CoordinatorSettings, ShutdownCoordinator};
pub use exit::{ExitOutcome, Exiter, ProcessExiter};
pub use registry::HandlerId;
pub use signals::{SignalName, SignalSource};
pub use timeout::DEFAULT_TIMEOUT;
