//! Graceful exit coordination for long-running servers.
//!
//! Register cleanup tasks with a [`ShutdownCoordinator`]; on the first
//! termination signal (or "shutdown" message) every task is notified, and
//! the process exits with 0 once all of them completed, or with 1 when the
//! exit timeout elapses first.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::ExitConfig;
pub use error::ExitError;
pub use http::{hook_http_server, hook_request_router, HttpServer};
pub use lifecycle::{Completion, CoordinatorSettings, ExitOutcome, ShutdownCoordinator};
