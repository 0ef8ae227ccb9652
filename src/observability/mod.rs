//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Coordinator, hooks, config watcher produce:
//!     → logging.rs (tracing events + optional application sink)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → application logger set through ShutdownCoordinator::set_logger
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;
