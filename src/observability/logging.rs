//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Forward coordinator messages to an application-supplied log sink
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and `RUST_LOG`
//! - The application sink is optional and swapped atomically; without one
//!   messages only go to tracing

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the global tracing subscriber.
pub fn init(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("graceful_exit={},tower_http=info", config.log_level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(config.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.json_logs).then(|| tracing_subscriber::fmt::layer()))
        .try_init()
}

struct Sink(Box<dyn Fn(&str) + Send + Sync>);

/// Application-supplied destination for coordinator log lines.
#[derive(Default)]
pub struct LogSink {
    sink: ArcSwapOption<Sink>,
}

impl LogSink {
    /// A sink that discards everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sink.
    pub fn set<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.sink.store(Some(Arc::new(Sink(Box::new(f)))));
    }

    /// Go back to discarding messages.
    pub fn clear(&self) {
        self.sink.store(None);
    }

    /// Forward `message` to the sink, if one is set.
    pub fn log(&self, message: &str) {
        if let Some(sink) = self.sink.load().as_ref() {
            (sink.0)(message);
        }
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("set", &self.sink.load().is_some())
            .finish()
    }
}

/// Emit a tracing event and forward the same line to a [`LogSink`].
macro_rules! sink_log {
    ($sink:expr, $level:ident, $($arg:tt)+) => {{
        let message = format!($($arg)+);
        tracing::$level!("{}", message);
        $sink.log(&message);
    }};
}

pub(crate) use sink_log;
