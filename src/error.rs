//! Error types shared across the crate.

use crate::lifecycle::signals::SignalName;

/// Errors surfaced by the shutdown coordinator and its hooks.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    /// The OS refused to install a handler for a termination signal.
    #[error("failed to bind listener for {signal}: {source}")]
    SignalBind {
        signal: SignalName,
        #[source]
        source: std::io::Error,
    },

    /// The signal is not available on this platform.
    #[error("signal {0} is not supported on this platform")]
    UnsupportedSignal(SignalName),

    /// An operation that spawns tasks was called outside a Tokio runtime.
    #[error("no Tokio runtime available")]
    NoRuntime,
}
