//! Exit timeout resolution.
//!
//! # Responsibilities
//! - Track the largest timeout requested by any registered handler
//! - Hold the global max-timeout override
//! - Resolve the effective timeout from both plus the built-in default
//!
//! # Design Decisions
//! - Resolution is a pure function over three inputs; nothing is cached
//! - A handler timeout can shrink the wait below the default, never above
//!   an explicitly set lower override
//! - Clearing the override never clears the handler maximum

use std::time::Duration;

/// Built-in timeout used when neither handlers nor the override set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(120_000);

/// The three inputs the effective exit timeout is resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    default: Duration,
    max_override: Option<Duration>,
    handler_max: Duration,
}

impl TimeoutPolicy {
    /// Create a policy with the given built-in default.
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            max_override: None,
            handler_max: Duration::ZERO,
        }
    }

    /// Record a timeout requested by a handler, keeping the running maximum.
    pub fn observe_handler_timeout(&mut self, timeout: Duration) {
        if timeout > self.handler_max {
            self.handler_max = timeout;
        }
    }

    /// Set or clear the global max-timeout override.
    pub fn set_max_override(&mut self, max: Option<Duration>) {
        self.max_override = max;
    }

    /// The global override, if set.
    pub fn max_override(&self) -> Option<Duration> {
        self.max_override
    }

    /// Largest timeout requested by a handler so far (zero if none).
    pub fn handler_max(&self) -> Duration {
        self.handler_max
    }

    /// Resolve the effective timeout.
    pub fn resolve(&self) -> Duration {
        let handler_set = !self.handler_max.is_zero();
        if handler_set && self.max_override.map_or(true, |max| max > self.handler_max) {
            return self.handler_max;
        }
        self.max_override.unwrap_or(self.default)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
