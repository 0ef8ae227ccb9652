//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0) and addresses
//! - Reject signals the platform cannot deliver
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ExitConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ExitConfig;
use crate::lifecycle::signals::SignalName;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("shutdown.default_timeout_ms must be greater than zero")]
    ZeroDefaultTimeout,

    #[error("shutdown.max_timeout_ms must be greater than zero when set")]
    ZeroMaxTimeout,

    #[error("shutdown needs at least one signal or the shutdown message")]
    NoTriggers,

    #[error("signal {0} is listed more than once")]
    DuplicateSignal(SignalName),

    #[error("signal {0} is not supported on this platform")]
    UnsupportedSignal(SignalName),

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ExitConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let shutdown = &config.shutdown;

    if shutdown.default_timeout_ms == 0 {
        errors.push(ValidationError::ZeroDefaultTimeout);
    }
    if shutdown.max_timeout_ms == Some(0) {
        errors.push(ValidationError::ZeroMaxTimeout);
    }
    if shutdown.signals.is_empty() && !shutdown.listen_for_messages {
        errors.push(ValidationError::NoTriggers);
    }

    let mut seen = HashSet::new();
    for &signal in &shutdown.signals {
        if !seen.insert(signal) {
            errors.push(ValidationError::DuplicateSignal(signal));
        } else if !signal.is_supported() {
            errors.push(ValidationError::UnsupportedSignal(signal));
        }
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
