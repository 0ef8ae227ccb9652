//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ExitConfig (validated, immutable)
//!     → CoordinatorSettings for the shutdown coordinator
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → max timeout pushed to the running coordinator
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only the max timeout is hot-reloadable

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::ExitConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::ShutdownConfig;
