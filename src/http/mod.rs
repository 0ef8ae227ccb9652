//! HTTP integration subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     axum Router → router.rs (AppRouter) → server.rs (HttpServer)
//!     → hooks.rs registers cleanup tasks with the coordinator
//!
//! Shutdown broadcast:
//!     server cleanup   → stop accepting → drain connections → done
//!     router cleanup   → ExitState = true → done
//!     requests in flight → middleware adds `Connection: close`
//! ```

pub mod hooks;
pub mod middleware;
pub mod router;
pub mod server;

pub use hooks::{hook_http_server, hook_request_router, HookHandle};
pub use router::{AppRouter, ExitState, RequestRouter};
pub use server::{HttpServer, ServerControl, ServerPhase};
