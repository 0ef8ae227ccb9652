//! Request routers that can observe a graceful exit.
//!
//! # Responsibilities
//! - Define the exit-state flag shared between a router and its hook
//! - Define the capability set a router needs to be hooked
//! - Wrap an axum `Router` so it offers that capability set
//!
//! # Design Decisions
//! - The flag is unset (`None`) until the router is hooked; a set flag is
//!   how a second hook detects the first
//! - The flag only ever moves from false to true

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{middleware, Router};

use crate::http::middleware::close_connections_when_exiting;

/// Shared "shutdown in progress" flag.
#[derive(Debug, Clone, Default)]
pub struct ExitState {
    exiting: Arc<AtomicBool>,
}

impl ExitState {
    /// A flag in the serving (false) state.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once shutdown has started.
    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Flip to exiting. Returns true only for the call that flipped it.
    pub fn begin_exit(&self) -> bool {
        !self.exiting.swap(true, Ordering::SeqCst)
    }
}

/// Capabilities a request router must offer to be hooked.
pub trait RequestRouter {
    /// The router's exit-state flag, `None` until hooked.
    fn exit_state(&self) -> Option<ExitState>;

    /// Attach an exit-state flag.
    fn set_exit_state(&mut self, state: ExitState);

    /// Install middleware that reacts to `state`.
    fn use_exit_middleware(&mut self, state: ExitState);
}

/// An axum router that carries an optional exit-state flag.
#[derive(Debug, Clone, Default)]
pub struct AppRouter {
    router: Router,
    exit_state: Option<ExitState>,
}

impl AppRouter {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            exit_state: None,
        }
    }

    /// The wrapped router, including any installed middleware.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn into_inner(self) -> Router {
        self.router
    }
}

impl From<Router> for AppRouter {
    fn from(router: Router) -> Self {
        Self::new(router)
    }
}

impl RequestRouter for AppRouter {
    fn exit_state(&self) -> Option<ExitState> {
        self.exit_state.clone()
    }

    fn set_exit_state(&mut self, state: ExitState) {
        self.exit_state = Some(state);
    }

    fn use_exit_middleware(&mut self, state: ExitState) {
        let router = std::mem::take(&mut self.router);
        self.router = router.layer(middleware::from_fn_with_state(
            state,
            close_connections_when_exiting,
        ));
    }
}
