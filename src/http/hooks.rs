//! Hooks attaching HTTP servers and routers to the shutdown coordinator.
//!
//! # Responsibilities
//! - Register a cleanup task that closes and drains an [`HttpServer`]
//! - Give routers an exit-state flag plus connection-closing middleware
//! - Let callers unbind a hook before shutdown
//!
//! # Design Decisions
//! - Hooking is idempotent; a second hook is a no-op, not an error
//! - Routers are detected through the [`RequestRouter`] trait rather than
//!   inspected at runtime

use tokio::runtime::Handle;

use crate::error::ExitError;
use crate::http::router::{ExitState, RequestRouter};
use crate::http::server::HttpServer;
use crate::lifecycle::{HandlerId, ShutdownCoordinator};

/// Registrations made by a hook, for unbinding them early.
#[derive(Debug, Default)]
pub struct HookHandle {
    coordinator: Option<ShutdownCoordinator>,
    handlers: Vec<HandlerId>,
}

impl HookHandle {
    fn new(coordinator: &ShutdownCoordinator, handlers: Vec<HandlerId>) -> Self {
        Self {
            coordinator: Some(coordinator.clone()),
            handlers,
        }
    }

    /// A handle that unbinds nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if this handle holds no registrations.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Unbind the hook's cleanup tasks. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(coordinator) = &self.coordinator else {
            return;
        };
        for id in self.handlers.drain(..) {
            coordinator.remove_exit_handler(id);
        }
    }
}

/// Close and drain `server` on shutdown.
///
/// With `hook_sub_apps`, the server's router is hooked as well (see
/// [`hook_request_router`]). Hooking the same server twice returns an empty
/// handle.
pub fn hook_http_server(
    coordinator: &ShutdownCoordinator,
    server: &mut HttpServer,
    hook_sub_apps: bool,
) -> Result<HookHandle, ExitError> {
    if server.is_hooked() {
        tracing::debug!("HTTP server already hooked");
        return Ok(HookHandle::empty());
    }

    let runtime = Handle::try_current().map_err(|_| ExitError::NoRuntime)?;
    let control = server.control();
    let server_handler = coordinator.add_exit_handler(
        move |completion| {
            control.close();
            runtime.spawn(async move {
                control.stopped().await;
                tracing::info!("HTTP server drained");
                completion.done();
            });
        },
        Some("http server"),
        None,
    )?;

    let mut handlers = vec![server_handler];
    if hook_sub_apps {
        let router_hook = hook_request_router(coordinator, server.router_mut());
        merge_or_unbind(coordinator, &mut handlers, router_hook)?;
    }

    server.mark_hooked();
    Ok(HookHandle::new(coordinator, handlers))
}

/// Give `router` an exit-state flag that flips to true on shutdown, and
/// middleware that closes connections once it has.
///
/// Returns `Ok(None)` if the router already carries a flag.
pub fn hook_request_router<R>(
    coordinator: &ShutdownCoordinator,
    router: &mut R,
) -> Result<Option<HookHandle>, ExitError>
where
    R: RequestRouter + ?Sized,
{
    if router.exit_state().is_some() {
        tracing::debug!("Request router already hooked");
        return Ok(None);
    }

    let state = ExitState::new();
    let flag = state.clone();
    let handler = coordinator.add_exit_handler(
        move |completion| {
            if flag.begin_exit() {
                tracing::info!("Request router now closing connections");
            }
            completion.done();
        },
        Some("request router"),
        None,
    )?;

    router.set_exit_state(state.clone());
    router.use_exit_middleware(state);
    Ok(Some(HookHandle::new(coordinator, vec![handler])))
}

/// Fold a nested hook into `handlers`, or unbind everything registered so far
/// if it failed.
fn merge_or_unbind(
    coordinator: &ShutdownCoordinator,
    handlers: &mut Vec<HandlerId>,
    nested: Result<Option<HookHandle>, ExitError>,
) -> Result<(), ExitError> {
    match nested {
        Ok(Some(mut hook)) => {
            handlers.append(&mut hook.handlers);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            for id in handlers.drain(..) {
                coordinator.remove_exit_handler(id);
            }
            tracing::warn!(error = %e, "Hook failed; unbound its partial registrations");
            Err(e)
        }
    }
}
