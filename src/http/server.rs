//! HTTP server with connection draining.
//!
//! # Responsibilities
//! - Serve an [`AppRouter`] on a bound listener
//! - Stop accepting and drain open connections when asked to close
//! - Report when draining has finished
//!
//! # Design Decisions
//! - Close requests are level-triggered (watch channel), so a close issued
//!   before `run` starts is not lost
//! - Closing a server that never ran completes immediately
//! - `run` after close returns without serving

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::http::router::AppRouter;

/// Where a server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// Built but not serving yet.
    Idle,
    /// Accepting connections.
    Running,
    /// Asked to close; draining open connections.
    Closing,
    /// No longer serving.
    Stopped,
}

/// Handle for closing a server and waiting for it to drain.
#[derive(Debug, Clone)]
pub struct ServerControl {
    phase: Arc<watch::Sender<ServerPhase>>,
}

impl ServerControl {
    fn new() -> Self {
        let (phase, _) = watch::channel(ServerPhase::Idle);
        Self {
            phase: Arc::new(phase),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ServerPhase {
        *self.phase.borrow()
    }

    /// Stop accepting connections and start draining.
    pub fn close(&self) {
        self.phase.send_modify(|phase| {
            *phase = match *phase {
                ServerPhase::Idle | ServerPhase::Stopped => ServerPhase::Stopped,
                ServerPhase::Running | ServerPhase::Closing => ServerPhase::Closing,
            };
        });
        tracing::debug!(phase = ?self.phase(), "HTTP server close requested");
    }

    /// Resolves once the server has stopped serving.
    pub async fn stopped(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase == ServerPhase::Stopped).await;
    }

    async fn closing(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx
            .wait_for(|phase| matches!(phase, ServerPhase::Closing | ServerPhase::Stopped))
            .await;
    }

    /// Move Idle → Running. Returns false if the server was already closed.
    fn start(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == ServerPhase::Idle {
                *phase = ServerPhase::Running;
                true
            } else {
                false
            }
        })
    }

    fn finish(&self) {
        self.phase.send_replace(ServerPhase::Stopped);
    }
}

/// HTTP server that drains connections on close.
pub struct HttpServer {
    router: AppRouter,
    control: ServerControl,
    hooked: bool,
}

impl HttpServer {
    /// Create a new HTTP server for the given router.
    pub fn new(router: impl Into<AppRouter>) -> Self {
        Self {
            router: router.into(),
            control: ServerControl::new(),
            hooked: false,
        }
    }

    /// The router requests are dispatched to.
    pub fn router_mut(&mut self) -> &mut AppRouter {
        &mut self.router
    }

    /// A handle for closing this server.
    pub fn control(&self) -> ServerControl {
        self.control.clone()
    }

    pub(crate) fn is_hooked(&self) -> bool {
        self.hooked
    }

    pub(crate) fn mark_hooked(&mut self) {
        self.hooked = true;
    }

    /// Run the server, accepting connections on the given listener until
    /// closed, then drain open connections.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let control = self.control;
        if !control.start() {
            tracing::warn!(address = %addr, "HTTP server closed before it started");
            return Ok(());
        }

        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_inner().layer(TraceLayer::new_for_http());
        let drain = control.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { drain.closing().await })
            .await;

        control.finish();
        tracing::info!(address = %addr, "HTTP server stopped");
        result
    }
}
