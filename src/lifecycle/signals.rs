//! OS signal and shutdown-message listeners.
//!
//! # Responsibilities
//! - Bind one single-fire listener per configured termination signal
//! - Bind a listener for the inter-process "shutdown" message
//! - Translate the first delivery into a call to the shutdown trigger
//! - Unbind everything on teardown so listeners can be re-armed
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe); each listener is a task
//! - Arming is idempotent until teardown
//! - A listener that already fired has finished its task; unbinding it is
//!   logged and tolerated, never an error
//! - Only the exact payload "shutdown" triggers; other messages are ignored

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ExitError;

/// Message payload that triggers shutdown when delivered.
pub const SHUTDOWN_MESSAGE: &str = "shutdown";

/// Termination signals the coordinator can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalName {
    #[serde(rename = "SIGINT")]
    Interrupt,
    #[serde(rename = "SIGTERM")]
    Terminate,
    #[serde(rename = "SIGQUIT")]
    Quit,
    #[serde(rename = "SIGHUP")]
    Hangup,
    /// Ctrl-Break on Windows consoles.
    #[serde(rename = "SIGBREAK")]
    Break,
}

impl SignalName {
    /// Signals bound when nothing else is configured.
    pub fn platform_defaults() -> Vec<SignalName> {
        if cfg!(windows) {
            vec![SignalName::Interrupt, SignalName::Break]
        } else {
            vec![SignalName::Interrupt, SignalName::Terminate]
        }
    }

    /// Whether a listener for this signal can be bound on this platform.
    pub fn is_supported(self) -> bool {
        match self {
            SignalName::Interrupt => true,
            SignalName::Terminate => true,
            SignalName::Quit | SignalName::Hangup => cfg!(unix),
            SignalName::Break => cfg!(windows),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalName::Interrupt => "SIGINT",
            SignalName::Terminate => "SIGTERM",
            SignalName::Quit => "SIGQUIT",
            SignalName::Hangup => "SIGHUP",
            SignalName::Break => "SIGBREAK",
        }
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a shutdown to be triggered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalSource {
    /// An OS termination signal.
    Signal(SignalName),
    /// The inter-process "shutdown" message.
    Message,
    /// Triggered directly through the coordinator.
    Manual,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSource::Signal(name) => write!(f, "{}", name),
            SignalSource::Message => f.write_str(SHUTDOWN_MESSAGE),
            SignalSource::Manual => f.write_str("manual"),
        }
    }
}

/// Callback listeners invoke when their signal arrives.
pub type Trigger = Arc<dyn Fn(SignalSource) + Send + Sync>;

type SignalFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bound listeners keyed by the source they listen for.
#[derive(Debug, Default)]
pub struct SignalRegistry {
    armed: AtomicBool,
    listeners: DashMap<SignalSource, Vec<JoinHandle<()>>>,
    messages: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind listeners for `signals` (and the shutdown message when
    /// `listen_for_messages` is set).
    ///
    /// Returns `Ok(false)` when listeners are already armed. On a bind
    /// failure everything bound so far is torn down again.
    pub fn register(
        &self,
        signals: &[SignalName],
        listen_for_messages: bool,
        trigger: Trigger,
    ) -> Result<bool, ExitError> {
        if self.armed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                self.armed.store(false, Ordering::SeqCst);
                return Err(ExitError::NoRuntime);
            }
        };

        for &name in signals {
            // Signal streams register with the runtime's driver.
            let bound = {
                let _guard = runtime.enter();
                listen(name)
            };
            let signal = match bound {
                Ok(signal) => signal,
                Err(e) => {
                    self.teardown();
                    return Err(e);
                }
            };
            let trigger = trigger.clone();
            let handle = runtime.spawn(async move {
                signal.await;
                tracing::info!(signal = %name, "Termination signal received");
                trigger(SignalSource::Signal(name));
            });
            self.listeners
                .entry(SignalSource::Signal(name))
                .or_default()
                .push(handle);
        }

        if listen_for_messages {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let handle = runtime.spawn(async move {
                while let Some(message) = rx.recv().await {
                    if message == SHUTDOWN_MESSAGE {
                        tracing::info!("Shutdown message received");
                        trigger(SignalSource::Message);
                        break;
                    }
                    tracing::debug!(message = %message, "Ignoring non-shutdown message");
                }
            });
            self.listeners
                .entry(SignalSource::Message)
                .or_default()
                .push(handle);
            *self.lock_messages() = Some(tx);
        }

        tracing::debug!(
            signals = ?signals,
            listen_for_messages,
            "Signal listeners bound"
        );
        Ok(true)
    }

    /// Deliver an inter-process message to the bound message listener.
    ///
    /// Returns false when no message listener is bound (never armed, torn
    /// down, or already fired).
    pub fn deliver(&self, message: &str) -> bool {
        let messages = self.lock_messages();
        match messages.as_ref() {
            Some(tx) => match tx.send(message.to_string()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(message = %message, "Message listener already fired; message dropped");
                    false
                }
            },
            None => {
                tracing::debug!(message = %message, "No message listener bound; message dropped");
                false
            }
        }
    }

    /// Unbind every tracked listener and allow re-arming.
    pub fn teardown(&self) {
        let sources: Vec<SignalSource> = self.listeners.iter().map(|e| e.key().clone()).collect();
        for source in sources {
            let Some((_, handles)) = self.listeners.remove(&source) else {
                continue;
            };
            for handle in handles {
                if handle.is_finished() {
                    // Single-fire listener already removed itself.
                    tracing::debug!(source = %source, "Listener already fired; nothing to unbind");
                } else {
                    handle.abort();
                }
            }
        }
        self.lock_messages().take();
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Whether listeners are currently armed.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Number of listeners still waiting for their signal.
    pub fn bound_count(&self) -> usize {
        self.listeners
            .iter()
            .map(|e| e.value().iter().filter(|h| !h.is_finished()).count())
            .sum()
    }

    fn lock_messages(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(unix)]
fn listen(name: SignalName) -> Result<SignalFuture, ExitError> {
    use tokio::signal::unix::{signal, SignalKind};

    let kind = match name {
        SignalName::Interrupt => SignalKind::interrupt(),
        SignalName::Terminate => SignalKind::terminate(),
        SignalName::Quit => SignalKind::quit(),
        SignalName::Hangup => SignalKind::hangup(),
        SignalName::Break => return Err(ExitError::UnsupportedSignal(name)),
    };
    let mut stream = signal(kind).map_err(|source| ExitError::SignalBind {
        signal: name,
        source,
    })?;
    Ok(Box::pin(async move {
        stream.recv().await;
    }))
}

#[cfg(windows)]
fn listen(name: SignalName) -> Result<SignalFuture, ExitError> {
    use tokio::signal::windows;

    let bind_error = |source| ExitError::SignalBind {
        signal: name,
        source,
    };
    match name {
        SignalName::Interrupt => {
            let mut stream = windows::ctrl_c().map_err(bind_error)?;
            Ok(Box::pin(async move {
                stream.recv().await;
            }))
        }
        SignalName::Break => {
            let mut stream = windows::ctrl_break().map_err(bind_error)?;
            Ok(Box::pin(async move {
                stream.recv().await;
            }))
        }
        SignalName::Terminate => {
            let mut stream = windows::ctrl_close().map_err(bind_error)?;
            Ok(Box::pin(async move {
                stream.recv().await;
            }))
        }
        SignalName::Quit | SignalName::Hangup => Err(ExitError::UnsupportedSignal(name)),
    }
}

#[cfg(not(any(unix, windows)))]
fn listen(name: SignalName) -> Result<SignalFuture, ExitError> {
    Err(ExitError::UnsupportedSignal(name))
}
