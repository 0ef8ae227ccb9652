//! Shutdown coordination.
//!
//! # Responsibilities
//! - Register exit handlers and arm signal listeners on first registration
//! - Broadcast the shutdown once per cycle to every registered handler
//! - Arm the forced-exit timer through the built-in safety-net handler
//! - Exit with 0 once every handler completed, or 1 when the timeout wins
//!
//! # Design Decisions
//! - One coordinator value owns all state; clones share it
//! - The state lock is never held while a handler runs, so handlers may
//!   complete synchronously or call back into the coordinator
//! - The subscriber count is captured before the first handler runs
//! - Handlers registered after the broadcast are never notified for that
//!   cycle
//! - The safety-net handler completes right after arming the timer; it never
//!   holds up the drain
//! - `reset()` bumps a generation counter; completions and timers from an
//!   older generation are ignored

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::config::ShutdownConfig;
use crate::error::ExitError;
use crate::lifecycle::exit::{ExitGuard, ExitOutcome, Exiter, ProcessExiter};
use crate::lifecycle::registry::{HandlerId, HandlerRegistry};
use crate::lifecycle::signals::{SignalName, SignalRegistry, SignalSource, Trigger};
use crate::lifecycle::timeout::{TimeoutPolicy, DEFAULT_TIMEOUT};
use crate::observability::logging::{sink_log, LogSink};
use crate::observability::metrics;

const SAFETY_NET_DESCRIPTION: &str = "default exit timer";

/// Static settings a coordinator is built with.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Timeout used when neither handlers nor the override set one.
    pub default_timeout: Duration,
    /// Initial max-timeout override.
    pub max_timeout: Option<Duration>,
    /// OS signals bound when listeners are armed.
    pub signals: Vec<SignalName>,
    /// Whether to listen for the inter-process "shutdown" message.
    pub listen_for_messages: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            max_timeout: None,
            signals: SignalName::platform_defaults(),
            listen_for_messages: true,
        }
    }
}

impl From<&ShutdownConfig> for CoordinatorSettings {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            max_timeout: config.max_timeout_ms.map(Duration::from_millis),
            signals: config.signals.clone(),
            listen_for_messages: config.listen_for_messages,
        }
    }
}

/// Completion signal handed to each exit handler.
///
/// Call [`Completion::done`] when cleanup has finished. Calling it more than
/// once is harmless.
#[derive(Clone)]
pub struct Completion {
    coordinator: ShutdownCoordinator,
    generation: u64,
    slot: usize,
    source: SignalSource,
}

impl Completion {
    /// Mark this handler's cleanup as finished.
    pub fn done(&self) {
        self.coordinator.complete(self.generation, self.slot);
    }

    /// What triggered the shutdown.
    pub fn source(&self) -> &SignalSource {
        &self.source
    }

    /// 1-based slot assigned to the handler.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("generation", &self.generation)
            .field("slot", &self.slot)
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug)]
struct State {
    generation: u64,
    registry: HandlerRegistry,
    timeouts: TimeoutPolicy,
    safety_net_armed: bool,
    broadcast_fired: bool,
    timer: Option<AbortHandle>,
    runtime: Option<Handle>,
}

impl State {
    fn new(settings: &CoordinatorSettings) -> Self {
        Self {
            generation: 0,
            registry: HandlerRegistry::new(),
            timeouts: initial_timeouts(settings),
            safety_net_armed: false,
            broadcast_fired: false,
            timer: None,
            runtime: None,
        }
    }
}

fn initial_timeouts(settings: &CoordinatorSettings) -> TimeoutPolicy {
    let mut timeouts = TimeoutPolicy::new(settings.default_timeout);
    timeouts.set_max_override(settings.max_timeout);
    timeouts
}

struct Inner {
    settings: CoordinatorSettings,
    state: Mutex<State>,
    signals: SignalRegistry,
    exit: ExitGuard,
    logger: LogSink,
}

/// Coordinator for graceful shutdown.
///
/// Cheap to clone; every clone drives the same shutdown cycle.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator that exits the process when shutdown ends.
    pub fn new(settings: CoordinatorSettings) -> Self {
        Self::with_exiter(settings, Arc::new(ProcessExiter))
    }

    /// Create a coordinator with a custom exit primitive.
    pub fn with_exiter(settings: CoordinatorSettings, exiter: Arc<dyn Exiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new(&settings)),
                settings,
                signals: SignalRegistry::new(),
                exit: ExitGuard::new(exiter),
                logger: LogSink::new(),
            }),
        }
    }

    /// Register an exit handler.
    ///
    /// The handler runs once when shutdown is triggered and must call
    /// [`Completion::done`] when it has finished. `timeout` shortens (or,
    /// without a lower max, lengthens) the forced-exit deadline.
    /// Arms the signal listeners on first use.
    pub fn add_exit_handler<F>(
        &self,
        handler: F,
        description: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<HandlerId, ExitError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.register_signal_listeners()?;

        let (id, pending, late) = {
            let mut state = self.lock();
            let late = state.broadcast_fired;
            let id = if late {
                // Never notified in this cycle, so it is not kept either.
                state.registry.allocate_id()
            } else {
                if let Some(timeout) = timeout {
                    state.timeouts.observe_handler_timeout(timeout);
                }
                state
                    .registry
                    .subscribe(description.map(str::to_owned), Box::new(handler))
            };
            (id, state.registry.subscriber_count(), late)
        };

        if late {
            tracing::warn!(
                description = description.unwrap_or_default(),
                "Exit handler registered after shutdown started; it will not run"
            );
            return Ok(id);
        }
        tracing::debug!(
            description = description.unwrap_or_default(),
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            pending,
            "Exit handler registered"
        );
        metrics::record_handlers_registered(pending);
        Ok(id)
    }

    /// Register an async exit handler.
    ///
    /// `f` is called with the shutdown source and its future is spawned on
    /// the runtime that was current at registration; the handler completes
    /// when the future resolves.
    pub fn add_async_exit_handler<F, Fut>(
        &self,
        description: Option<&str>,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<HandlerId, ExitError>
    where
        F: FnOnce(SignalSource) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| ExitError::NoRuntime)?;
        self.add_exit_handler(
            move |completion| {
                let source = completion.source().clone();
                runtime.spawn(async move {
                    f(source).await;
                    completion.done();
                });
            },
            description,
            timeout,
        )
    }

    /// Unbind a handler before shutdown starts.
    ///
    /// Returns false if it was already notified or never registered.
    pub fn remove_exit_handler(&self, id: HandlerId) -> bool {
        let (removed, pending) = {
            let mut state = self.lock();
            let removed = state.registry.unsubscribe(id);
            (removed, state.registry.subscriber_count())
        };
        if removed {
            tracing::debug!(?id, pending, "Exit handler removed");
            metrics::record_handlers_registered(pending);
        }
        removed
    }

    /// Set or clear the global max timeout.
    pub fn set_max_timeout(&self, max: Option<Duration>) {
        self.lock().timeouts.set_max_override(max);
        tracing::debug!(max_timeout_ms = max.map(|t| t.as_millis() as u64), "Max exit timeout updated");
    }

    /// The timeout the forced exit would currently use.
    pub fn get_timeout(&self) -> Duration {
        self.lock().timeouts.resolve()
    }

    /// Send coordinator log lines to `f` in addition to tracing.
    pub fn set_logger<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.logger.set(f);
    }

    /// Bind the configured signal listeners. No-op while already bound.
    pub fn register_signal_listeners(&self) -> Result<(), ExitError> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let trigger: Trigger = Arc::new(move |source| {
            if let Some(inner) = weak.upgrade() {
                ShutdownCoordinator { inner }.emit_shutdown(source);
            }
        });

        let settings = &self.inner.settings;
        let bound = self
            .inner
            .signals
            .register(&settings.signals, settings.listen_for_messages, trigger)?;
        if bound {
            self.lock().runtime = Handle::try_current().ok();
            tracing::info!(
                signals = ?settings.signals,
                listen_for_messages = settings.listen_for_messages,
                "Exit signal listeners armed"
            );
        }
        Ok(())
    }

    /// Unbind every signal listener; they are re-armed on the next
    /// registration.
    pub fn teardown_signal_listeners(&self) {
        self.inner.signals.teardown();
        tracing::debug!("Exit signal listeners unbound");
    }

    /// Number of signal listeners still waiting for their signal.
    pub fn signal_listener_count(&self) -> usize {
        self.inner.signals.bound_count()
    }

    /// Deliver an inter-process message. Only `"shutdown"` triggers.
    pub fn deliver_message(&self, message: &str) -> bool {
        self.inner.signals.deliver(message)
    }

    /// Trigger the shutdown broadcast.
    ///
    /// Only the first trigger of a cycle broadcasts; later ones are ignored.
    pub fn emit_shutdown(&self, source: SignalSource) {
        let (subscribers, generation) = {
            let mut state = self.lock();
            if state.broadcast_fired {
                drop(state);
                tracing::info!(source = %source, "Shutdown already in progress; ignoring trigger");
                return;
            }
            if !state.safety_net_armed {
                state.safety_net_armed = true;
                let weak = Arc::downgrade(&self.inner);
                state.registry.subscribe(
                    Some(SAFETY_NET_DESCRIPTION.to_string()),
                    Box::new(move |completion| {
                        if let Some(inner) = weak.upgrade() {
                            ShutdownCoordinator { inner }.arm_exit_timer(completion);
                        }
                    }),
                );
            }
            state.broadcast_fired = true;
            (state.registry.take_for_broadcast(), state.generation)
        };

        metrics::record_trigger(&source.to_string());
        metrics::record_handlers_registered(0);
        tracing::info!(source = %source, handlers = subscribers.len(), "Graceful exit started");

        for subscriber in subscribers {
            let slot = {
                let mut state = self.lock();
                if state.generation != generation {
                    // A handler reset the coordinator mid-broadcast.
                    break;
                }
                state.registry.open_slot()
            };
            sink_log!(
                self.inner.logger,
                info,
                "graceful exit triggered by {} for {}",
                source,
                subscriber.description.as_deref().unwrap_or("<anonymous handler>")
            );
            (subscriber.handler)(Completion {
                coordinator: self.clone(),
                generation,
                slot,
                source: source.clone(),
            });
        }
    }

    /// Whether the shutdown broadcast has fired in this cycle.
    pub fn is_exiting(&self) -> bool {
        self.lock().broadcast_fired
    }

    /// Number of handlers waiting for the broadcast.
    pub fn pending_handlers(&self) -> usize {
        self.lock().registry.subscriber_count()
    }

    /// Fully reset the coordinator: listeners, handlers, timeouts, timer and
    /// exit guard. Timeouts return to the configured settings; handler ids
    /// keep counting so earlier handles never match new registrations.
    /// Safe to call repeatedly.
    pub fn reset(&self) {
        self.teardown_signal_listeners();
        let (unrun, timer) = {
            let mut state = self.lock();
            state.generation += 1;
            state.timeouts = initial_timeouts(&self.inner.settings);
            state.safety_net_armed = false;
            state.broadcast_fired = false;
            state.runtime = None;
            (state.registry.clear(), state.timer.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        drop(unrun);
        self.inner.exit.reset();
        metrics::record_handlers_registered(0);
        tracing::debug!("Shutdown coordinator reset");
    }

    fn complete(&self, generation: u64, slot: usize) {
        let (drained, timer) = {
            let mut state = self.lock();
            if state.generation != generation {
                drop(state);
                sink_log!(self.inner.logger, warn, "ignoring completion for slot {} from a previous shutdown cycle", slot);
                return;
            }
            match state.registry.complete(slot) {
                Some(1) => {}
                Some(count) => tracing::debug!(slot, count, "Exit handler completed more than once"),
                None => {
                    drop(state);
                    sink_log!(self.inner.logger, warn, "ignoring completion for unknown slot {}", slot);
                    return;
                }
            }
            let drained = state.registry.is_fully_drained();
            let timer = if drained { state.timer.take() } else { None };
            (drained, timer)
        };

        metrics::record_completion();
        tracing::debug!(slot, drained, "Exit handler completed");
        if drained {
            if let Some(timer) = timer {
                timer.abort();
            }
            self.inner.exit.commit(ExitOutcome::Drained, &self.inner.logger);
        }
    }

    fn arm_exit_timer(&self, completion: Completion) {
        let timeout = self.get_timeout();
        let runtime = Handle::try_current()
            .ok()
            .or_else(|| self.lock().runtime.clone());

        match runtime {
            Some(runtime) => {
                let coordinator = self.clone();
                let generation = completion.generation;
                let task = runtime.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    coordinator.on_timeout(generation, timeout);
                });
                let mut state = self.lock();
                if state.generation == generation {
                    if let Some(previous) = state.timer.replace(task.abort_handle()) {
                        previous.abort();
                    }
                } else {
                    task.abort();
                }
                drop(state);
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Forced exit timer armed");
            }
            None => {
                sink_log!(self.inner.logger, error, "no async runtime available; forced exit timer not armed");
            }
        }

        completion.done();
    }

    fn on_timeout(&self, generation: u64, timeout: Duration) {
        let drained = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            state.registry.is_fully_drained()
        };
        if drained {
            tracing::debug!("Exit timer fired after handlers drained");
            return;
        }
        sink_log!(
            self.inner.logger,
            error,
            "graceful exit timed out after {}ms; forcing exit",
            timeout.as_millis()
        );
        self.inner.exit.commit(ExitOutcome::TimedOut, &self.inner.logger);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorSettings::default())
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("settings", &self.inner.settings)
            .field("exit", &self.inner.exit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ExitOutcome>>);

    impl Exiter for Recorder {
        fn exit(&self, outcome: ExitOutcome) {
            self.0.lock().unwrap().push(outcome);
        }
    }

    fn coordinator() -> (ShutdownCoordinator, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let settings = CoordinatorSettings {
            signals: Vec::new(),
            ..Default::default()
        };
        (ShutdownCoordinator::with_exiter(settings, recorder.clone()), recorder)
    }

    #[tokio::test]
    async fn test_timeout_scenarios() {
        let (coordinator, _) = coordinator();
        assert_eq!(coordinator.get_timeout(), DEFAULT_TIMEOUT);

        coordinator
            .add_exit_handler(|c| c.done(), Some("a"), Some(Duration::from_millis(322)))
            .unwrap();
        coordinator.set_max_timeout(Some(Duration::from_millis(1231)));
        assert_eq!(coordinator.get_timeout(), Duration::from_millis(322));
        coordinator.set_max_timeout(None);
        assert_eq!(coordinator.get_timeout(), Duration::from_millis(322));

        coordinator.reset();
        coordinator
            .add_exit_handler(|c| c.done(), Some("b"), Some(Duration::from_millis(1231 * 2)))
            .unwrap();
        coordinator.set_max_timeout(Some(Duration::from_millis(1231)));
        assert_eq!(coordinator.get_timeout(), Duration::from_millis(1231));
    }

    #[tokio::test]
    async fn test_settings_max_timeout_applies() {
        let recorder = Arc::new(Recorder::default());
        let settings = CoordinatorSettings {
            signals: Vec::new(),
            max_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let coordinator = ShutdownCoordinator::with_exiter(settings, recorder);
        assert_eq!(coordinator.get_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reset_restores_configured_max_timeout() {
        let recorder = Arc::new(Recorder::default());
        let settings = CoordinatorSettings {
            signals: Vec::new(),
            max_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let coordinator = ShutdownCoordinator::with_exiter(settings, recorder);
        coordinator
            .add_exit_handler(|c| c.done(), None, Some(Duration::from_secs(1)))
            .unwrap();
        coordinator.set_max_timeout(Some(Duration::from_millis(200)));
        assert_eq!(coordinator.get_timeout(), Duration::from_millis(200));

        coordinator.reset();
        assert_eq!(coordinator.get_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_late_handler_is_not_kept() {
        let (coordinator, _) = coordinator();
        coordinator.add_exit_handler(|_| {}, Some("stuck"), None).unwrap();
        coordinator.emit_shutdown(SignalSource::Manual);

        let late = coordinator
            .add_exit_handler(|c| c.done(), Some("late"), Some(Duration::from_secs(900)))
            .unwrap();
        assert_eq!(coordinator.pending_handlers(), 0);
        assert!(!coordinator.remove_exit_handler(late));
        assert_eq!(coordinator.get_timeout(), DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_synchronous_completions_exit_once() {
        let (coordinator, recorder) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            coordinator
                .add_exit_handler(
                    move |c| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        c.done();
                        c.done();
                    },
                    None,
                    None,
                )
                .unwrap();
        }

        coordinator.emit_shutdown(SignalSource::Manual);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*recorder.0.lock().unwrap(), vec![ExitOutcome::Drained]);
    }

    #[tokio::test]
    async fn test_slots_are_assigned_in_registration_order() {
        let (coordinator, _) = coordinator();
        let slots = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let slots = slots.clone();
            coordinator
                .add_exit_handler(
                    move |c| slots.lock().unwrap().push((name, c.slot())),
                    Some(name),
                    None,
                )
                .unwrap();
        }
        coordinator.emit_shutdown(SignalSource::Manual);
        assert_eq!(*slots.lock().unwrap(), vec![("first", 1), ("second", 2)]);
    }

    #[tokio::test]
    async fn test_logger_receives_trigger_lines() {
        let (coordinator, _) = coordinator();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        coordinator.set_logger(move |line| captured.lock().unwrap().push(line.to_string()));
        coordinator
            .add_exit_handler(|c| c.done(), Some("flush cache"), None)
            .unwrap();

        coordinator.emit_shutdown(SignalSource::Signal(SignalName::Terminate));
        let lines = lines.lock().unwrap();
        assert!(lines.contains(&"graceful exit triggered by SIGTERM for flush cache".to_string()));
    }

    #[tokio::test]
    async fn test_remove_exit_handler() {
        let (coordinator, _) = coordinator();
        let id = coordinator.add_exit_handler(|_| {}, None, None).unwrap();
        assert_eq!(coordinator.pending_handlers(), 1);
        assert!(coordinator.remove_exit_handler(id));
        assert!(!coordinator.remove_exit_handler(id));
        assert_eq!(coordinator.pending_handlers(), 0);
    }

    #[test]
    fn test_add_exit_handler_requires_runtime() {
        let (coordinator, _) = coordinator();
        let result = coordinator.add_exit_handler(|c| c.done(), None, None);
        assert!(matches!(result, Err(ExitError::NoRuntime)));
        assert_eq!(coordinator.pending_handlers(), 0);
    }
}
