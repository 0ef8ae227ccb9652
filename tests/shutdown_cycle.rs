//! End-to-end shutdown cycles against a coordinator with a recording exiter.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use graceful_exit::lifecycle::{
    Completion, CoordinatorSettings, ExitOutcome, SignalName, SignalSource, DEFAULT_TIMEOUT,
};

mod common;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[tokio::test(start_paused = true)]
async fn test_stuck_handler_exits_with_1_at_timeout() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_exit_handler(|_completion| {}, Some("stuck"), Some(ms(500)))
        .unwrap();

    let start = Instant::now();
    coordinator.emit_shutdown(SignalSource::Manual);

    sleep(ms(499)).await;
    assert!(exits.try_recv().is_err(), "must not exit before the timeout");

    let outcome = common::expect_exit(&mut exits, Duration::from_secs(10)).await;
    assert_eq!(outcome, ExitOutcome::TimedOut);
    assert_eq!(outcome.code(), 1);
    assert!(start.elapsed() >= ms(500));
}

#[tokio::test(start_paused = true)]
async fn test_immediate_completion_exits_with_0() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_exit_handler(|completion| completion.done(), Some("instant"), None)
        .unwrap();

    coordinator.emit_shutdown(SignalSource::Manual);
    assert_eq!(exits.try_recv(), Ok(ExitOutcome::Drained));
}

#[tokio::test(start_paused = true)]
async fn test_no_handlers_still_exits() {
    let (coordinator, mut exits) = common::test_coordinator();

    coordinator.emit_shutdown(SignalSource::Signal(SignalName::Terminate));
    let outcome = common::expect_exit(&mut exits, coordinator.get_timeout() + ms(10)).await;
    assert_eq!(outcome, ExitOutcome::Drained);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_triggers_broadcast_once() {
    let (coordinator, mut exits) = common::test_coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    coordinator
        .add_async_exit_handler(Some("counted"), None, move |_source| async move {
            counted.fetch_add(1, Ordering::SeqCst);
            sleep(ms(100)).await;
        })
        .unwrap();

    coordinator.emit_shutdown(SignalSource::Signal(SignalName::Interrupt));
    coordinator.emit_shutdown(SignalSource::Signal(SignalName::Terminate));
    coordinator.deliver_message("shutdown");

    let outcome = common::expect_exit(&mut exits, Duration::from_secs(10)).await;
    assert_eq!(outcome, ExitOutcome::Drained);

    // Nothing else fires, not even the forced-exit timer
    sleep(DEFAULT_TIMEOUT + Duration::from_secs(1)).await;
    assert!(exits.try_recv().is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_async_handler_drains_when_future_resolves() {
    let (coordinator, mut exits) = common::test_coordinator();
    let seen_source = Arc::new(Mutex::new(None));
    let captured = seen_source.clone();
    coordinator
        .add_async_exit_handler(Some("flush"), Some(ms(5_000)), move |source| async move {
            *captured.lock().unwrap() = Some(source);
            sleep(ms(250)).await;
        })
        .unwrap();

    let start = Instant::now();
    coordinator.emit_shutdown(SignalSource::Signal(SignalName::Terminate));

    let outcome = common::expect_exit(&mut exits, Duration::from_secs(10)).await;
    assert_eq!(outcome, ExitOutcome::Drained);
    assert!(start.elapsed() >= ms(250));
    assert!(start.elapsed() < ms(5_000));
    assert_eq!(
        *seen_source.lock().unwrap(),
        Some(SignalSource::Signal(SignalName::Terminate))
    );
}

#[tokio::test(start_paused = true)]
async fn test_synchronous_completion_waits_for_slower_handlers() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_exit_handler(|completion| completion.done(), Some("fast"), None)
        .unwrap();
    coordinator
        .add_async_exit_handler(Some("slow"), None, |_| async {
            sleep(ms(100)).await;
        })
        .unwrap();

    coordinator.emit_shutdown(SignalSource::Manual);

    sleep(ms(50)).await;
    assert!(exits.try_recv().is_err(), "slow handler still pending");

    let outcome = common::expect_exit(&mut exits, Duration::from_secs(10)).await;
    assert_eq!(outcome, ExitOutcome::Drained);
}

#[tokio::test(start_paused = true)]
async fn test_only_shutdown_message_triggers() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_exit_handler(|completion| completion.done(), None, None)
        .unwrap();
    assert_eq!(coordinator.signal_listener_count(), 1);

    assert!(coordinator.deliver_message("status"));
    common::settle().await;
    assert!(!coordinator.is_exiting());

    assert!(coordinator.deliver_message("shutdown"));
    common::settle().await;
    assert!(coordinator.is_exiting());
    assert_eq!(exits.try_recv(), Ok(ExitOutcome::Drained));
}

#[tokio::test(start_paused = true)]
async fn test_late_registration_is_not_notified() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_exit_handler(|_| {}, Some("stuck"), Some(ms(1_000)))
        .unwrap();
    coordinator.emit_shutdown(SignalSource::Manual);

    let late_ran = Arc::new(AtomicBool::new(false));
    let flag = late_ran.clone();
    coordinator
        .add_exit_handler(
            move |completion| {
                flag.store(true, Ordering::SeqCst);
                completion.done();
            },
            Some("late"),
            None,
        )
        .unwrap();

    let outcome = common::expect_exit(&mut exits, Duration::from_secs(10)).await;
    assert_eq!(outcome, ExitOutcome::TimedOut);
    assert!(!late_ran.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_max_timeout_caps_handler_timeout() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_exit_handler(|_| {}, Some("slow"), Some(ms(10_000)))
        .unwrap();
    coordinator.set_max_timeout(Some(ms(1_000)));
    assert_eq!(coordinator.get_timeout(), ms(1_000));

    let start = Instant::now();
    coordinator.emit_shutdown(SignalSource::Manual);
    let outcome = common::expect_exit(&mut exits, Duration::from_secs(60)).await;
    assert_eq!(outcome, ExitOutcome::TimedOut);
    assert!(start.elapsed() >= ms(1_000));
    assert!(start.elapsed() < ms(10_000));
}

#[tokio::test(start_paused = true)]
async fn test_configured_default_timeout() {
    let (coordinator, mut exits) = common::test_coordinator_with(CoordinatorSettings {
        signals: Vec::new(),
        default_timeout: ms(750),
        ..Default::default()
    });
    coordinator.add_exit_handler(|_| {}, None, None).unwrap();
    assert_eq!(coordinator.get_timeout(), ms(750));

    let start = Instant::now();
    coordinator.emit_shutdown(SignalSource::Manual);
    assert_eq!(
        common::expect_exit(&mut exits, Duration::from_secs(10)).await,
        ExitOutcome::TimedOut
    );
    assert!(start.elapsed() >= ms(750));
}

#[tokio::test(start_paused = true)]
async fn test_drain_and_timeout_race_exits_once() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_async_exit_handler(None, Some(ms(500)), |_| async {
            sleep(ms(500)).await;
        })
        .unwrap();

    coordinator.emit_shutdown(SignalSource::Manual);
    common::expect_exit(&mut exits, Duration::from_secs(10)).await;

    sleep(Duration::from_secs(5)).await;
    assert!(exits.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reset_restores_fresh_state() {
    let (coordinator, mut exits) = common::test_coordinator();
    coordinator
        .add_exit_handler(|_| {}, Some("a"), Some(ms(322)))
        .unwrap();
    coordinator.set_max_timeout(Some(ms(1231)));
    assert_eq!(coordinator.get_timeout(), ms(322));
    assert!(coordinator.signal_listener_count() > 0);

    coordinator.reset();
    coordinator.reset();
    assert_eq!(coordinator.signal_listener_count(), 0);
    assert_eq!(coordinator.get_timeout(), DEFAULT_TIMEOUT);
    assert_eq!(coordinator.pending_handlers(), 0);
    assert!(!coordinator.is_exiting());

    // A fresh cycle behaves as if nothing happened before
    coordinator
        .add_exit_handler(|completion| completion.done(), Some("b"), None)
        .unwrap();
    assert_eq!(coordinator.signal_listener_count(), 1);
    coordinator.emit_shutdown(SignalSource::Manual);
    assert_eq!(exits.try_recv(), Ok(ExitOutcome::Drained));
}

#[tokio::test(start_paused = true)]
async fn test_reset_cancels_timer_and_ignores_stale_completions() {
    let (coordinator, mut exits) = common::test_coordinator();
    let held: Arc<Mutex<Option<Completion>>> = Arc::new(Mutex::new(None));
    let slot = held.clone();
    coordinator
        .add_exit_handler(
            move |completion| *slot.lock().unwrap() = Some(completion),
            Some("held"),
            Some(ms(1_000)),
        )
        .unwrap();

    coordinator.emit_shutdown(SignalSource::Manual);
    sleep(ms(500)).await;
    coordinator.reset();

    sleep(Duration::from_secs(5)).await;
    assert!(exits.try_recv().is_err(), "stale timer must not fire");

    let completion = held.lock().unwrap().take().unwrap();
    completion.done();
    assert!(exits.try_recv().is_err(), "stale completion must not exit");
}

#[tokio::test(start_paused = true)]
async fn test_removed_handler_is_not_notified() {
    let (coordinator, mut exits) = common::test_coordinator();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let id = coordinator
        .add_exit_handler(move |_| flag.store(true, Ordering::SeqCst), Some("removed"), None)
        .unwrap();
    assert!(coordinator.remove_exit_handler(id));

    coordinator.emit_shutdown(SignalSource::Manual);
    assert_eq!(exits.try_recv(), Ok(ExitOutcome::Drained));
    assert!(!ran.load(Ordering::SeqCst));
}
