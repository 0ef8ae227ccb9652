//! Shared utilities for integration testing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use graceful_exit::lifecycle::{CoordinatorSettings, ExitOutcome, Exiter, ShutdownCoordinator};

/// Exiter that reports outcomes over a channel instead of exiting.
pub struct ChannelExiter {
    tx: mpsc::UnboundedSender<ExitOutcome>,
}

impl Exiter for ChannelExiter {
    fn exit(&self, outcome: ExitOutcome) {
        let _ = self.tx.send(outcome);
    }
}

/// A coordinator that binds no OS signals but listens for the shutdown
/// message, plus the receiving end of its exits.
pub fn test_coordinator() -> (ShutdownCoordinator, mpsc::UnboundedReceiver<ExitOutcome>) {
    test_coordinator_with(CoordinatorSettings {
        signals: Vec::new(),
        ..Default::default()
    })
}

#[allow(dead_code)]
pub fn test_coordinator_with(
    settings: CoordinatorSettings,
) -> (ShutdownCoordinator, mpsc::UnboundedReceiver<ExitOutcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = ShutdownCoordinator::with_exiter(settings, Arc::new(ChannelExiter { tx }));
    (coordinator, rx)
}

/// Wait for the next exit, failing the test after `limit`.
#[allow(dead_code)]
pub async fn expect_exit(
    rx: &mut mpsc::UnboundedReceiver<ExitOutcome>,
    limit: Duration,
) -> ExitOutcome {
    tokio::time::timeout(limit, rx.recv())
        .await
        .expect("no exit within limit")
        .expect("exit channel closed")
}

/// Let spawned tasks run without advancing much time.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
