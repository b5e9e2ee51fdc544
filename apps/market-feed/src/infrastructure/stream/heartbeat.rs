//! Heartbeat Manager
//!
//! Pings the feed on a fixed interval and watches for inbound traffic.
//! Any inbound frame or pong counts as a sign of life; if none arrives
//! within the timeout after a ping, the session is treated as a transport
//! failure. Inbound pings are answered by the session loop directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence after a ping before the session is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame.
    SendPing,
    /// No inbound traffic within the timeout; restart the session.
    Timeout,
}

/// State shared between the heartbeat manager and the session loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
    waiting_for_pong: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            waiting_for_pong: AtomicBool::new(false),
        }
    }

    /// Record inbound traffic (any frame, including pongs).
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping was sent.
    pub fn mark_ping_sent(&self) {
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Heartbeat manager for one session.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes or a timeout fires.
    ///
    /// A zero ping interval cannot be scheduled; the manager stops at once,
    /// which the session treats as a lost transport.
    pub async fn run(self) {
        if self.config.ping_interval.is_zero() {
            tracing::error!("Heartbeat ping interval is zero; heartbeat not started");
            return;
        }

        let start = Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check_and_ping().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `false` when the loop should exit.
    async fn check_and_ping(&self) -> bool {
        if self.state.is_waiting_for_pong() {
            let elapsed = self.state.time_since_activity();
            if elapsed > self.config.pong_timeout {
                tracing::warn!(
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    timeout_ms = u64::try_from(self.config.pong_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Heartbeat timeout detected"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return false;
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.pong_timeout, Duration::from_secs(30));
    }

    #[test]
    fn activity_clears_outstanding_ping() {
        let state = HeartbeatState::new();
        state.mark_ping_sent();
        assert!(state.is_waiting_for_pong());

        state.record_activity();
        assert!(!state.is_waiting_for_pong());
    }

    #[tokio::test(start_paused = true)]
    async fn manager_pings_every_interval() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(30));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(HeartbeatManager::new(config, state, event_tx, cancel.clone()).run());

        let start = Instant::now();
        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
        let first = start.elapsed();
        assert!(first >= Duration::from_secs(10) && first < Duration::from_secs(11));
        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
        let second = start.elapsed();
        assert!(second >= Duration::from_secs(20) && second < Duration::from_secs(21));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manager_times_out_without_activity() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(15));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::clone(&state), event_tx, cancel).run(),
        );

        // t=10: ping; t=20: 20s of silence with a ping outstanding
        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
        state.mark_ping_sent();
        assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::Timeout));

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_keeps_session_alive() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(15));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::clone(&state), event_tx, cancel.clone()).run(),
        );

        for _ in 0..5 {
            assert_eq!(event_rx.recv().await, Some(HeartbeatEvent::SendPing));
            state.mark_ping_sent();
            state.record_activity();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_interval_stops_without_events() {
        let config = HeartbeatConfig::new(Duration::ZERO, Duration::from_secs(30));
        let (event_tx, mut event_rx) = mpsc::channel(10);

        HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, CancellationToken::new())
            .run()
            .await;

        assert_eq!(event_rx.recv().await, None);
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(10));
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone())
                .run(),
        );
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
