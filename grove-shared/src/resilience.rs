//! Reconnect backoff and connection health tracking.
//!
//! `Backoff` implements an exponential-backoff-with-jitter reconnect policy.
//! `ConnectionHealth` wraps it in a closed/open/half-open state machine,
//! giving the cluster transport and the Observer a single, uniform notion
//! of "is this peer reachable" instead of a bare boolean.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Exponential backoff with ±20% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            attempt: 0,
        }
    }

    /// Delay for the next reconnect attempt, with jitter applied, and bumps
    /// the internal attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let unjittered = self.unjittered_delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        jitter(unjittered)
    }

    fn unjittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let scale = self.multiplier.powi(attempt as i32);
        let millis = (self.initial.as_millis() as f64 * scale).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

fn jitter(d: Duration) -> Duration {
    let factor = 0.8 + rand::random::<f64>() * 0.4; // ±20%
    Duration::from_millis((d.as_millis() as f64 * factor) as u64)
}

/// The three states of a peer connection's health, tracked the way a
/// circuit breaker tracks a downstream dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Connected and passing heartbeats.
    Closed,
    /// Disconnected; fast-failing remote operations while backoff elapses.
    Open,
    /// Backoff has elapsed, a single reconnect attempt is in flight.
    HalfOpen,
}

/// Connection health for one peer node: an atomic state machine plus a
/// metrics snapshot, safe to share behind an `Arc` across the transport's
/// reader and writer tasks.
#[derive(Debug)]
pub struct ConnectionHealth {
    state: parking_lot_state::AtomicState,
    consecutive_failures: AtomicU32,
    last_transition_ms: AtomicU64,
    started_at: Instant,
}

// A tiny private shim so we don't need an extra dependency just for an
// atomic enum; three states fit in a u8.
mod parking_lot_state {
    use std::sync::atomic::{AtomicU8, Ordering};

    use super::ConnectionState;

    #[derive(Debug)]
    pub struct AtomicState(AtomicU8);

    impl AtomicState {
        pub fn new(initial: ConnectionState) -> Self {
            Self(AtomicU8::new(encode(initial)))
        }

        pub fn load(&self) -> ConnectionState {
            decode(self.0.load(Ordering::Acquire))
        }

        pub fn store(&self, state: ConnectionState) {
            self.0.store(encode(state), Ordering::Release);
        }
    }

    fn encode(state: ConnectionState) -> u8 {
        match state {
            ConnectionState::Closed => 0,
            ConnectionState::Open => 1,
            ConnectionState::HalfOpen => 2,
        }
    }

    fn decode(byte: u8) -> ConnectionState {
        match byte {
            0 => ConnectionState::Closed,
            1 => ConnectionState::Open,
            _ => ConnectionState::HalfOpen,
        }
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            state: parking_lot_state::AtomicState::new(ConnectionState::Closed),
            consecutive_failures: AtomicU32::new(0),
            last_transition_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn mark_connected(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.transition(ConnectionState::Closed);
    }

    pub fn mark_reconnecting(&self) {
        self.transition(ConnectionState::HalfOpen);
    }

    pub fn mark_disconnected(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.transition(ConnectionState::Open);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self.state(), ConnectionState::Closed)
    }

    fn transition(&self, to: ConnectionState) {
        if self.state.load() != to {
            self.state.store(to);
            self.last_transition_ms
                .store(self.started_at.elapsed().as_millis() as u64, Ordering::Relaxed);
        }
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max_with_jitter_bounds() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000), 2.0);
        let d0 = backoff.next_delay();
        assert!(d0.as_millis() >= 80 && d0.as_millis() <= 120);
        let d1 = backoff.next_delay();
        assert!(d1.as_millis() >= 160 && d1.as_millis() <= 240);
        for _ in 0..10 {
            let d = backoff.next_delay();
            assert!(d.as_millis() <= 1200); // max + jitter headroom
        }
    }

    #[test]
    fn backoff_reset_restarts_from_initial() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000), 2.0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn connection_health_transitions() {
        let health = ConnectionHealth::new();
        assert_eq!(health.state(), ConnectionState::Closed);
        assert!(health.is_reachable());

        health.mark_disconnected();
        assert_eq!(health.state(), ConnectionState::Open);
        assert!(!health.is_reachable());
        assert_eq!(health.consecutive_failures(), 1);

        health.mark_reconnecting();
        assert_eq!(health.state(), ConnectionState::HalfOpen);

        health.mark_connected();
        assert_eq!(health.state(), ConnectionState::Closed);
        assert_eq!(health.consecutive_failures(), 0);
    }
}
