//! Restart intensity throttle.
//!
//! Tracked as a rolling window of recent samples: a `Mutex<VecDeque<_>>`
//! pruned on each read rather than a dedicated timer task.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// `{maxRestarts, withinMs}` plus the rolling window of timestamps needed
/// to enforce it.
pub struct RestartIntensity {
    max_restarts: u32,
    within: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RestartIntensity {
    pub fn new(max_restarts: u32, within: Duration) -> Self {
        Self {
            max_restarts,
            within,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one more restart and report whether the supervisor has now
    /// exceeded its allowance within the window. Every executed restart
    /// counts once, regardless of which strategy triggered it.
    pub fn record_restart(&self) -> bool {
        let now = Instant::now();
        let mut window = self.timestamps.lock().unwrap_or_else(|p| p.into_inner());
        window.push_back(now);
        while let Some(&front) = window.front() {
            if now.duration_since(front) > self.within {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len() as u32 > self.max_restarts
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    pub fn within(&self) -> Duration {
        self.within
    }

    pub fn reset(&self) {
        self.timestamps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_restarts_up_to_the_limit_within_the_window() {
        let intensity = RestartIntensity::new(2, Duration::from_secs(60));
        assert!(!intensity.record_restart());
        assert!(!intensity.record_restart());
        assert!(intensity.record_restart());
    }

    #[test]
    fn old_restarts_fall_out_of_the_window() {
        let intensity = RestartIntensity::new(1, Duration::from_millis(20));
        assert!(!intensity.record_restart());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!intensity.record_restart());
    }
}
