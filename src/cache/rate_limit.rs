use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Keys tracked before idle ones are swept.
const SWEEP_THRESHOLD: usize = 256;

/// Sliding-window limiter for manual refreshes, keyed by feed URL.
///
/// A key may be acquired at most `limit` times within any `window`. Uses
/// tokio's clock so paused-time tests can step through the window.
#[derive(Debug)]
pub struct RefreshLimiter {
    limit: usize,
    window: Duration,
    attempts: HashMap<String, VecDeque<Instant>>,
}

impl RefreshLimiter {
    /// A `limit` of 0 is treated as 1; manual refresh is never disabled.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            attempts: HashMap::new(),
        }
    }

    /// Records an attempt for `key` if the window allows it.
    ///
    /// # Errors
    ///
    /// Returns how long until the oldest attempt leaves the window.
    pub fn try_acquire(&mut self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        if self.attempts.len() >= SWEEP_THRESHOLD {
            self.sweep(now);
        }

        let window = self.window;
        let attempts = self.attempts.entry(key.to_string()).or_default();
        while attempts
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            attempts.pop_front();
        }

        if attempts.len() >= self.limit {
            let oldest = attempts.front().copied().unwrap_or(now);
            return Err(window.saturating_sub(now.duration_since(oldest)));
        }

        attempts.push_back(now);
        Ok(())
    }

    /// Attempts still available for `key` in the current window.
    pub fn remaining(&self, key: &str) -> usize {
        let now = Instant::now();
        let used = self.attempts.get(key).map_or(0, |attempts| {
            attempts
                .iter()
                .filter(|&&t| now.duration_since(t) < self.window)
                .count()
        });
        self.limit.saturating_sub(used)
    }

    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.attempts.retain(|_, attempts| {
            attempts
                .back()
                .is_some_and(|&t| now.duration_since(t) < window)
        });
    }
}
