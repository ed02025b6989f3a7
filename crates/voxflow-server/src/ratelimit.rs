//! Per-client request limiting
//!
//! A sliding-window counter keyed by client address. State is per-process;
//! a multi-worker deployment would need to share it externally.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window rate limiter.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// A limiter allowing `max_requests` per rolling minute.
    #[must_use]
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key`; returns false when the caller is over
    /// the limit.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = hits.entry(key.to_string()).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.window {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.max_requests {
            return false;
        }
        window.push_back(now);
        true
    }
}
