use std::time::{Duration, Instant};

use dashmap::DashMap;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_THRESHOLD: usize = 10;

/// Sliding-window rate limiter keyed by caller identity.
///
/// Entries older than the window are pruned lazily on each `admit`; per-key
/// state lives for the process lifetime.
pub struct RateLimiter {
    window: Duration,
    threshold: usize,
    hits: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            hits: DashMap::new(),
        }
    }

    /// True when the caller is under the threshold; records the hit.
    pub fn admit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.hits.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() < self.threshold {
            entry.push(now);
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }
}
