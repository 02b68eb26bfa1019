//! Client-side sliding-window rate limiting.
//!
//! Tracks attempt timestamps per key (e.g. `login:<email>`) and answers
//! whether another attempt is allowed right now. Pruning is lazy: stale
//! timestamps are dropped whenever a key is queried, so repeated queries
//! converge without a background sweep.
//!
//! Keys are never evicted wholesale - acceptable for a client that lives
//! as long as the page, not for a server-side port.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

/// Limit configuration: at most `max_attempts` within the trailing
/// `window_ms` milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_ms: i64,
}

/// In-memory attempt tracker. Construct one per session and share it by
/// reference; there is no module-level instance.
#[derive(Debug, Default)]
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Vec<i64>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `key` has exhausted its attempts for the current
    /// window. Prunes expired timestamps for the key as a side effect.
    pub fn is_rate_limited(&self, key: &str, config: RateLimitConfig) -> bool {
        self.is_rate_limited_at(key, config, Self::now_ms())
    }

    /// Record an attempt for `key` at the current instant. Does not itself
    /// enforce the limit - callers check `is_rate_limited` first.
    pub fn record_attempt(&self, key: &str) {
        self.record_attempt_at(key, Self::now_ms());
    }

    /// Attempts still available for `key` within the current window.
    pub fn remaining_attempts(&self, key: &str, config: RateLimitConfig) -> u32 {
        self.remaining_attempts_at(key, config, Self::now_ms())
    }

    /// Drop all history for `key` (e.g. after a successful login).
    pub fn reset(&self, key: &str) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(key);
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn is_rate_limited_at(&self, key: &str, config: RateLimitConfig, now_ms: i64) -> bool {
        self.recent_count(key, config, now_ms) >= config.max_attempts
    }

    fn record_attempt_at(&self, key: &str, now_ms: i64) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.entry(key.to_string()).or_default().push(now_ms);
    }

    fn remaining_attempts_at(&self, key: &str, config: RateLimitConfig, now_ms: i64) -> u32 {
        let recent = self.recent_count(key, config, now_ms);
        config.max_attempts.saturating_sub(recent)
    }

    /// Count attempts inside the window, persisting the pruned list back so
    /// the key's state never grows past one window of entries.
    fn recent_count(&self, key: &str, config: RateLimitConfig, now_ms: i64) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        match attempts.get_mut(key) {
            Some(timestamps) => {
                timestamps.retain(|&t| now_ms - t < config.window_ms);
                timestamps.len() as u32
            }
            None => 0,
        }
    }
}
