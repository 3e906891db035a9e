//! Fixed-window rate limiting for login-code requests.
//!
//! Entries are kept for the life of the process; windows expire implicitly by
//! timestamp rather than by eviction, so the map only grows. Acceptable for
//! the current traffic volume, revisit if the key space becomes unbounded.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Five code requests per identity+address within one minute.
pub const LOGIN_CODE_MAX_ATTEMPTS: u32 = 5;
pub const LOGIN_CODE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counter keyed by an identity string.
#[derive(Debug, Default)]
pub struct FixedWindowLimiter {
    entries: Mutex<HashMap<String, WindowRecord>>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine a user identity (email or phone) with the caller's network
    /// address so one address cannot burn another identity's budget.
    pub fn rate_key(identity: &str, client_addr: &str) -> String {
        format!("{identity}:{client_addr}")
    }

    pub fn allow(&self, key: &str, max_attempts: u32, window: Duration) -> bool {
        self.allow_at(key, max_attempts, window, Instant::now())
    }

    fn allow_at(&self, key: &str, max_attempts: u32, window: Duration, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("rate limit mutex poisoned");

        match entries.get_mut(key) {
            Some(record) if now <= record.reset_at => {
                if record.count >= max_attempts {
                    return false;
                }
                record.count += 1;
                true
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    WindowRecord {
                        count: 1,
                        reset_at: now + window,
                    },
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_attempt_within_window_is_denied() {
        let limiter = FixedWindowLimiter::new();
        let start = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            assert!(limiter.allow_at("a@example.com:1.2.3.4", 5, window, start));
        }
        assert!(!limiter.allow_at("a@example.com:1.2.3.4", 5, window, start));
        // Denials do not consume budget: still denied, not wrapped around.
        assert!(!limiter.allow_at("a@example.com:1.2.3.4", 5, window, start));
    }

    #[test]
    fn window_expiry_resets_the_counter() {
        let limiter = FixedWindowLimiter::new();
        let start = Instant::now();
        let window = Duration::from_millis(100);

        for _ in 0..5 {
            assert!(limiter.allow_at("k", 5, window, start));
        }
        assert!(!limiter.allow_at("k", 5, window, start));

        let later = start + Duration::from_millis(150);
        assert!(limiter.allow_at("k", 5, window, later));
        // Fresh window: four more fit before the cap.
        for _ in 0..4 {
            assert!(limiter.allow_at("k", 5, window, later));
        }
        assert!(!limiter.allow_at("k", 5, window, later));
    }

    #[test]
    fn distinct_keys_have_independent_budgets() {
        let limiter = FixedWindowLimiter::new();
        let start = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            assert!(limiter.allow_at("a@example.com:1.1.1.1", 5, window, start));
        }
        assert!(!limiter.allow_at("a@example.com:1.1.1.1", 5, window, start));
        assert!(limiter.allow_at("a@example.com:2.2.2.2", 5, window, start));
    }

    #[test]
    fn rate_key_combines_identity_and_address() {
        assert_eq!(
            FixedWindowLimiter::rate_key("+15551234567", "10.0.0.1"),
            "+15551234567:10.0.0.1"
        );
    }
}
