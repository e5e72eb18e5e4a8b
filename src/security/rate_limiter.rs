//! Login attempt limiting.
//!
//! Sliding window of failed attempts per key (normalized email):
//! - up to `max_attempts` failures within `window` are tolerated
//! - the failure that reaches the limit starts a cooldown of one `window`
//! - while cooling down every attempt is rejected without checking credentials
//! - a successful login clears the key
//!
//! ## Storage
//! Per-key state is a JSON map under `login_attempts` in the local area, so
//! the limit holds across processes. An unreadable map is discarded.

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::storage::{keys, read_json, write_json, Storage};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default: 5 failed logins.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default window and cooldown: 15 minutes.
pub const DEFAULT_WINDOW_SECS: u64 = 15 * 60;

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the attempt may proceed.
    pub allowed: bool,
    /// Failures left before the cooldown starts (0 if blocked).
    pub remaining: u32,
    /// Seconds until the cooldown expires (0 if not in cooldown).
    pub retry_after_secs: u64,
    /// Human-readable message for the user.
    pub message: Option<String>,
}

/// Per-key tracking state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyState {
    /// Unix millis of recent failures (within window).
    #[serde(default)]
    failures: Vec<i64>,
    /// When the current cooldown expires.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    locked_until: Option<DateTime<Utc>>,
    /// Last activity (for stale cleanup).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_active: DateTime<Utc>,
}

type States = BTreeMap<String, KeyState>;

/// Failed-login limiter.
pub struct LoginRateLimiter {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    window: Duration,
    enabled: bool,
}

impl LoginRateLimiter {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        enabled: bool,
        max_attempts: u32,
        window: Duration,
    ) -> Self {
        Self {
            storage,
            clock,
            max_attempts: max_attempts.max(1),
            window,
            enabled,
        }
    }

    /// Check whether an attempt for `key` may proceed. Does not record a failure.
    pub fn check(&self, key: &str) -> Result<RateLimitResult> {
        if !self.enabled {
            return Ok(self.allowed(self.max_attempts));
        }

        let now = self.clock.now();
        let mut states = self.load()?;
        let Some(state) = states.get_mut(key) else {
            return Ok(self.allowed(self.max_attempts));
        };

        if let Some(until) = state.locked_until {
            if now < until {
                return Ok(Self::blocked(until - now));
            }
            // Cooldown over
            state.locked_until = None;
            state.failures.clear();
            self.save(&states)?;
            return Ok(self.allowed(self.max_attempts));
        }

        let used = self.recent_failures(state, now);
        Ok(self.allowed(self.max_attempts.saturating_sub(used)))
    }

    /// Record a failed attempt and return the resulting state.
    pub fn record_failure(&self, key: &str) -> Result<RateLimitResult> {
        if !self.enabled {
            return Ok(self.allowed(self.max_attempts));
        }

        let now = self.clock.now();
        let mut states = self.load()?;
        let state = states.entry(key.to_string()).or_insert(KeyState {
            failures: Vec::new(),
            locked_until: None,
            last_active: now,
        });
        state.last_active = now;

        if let Some(until) = state.locked_until {
            if now < until {
                let wait = until - now;
                self.save(&states)?;
                return Ok(Self::blocked(wait));
            }
            state.locked_until = None;
            state.failures.clear();
        }

        self.prune(state, now);
        state.failures.push(now.timestamp_millis());

        let used = u32::try_from(state.failures.len()).unwrap_or(u32::MAX);
        let result = if used >= self.max_attempts {
            let until = now + self.window;
            state.locked_until = Some(until);
            tracing::warn!(
                key = key,
                attempts = used,
                "Login attempts exceeded; cooling down for {}s",
                self.window.num_seconds()
            );
            Self::blocked(until - now)
        } else {
            self.allowed(self.max_attempts - used)
        };
        self.save(&states)?;
        Ok(result)
    }

    /// Clear state after a successful login.
    pub fn record_success(&self, key: &str) -> Result<()> {
        self.reset(key)
    }

    /// Forget a key's failures and cooldown.
    pub fn reset(&self, key: &str) -> Result<()> {
        let mut states = self.load()?;
        if states.remove(key).is_some() {
            self.save(&states)?;
        }
        Ok(())
    }

    /// Drop keys idle for more than two windows and not cooling down.
    /// Returns the number of keys removed.
    pub fn cleanup_stale(&self) -> Result<usize> {
        let now = self.clock.now();
        let cutoff = now - self.window - self.window;
        let mut states = self.load()?;
        let before = states.len();
        states.retain(|_, state| {
            state.locked_until.is_some_and(|until| until > now) || state.last_active >= cutoff
        });
        let removed = before - states.len();
        if removed > 0 {
            self.save(&states)?;
        }
        Ok(removed)
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    fn load(&self) -> Result<States> {
        match read_json::<States>(self.storage.as_ref(), keys::LOGIN_ATTEMPTS) {
            Ok(states) => Ok(states.unwrap_or_default()),
            Err(AuthError::Serde(e)) => {
                tracing::warn!("Discarding unreadable login attempt state: {e}");
                Ok(States::new())
            }
            Err(e) => Err(e),
        }
    }

    fn save(&self, states: &States) -> Result<()> {
        if states.is_empty() {
            self.storage.remove(keys::LOGIN_ATTEMPTS)?;
            return Ok(());
        }
        write_json(self.storage.as_ref(), keys::LOGIN_ATTEMPTS, states)
    }

    fn prune(&self, state: &mut KeyState, now: DateTime<Utc>) {
        let window_start = (now - self.window).timestamp_millis();
        state.failures.retain(|&ts| ts > window_start);
    }

    fn recent_failures(&self, state: &KeyState, now: DateTime<Utc>) -> u32 {
        let window_start = (now - self.window).timestamp_millis();
        let count = state.failures.iter().filter(|&&ts| ts > window_start).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn allowed(&self, remaining: u32) -> RateLimitResult {
        RateLimitResult {
            allowed: true,
            remaining,
            retry_after_secs: 0,
            message: None,
        }
    }

    fn blocked(wait: Duration) -> RateLimitResult {
        // Round up so callers never see "0 seconds" while still blocked
        let millis = wait.num_milliseconds().max(0);
        let secs = u64::try_from((millis + 999) / 1000).unwrap_or(0);
        RateLimitResult {
            allowed: false,
            remaining: 0,
            retry_after_secs: secs,
            message: Some(format!(
                "Too many failed login attempts. Please wait {secs} seconds."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;

    fn limiter(max: u32, window_secs: i64) -> (Arc<ManualClock>, LoginRateLimiter) {
        let clock = Arc::new(ManualClock::starting_now());
        let storage = Arc::new(MemoryStorage::new("local"));
        let limiter = LoginRateLimiter::new(
            storage,
            clock.clone(),
            true,
            max,
            Duration::seconds(window_secs),
        );
        (clock, limiter)
    }

    #[test]
    fn allows_within_limit() {
        let (_clock, limiter) = limiter(5, 60);
        for _ in 0..4 {
            let r = limiter.record_failure("a@learntav.com").unwrap();
            assert!(r.allowed);
        }
        assert!(limiter.check("a@learntav.com").unwrap().allowed);
        assert_eq!(limiter.check("a@learntav.com").unwrap().remaining, 1);
    }

    #[test]
    fn blocks_at_limit() {
        let (_clock, limiter) = limiter(3, 60);
        limiter.record_failure("a@learntav.com").unwrap();
        limiter.record_failure("a@learntav.com").unwrap();
        let r = limiter.record_failure("a@learntav.com").unwrap();
        assert!(!r.allowed);
        assert_eq!(r.retry_after_secs, 60);

        let r = limiter.check("a@learntav.com").unwrap();
        assert!(!r.allowed);
        assert!(r.message.unwrap().contains("60 seconds"));
    }

    #[test]
    fn cooldown_expires() {
        let (clock, limiter) = limiter(2, 60);
        limiter.record_failure("k").unwrap();
        limiter.record_failure("k").unwrap();
        assert!(!limiter.check("k").unwrap().allowed);

        clock.advance(Duration::seconds(30));
        let r = limiter.check("k").unwrap();
        assert!(!r.allowed);
        assert_eq!(r.retry_after_secs, 30);

        clock.advance(Duration::seconds(30));
        let r = limiter.check("k").unwrap();
        assert!(r.allowed);
        assert_eq!(r.remaining, 2);
    }

    #[test]
    fn old_failures_slide_out_of_window() {
        let (clock, limiter) = limiter(3, 60);
        limiter.record_failure("k").unwrap();
        limiter.record_failure("k").unwrap();
        clock.advance(Duration::seconds(61));

        let r = limiter.record_failure("k").unwrap();
        assert!(r.allowed);
        assert_eq!(r.remaining, 2);
    }

    #[test]
    fn success_clears_failures() {
        let (_clock, limiter) = limiter(3, 60);
        limiter.record_failure("k").unwrap();
        limiter.record_failure("k").unwrap();
        limiter.record_success("k").unwrap();
        assert_eq!(limiter.check("k").unwrap().remaining, 3);
        assert_eq!(limiter.tracked_keys().unwrap(), 0);
    }

    #[test]
    fn disabled_limiter_allows_all() {
        let clock = Arc::new(ManualClock::starting_now());
        let storage = Arc::new(MemoryStorage::new("local"));
        let limiter = LoginRateLimiter::new(storage.clone(), clock, false, 1, Duration::seconds(60));
        for _ in 0..100 {
            assert!(limiter.record_failure("k").unwrap().allowed);
        }
        assert!(storage.is_empty());
    }

    #[test]
    fn separate_keys_tracked_independently() {
        let (_clock, limiter) = limiter(2, 60);
        limiter.record_failure("a").unwrap();
        limiter.record_failure("a").unwrap();
        assert!(!limiter.check("a").unwrap().allowed);
        assert!(limiter.check("b").unwrap().allowed);
    }

    #[test]
    fn reset_clears_cooldown() {
        let (_clock, limiter) = limiter(1, 60);
        limiter.record_failure("k").unwrap();
        assert!(!limiter.check("k").unwrap().allowed);
        limiter.reset("k").unwrap();
        assert!(limiter.check("k").unwrap().allowed);
    }

    #[test]
    fn cleanup_removes_stale() {
        let (clock, limiter) = limiter(5, 60);
        limiter.record_failure("idle").unwrap();
        clock.advance(Duration::seconds(100));
        limiter.record_failure("recent").unwrap();
        assert_eq!(limiter.tracked_keys().unwrap(), 2);

        clock.advance(Duration::seconds(30));
        assert_eq!(limiter.cleanup_stale().unwrap(), 1);
        assert_eq!(limiter.tracked_keys().unwrap(), 1);
        assert_eq!(limiter.check("idle").unwrap().remaining, 5);
    }

    #[test]
    fn cooldown_survives_a_new_limiter() {
        let clock = Arc::new(ManualClock::starting_now());
        let storage = Arc::new(MemoryStorage::new("local"));
        let first = LoginRateLimiter::new(storage.clone(), clock.clone(), true, 2, Duration::seconds(60));
        first.record_failure("k").unwrap();
        first.record_failure("k").unwrap();

        let second = LoginRateLimiter::new(storage.clone(), clock, true, 2, Duration::seconds(60));
        let r = second.check("k").unwrap();
        assert!(!r.allowed);
        assert_eq!(r.retry_after_secs, 60);

        let raw = storage.get(keys::LOGIN_ATTEMPTS).unwrap().unwrap();
        assert!(raw.contains("\"lockedUntil\""));
    }

    #[test]
    fn unreadable_state_is_discarded() {
        let (_clock, limiter) = limiter(2, 60);
        limiter.storage.set(keys::LOGIN_ATTEMPTS, "{broken").unwrap();
        assert!(limiter.check("k").unwrap().allowed);
        assert!(limiter.record_failure("k").unwrap().allowed);
        assert_eq!(limiter.tracked_keys().unwrap(), 1);
    }
}
