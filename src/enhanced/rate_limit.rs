//! Sliding-window rate limiting
//!
//! Per-key request log limiter. Each key keeps the timestamps of its
//! admitted requests; a request is admitted while fewer than `max_requests`
//! timestamps fall inside the trailing window.
//!
//! Callers pass `now` explicitly so that the owning component controls the
//! clock (see [`crate::admission::Clock`]).
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use prompt_guard_orchestrator::enhanced::SlidingWindowLimiter;
//!
//! let limiter = SlidingWindowLimiter::new(2, Duration::seconds(60));
//! let now = Utc::now();
//! assert!(limiter.try_acquire("session-1", now).is_ok());
//! assert!(limiter.try_acquire("session-1", now).is_ok());
//! assert!(limiter.try_acquire("session-1", now).is_err());
//! ```

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Sliding-window limiter keyed by an arbitrary string (session, origin, …).
pub struct SlidingWindowLimiter {
    log: DashMap<String, VecDeque<DateTime<Utc>>>,
    max_requests: usize,
    window: Duration,
}

/// Usage snapshot for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests admitted within the current window.
    pub used: usize,
    /// Requests still available within the current window.
    pub remaining: usize,
    /// Seconds until the oldest admitted request leaves the window.
    pub reset_in_secs: u64,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_requests` per trailing `window`.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            log: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Configured request ceiling per window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Admit one request for `key` at `now`.
    ///
    /// The check and the increment happen under the key's entry lock, so
    /// concurrent callers for the same key never overshoot the ceiling.
    ///
    /// # Errors
    ///
    /// Returns the current [`RateLimitInfo`] when the key is at its limit.
    pub fn try_acquire(&self, key: &str, now: DateTime<Utc>) -> Result<RateLimitInfo, RateLimitInfo> {
        let mut entry = self.log.entry(key.to_string()).or_default();
        prune(&mut entry, now, self.window);

        if entry.len() >= self.max_requests {
            let info = self.info_for(&entry, now);
            warn!(
                key = key,
                used = info.used,
                limit = self.max_requests,
                "rate limit exceeded"
            );
            return Err(info);
        }

        entry.push_back(now);
        let info = self.info_for(&entry, now);
        debug!(
            key = key,
            used = info.used,
            limit = self.max_requests,
            "rate limit check passed"
        );
        Ok(info)
    }

    /// Undo the admission recorded for `key` at `admitted_at`.
    ///
    /// Used when a later check in the same admission decision rejects the
    /// request, so the earlier counter does not charge for it. Only the
    /// caller's own timestamp is removed; slots taken concurrently by other
    /// requests for the same key stay charged. Returns whether a slot was
    /// refunded.
    pub fn release(&self, key: &str, admitted_at: DateTime<Utc>) -> bool {
        let Some(mut entry) = self.log.get_mut(key) else {
            return false;
        };
        match entry.iter().rposition(|t| *t == admitted_at) {
            Some(i) => entry.remove(i).is_some(),
            None => false,
        }
    }

    /// Current usage for `key` without admitting anything.
    pub fn usage(&self, key: &str, now: DateTime<Utc>) -> RateLimitInfo {
        match self.log.get_mut(key) {
            Some(mut entry) => {
                prune(&mut entry, now, self.window);
                self.info_for(&entry, now)
            }
            None => RateLimitInfo {
                used: 0,
                remaining: self.max_requests,
                reset_in_secs: 0,
            },
        }
    }

    /// Drop keys with no timestamps left inside the window.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.log.len();
        self.log.retain(|_, entries| {
            prune(entries, now, self.window);
            !entries.is_empty()
        });
        before.saturating_sub(self.log.len())
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.log.len()
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) {
        self.log.remove(key);
        debug!(key = key, "rate limit reset");
    }

    fn info_for(&self, entries: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> RateLimitInfo {
        let reset_in_secs = entries
            .front()
            .map(|oldest| (*oldest + self.window - now).num_seconds().max(0) as u64)
            .unwrap_or(0);
        RateLimitInfo {
            used: entries.len(),
            remaining: self.max_requests.saturating_sub(entries.len()),
            reset_in_secs,
        }
    }
}

fn prune(entries: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    while let Some(oldest) = entries.front() {
        if *oldest + window <= now {
            entries.pop_front();
        } else {
            break;
        }
    }
}
