//! # Stage: Admission Control
//!
//! ## Responsibility
//! Decide whether an unauthenticated (demo) request may proceed, based on
//! a global daily spend budget, a per-session request window and a
//! per-origin request window. Accumulate the estimated spend of demo
//! generations.
//!
//! ## Guarantees
//! - Checks run in a fixed order: budget, session, origin. The first
//!   failing check determines the denial reason.
//! - A successful check charges both the session and the origin counter.
//!   A request denied at the origin step is not charged to the session.
//! - Counter updates are atomic per key.
//! - Spend is tracked in whole micro-dollars and never goes negative.
//! - Daily spend resets lazily on the first access after UTC midnight.
//!
//! ## NOT Responsible For
//! - Authenticated usage (callers bypass admission entirely)
//! - Estimating the cost of a generation (see [`crate::routing::CostTracker`])

use crate::enhanced::SlidingWindowLimiter;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MICROS_PER_USD: f64 = 1_000_000.0;

// ── Clock ──────────────────────────────────────────────────────────────────

/// Source of wall-clock time for admission windows and day rollover.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced [`Clock`] for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ── Decision types ─────────────────────────────────────────────────────────

/// Why a demo request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdmissionDenial {
    /// The global daily spend budget has been used up.
    #[error("the demo budget for today has been exhausted, try again tomorrow")]
    BudgetExhausted,
    /// This session has used all of its requests for the current window.
    #[error("session request limit reached, retry in {retry_after_secs}s")]
    SessionLimit {
        /// Seconds until a slot frees up.
        #[serde(rename = "retryAfterSecs")]
        retry_after_secs: u64,
    },
    /// This client origin has used all of its requests for the current window.
    #[error("origin request limit reached, retry in {retry_after_secs}s")]
    OriginLimit {
        /// Seconds until a slot frees up.
        #[serde(rename = "retryAfterSecs")]
        retry_after_secs: u64,
    },
}

impl AdmissionDenial {
    /// Stable label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionDenial::BudgetExhausted => "budget",
            AdmissionDenial::SessionLimit { .. } => "session",
            AdmissionDenial::OriginLimit { .. } => "origin",
        }
    }
}

/// Result of [`DemoBudgetTracker::can_send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left for this caller after this decision.
    pub remaining: usize,
    /// Populated only when `allowed` is `false`.
    pub reason: Option<AdmissionDenial>,
}

/// Snapshot of a caller's demo allowance, served to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoStatus {
    /// Requests left for this session/origin pair.
    pub remaining: usize,
    /// Requests already used by this session in the window.
    pub used: usize,
    /// Whether the global daily budget has run out.
    pub budget_exhausted: bool,
}

/// Demo allowance parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoLimits {
    /// Requests per session per window.
    pub max_per_session: usize,
    /// Requests per client origin per window.
    pub max_per_origin: usize,
    /// Length of the sliding window.
    pub window: Duration,
    /// Global spend ceiling per UTC day, in US dollars.
    pub daily_budget_usd: f64,
}

impl Default for DemoLimits {
    fn default() -> Self {
        Self {
            max_per_session: 10,
            max_per_origin: 30,
            window: Duration::hours(1),
            daily_budget_usd: 5.0,
        }
    }
}

// ── Tracker ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct DailySpend {
    day: NaiveDate,
    spent_micros: u64,
    admitted: u64,
}

/// Admission controller for unauthenticated demo traffic.
pub struct DemoBudgetTracker {
    limits: DemoLimits,
    sessions: SlidingWindowLimiter,
    origins: SlidingWindowLimiter,
    spend: Mutex<DailySpend>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl DemoBudgetTracker {
    /// Create a tracker using the system clock.
    pub fn new(limits: DemoLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    /// Create a tracker reading time from `clock`.
    pub fn with_clock(limits: DemoLimits, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now().date_naive();
        Self {
            sessions: SlidingWindowLimiter::new(limits.max_per_session, limits.window),
            origins: SlidingWindowLimiter::new(limits.max_per_origin, limits.window),
            spend: Mutex::new(DailySpend {
                day: today,
                spent_micros: 0,
                admitted: 0,
            }),
            limits,
            clock,
            shutdown: CancellationToken::new(),
        }
    }

    /// Configured limits.
    pub fn limits(&self) -> &DemoLimits {
        &self.limits
    }

    /// Decide whether `session_id` from `origin` may send one more request.
    ///
    /// On success both counters are charged.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn can_send(&self, session_id: &str, origin: &str) -> AdmissionDecision {
        let now = self.clock.now();

        if self.budget_exhausted_at(now) {
            debug!(session_id = session_id, "admission denied: budget exhausted");
            return AdmissionDecision {
                allowed: false,
                remaining: 0,
                reason: Some(AdmissionDenial::BudgetExhausted),
            };
        }

        let session = match self.sessions.try_acquire(session_id, now) {
            Ok(info) => info,
            Err(info) => {
                return AdmissionDecision {
                    allowed: false,
                    remaining: 0,
                    reason: Some(AdmissionDenial::SessionLimit {
                        retry_after_secs: info.reset_in_secs,
                    }),
                }
            }
        };

        let origin_info = match self.origins.try_acquire(origin, now) {
            Ok(info) => info,
            Err(info) => {
                self.sessions.release(session_id, now);
                return AdmissionDecision {
                    allowed: false,
                    remaining: 0,
                    reason: Some(AdmissionDenial::OriginLimit {
                        retry_after_secs: info.reset_in_secs,
                    }),
                };
            }
        };

        self.spend.lock().admitted += 1;
        AdmissionDecision {
            allowed: true,
            remaining: session.remaining.min(origin_info.remaining),
            reason: None,
        }
    }

    /// Add `amount_usd` to today's spend.
    ///
    /// Negative, NaN and infinite amounts are ignored.
    pub fn record_cost(&self, amount_usd: f64) {
        if !amount_usd.is_finite() || amount_usd < 0.0 {
            warn!(amount_usd = amount_usd, "admission: ignoring invalid cost");
            return;
        }
        let micros = (amount_usd * MICROS_PER_USD).round() as u64;
        let now = self.clock.now();
        let mut spend = self.spend.lock();
        roll_over(&mut spend, now);
        spend.spent_micros = spend.spent_micros.saturating_add(micros);
        debug!(
            spent_micros = spend.spent_micros,
            added_micros = micros,
            "admission: cost recorded"
        );
    }

    /// Total spend recorded since the last UTC midnight, in US dollars.
    pub fn get_spent_today(&self) -> f64 {
        let now = self.clock.now();
        let mut spend = self.spend.lock();
        roll_over(&mut spend, now);
        spend.spent_micros as f64 / MICROS_PER_USD
    }

    /// Requests admitted since the last UTC midnight.
    pub fn admitted_today(&self) -> u64 {
        let now = self.clock.now();
        let mut spend = self.spend.lock();
        roll_over(&mut spend, now);
        spend.admitted
    }

    /// Read-only view of the caller's allowance. Charges nothing.
    pub fn status(&self, session_id: &str, origin: &str) -> DemoStatus {
        let now = self.clock.now();
        let session = self.sessions.usage(session_id, now);
        let origin_info = self.origins.usage(origin, now);
        DemoStatus {
            remaining: session.remaining.min(origin_info.remaining),
            used: session.used,
            budget_exhausted: self.budget_exhausted_at(now),
        }
    }

    /// Evict session and origin keys with no activity inside the window.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        self.sessions.sweep(now) + self.origins.sweep(now)
    }

    /// Spawn a background task that calls [`Self::sweep_expired`] every
    /// `interval` until [`Self::dispose`] is called.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = tracker.sweep_expired();
                        if removed > 0 {
                            debug!(removed = removed, "admission: swept idle keys");
                        }
                    }
                }
            }
            info!("admission sweeper stopped");
        })
    }

    /// Stop the background sweeper. Safe to call any number of times.
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`Self::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn budget_exhausted_at(&self, now: DateTime<Utc>) -> bool {
        let mut spend = self.spend.lock();
        roll_over(&mut spend, now);
        let budget_micros = (self.limits.daily_budget_usd.max(0.0) * MICROS_PER_USD).round() as u64;
        spend.spent_micros >= budget_micros
    }
}

fn roll_over(spend: &mut DailySpend, now: DateTime<Utc>) {
    let today = now.date_naive();
    if today != spend.day {
        info!(
            previous_day = %spend.day,
            spent_micros = spend.spent_micros,
            "admission: UTC day rollover, resetting daily spend"
        );
        spend.day = today;
        spend.spent_micros = 0;
        spend.admitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock_at(h: u32, m: u32) -> Arc<ManualClock> {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 1, h, m, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Arc::new(ManualClock::new(start))
    }

    fn limits(session: usize, origin: usize, budget: f64) -> DemoLimits {
        DemoLimits {
            max_per_session: session,
            max_per_origin: origin,
            window: Duration::minutes(10),
            daily_budget_usd: budget,
        }
    }

    #[test]
    fn test_session_window_counts_down_then_recovers() {
        let clock = clock_at(9, 0);
        let tracker = DemoBudgetTracker::with_clock(limits(3, 100, 5.0), clock.clone());

        let remaining: Vec<usize> = (0..3)
            .map(|_| tracker.can_send("s1", "1.2.3.4").remaining)
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let fourth = tracker.can_send("s1", "1.2.3.4");
        assert!(!fourth.allowed);
        assert!(matches!(
            fourth.reason,
            Some(AdmissionDenial::SessionLimit { .. })
        ));

        clock.advance(Duration::minutes(10));
        let again = tracker.can_send("s1", "1.2.3.4");
        assert!(again.allowed);
        assert_eq!(again.remaining, 2);
    }

    #[test]
    fn test_budget_is_checked_before_windows() {
        let clock = clock_at(9, 0);
        let tracker = DemoBudgetTracker::with_clock(limits(1, 1, 0.01), clock);
        let _ = tracker.can_send("s1", "o1");
        tracker.record_cost(0.02);

        // Session and origin are both exhausted too, but budget wins.
        let d = tracker.can_send("s1", "o1");
        assert_eq!(d.reason, Some(AdmissionDenial::BudgetExhausted));
    }

    #[test]
    fn test_origin_limit_does_not_charge_session() {
        let clock = clock_at(9, 0);
        let tracker = DemoBudgetTracker::with_clock(limits(5, 1, 5.0), clock);
        assert!(tracker.can_send("a", "shared-origin").allowed);

        let d = tracker.can_send("b", "shared-origin");
        assert!(matches!(d.reason, Some(AdmissionDenial::OriginLimit { .. })));
        assert_eq!(tracker.status("b", "other").used, 0);
    }

    #[test]
    fn test_record_cost_ignores_negative_and_nan() {
        let tracker = DemoBudgetTracker::with_clock(limits(5, 5, 5.0), clock_at(9, 0));
        tracker.record_cost(0.25);
        tracker.record_cost(-3.0);
        tracker.record_cost(f64::NAN);
        assert!((tracker.get_spent_today() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_utc_midnight_rollover_resets_spend() {
        let clock = clock_at(23, 50);
        let tracker = DemoBudgetTracker::with_clock(limits(5, 5, 1.0), clock.clone());
        tracker.record_cost(1.5);
        assert!(tracker.can_send("s", "o").reason == Some(AdmissionDenial::BudgetExhausted));

        clock.advance(Duration::minutes(15));
        assert_eq!(tracker.get_spent_today(), 0.0);
        assert!(tracker.can_send("s", "o").allowed);
    }

    #[test]
    fn test_status_does_not_charge() {
        let tracker = DemoBudgetTracker::with_clock(limits(3, 10, 5.0), clock_at(9, 0));
        let _ = tracker.can_send("s", "o");
        let before = tracker.status("s", "o");
        let after = tracker.status("s", "o");
        assert_eq!(before, after);
        assert_eq!(before.used, 1);
        assert_eq!(before.remaining, 2);
        assert!(!before.budget_exhausted);
    }

    #[test]
    fn test_sweep_expired_evicts_idle_keys() {
        let clock = clock_at(9, 0);
        let tracker = DemoBudgetTracker::with_clock(limits(3, 10, 5.0), clock.clone());
        let _ = tracker.can_send("s", "o");
        clock.advance(Duration::minutes(11));
        assert_eq!(tracker.sweep_expired(), 2);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_stops_sweeper() {
        let tracker = Arc::new(DemoBudgetTracker::new(DemoLimits::default()));
        let handle = tracker.spawn_sweeper(std::time::Duration::from_millis(10));
        tracker.dispose();
        tracker.dispose();
        assert!(tracker.is_disposed());
        let joined = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(joined.is_ok(), "sweeper must exit after dispose");
    }

    #[test]
    fn test_denial_serializes_with_reason_tag() {
        let json = serde_json::to_value(AdmissionDenial::SessionLimit {
            retry_after_secs: 30,
        })
        .unwrap_or_default();
        assert_eq!(json["reason"], "session_limit");
        assert_eq!(json["retryAfterSecs"], 30);
    }
}
