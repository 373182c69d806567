//! Circuit Breaker
//!
//! Stops calling a provider that keeps failing.
//!
//! ## States
//! - **Closed**: Normal operation, calls flow through
//! - **Open**: Provider failing, calls rejected without a network round trip
//! - **Half-Open**: Cooldown elapsed, probe calls allowed to test recovery
//!
//! The generation engine drives the breaker explicitly: it asks
//! [`CircuitBreaker::try_acquire`] before creating a provider, then reports
//! the outcome with [`CircuitBreaker::record_success`] or
//! [`CircuitBreaker::record_failure`]. A rejected acquire is treated as a
//! provider fault and triggers failover to the next candidate.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use prompt_guard_orchestrator::enhanced::CircuitBreaker;
//! # #[tokio::main]
//! # async fn main() {
//! let breaker = CircuitBreaker::new(5, 0.5, Duration::from_secs(60));
//!
//! if breaker.try_acquire().await {
//!     // call the provider, then:
//!     breaker.record_success().await;
//! }
//! # }
//! ```

use crate::provider::ProviderKind;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker for one provider.
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitState>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Copy)]
struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    failure_threshold: usize,
    /// Success rate (0.0 - 1.0) over the half-open window needed to close.
    success_threshold: f64,
    /// How long to stay open before probing.
    cooldown: Duration,
    /// Window size for the success rate.
    window_size: usize,
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    failures: usize,
    successes: usize,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    /// Recent results (true = success, false = failure)
    recent_results: Vec<bool>,
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Calls flow through normally.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// Probe calls are allowed through to test recovery.
    HalfOpen,
}

impl CircuitBreaker {
    /// Create a breaker.
    ///
    /// # Arguments
    /// * `failure_threshold` - Consecutive failures before opening
    /// * `success_threshold` - Success rate (0.0-1.0) needed to close again
    /// * `cooldown` - Time spent open before the first probe
    pub fn new(failure_threshold: usize, success_threshold: f64, cooldown: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitState {
                status: CircuitStatus::Closed,
                failures: 0,
                successes: 0,
                last_failure_time: None,
                last_state_change: Instant::now(),
                recent_results: Vec::new(),
            })),
            config: CircuitBreakerConfig {
                failure_threshold: failure_threshold.max(1),
                success_threshold: success_threshold.clamp(0.0, 1.0),
                cooldown,
                window_size: 20,
            },
        }
    }

    /// Whether a call may proceed. Moves Open to HalfOpen once the cooldown
    /// has elapsed.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.write().await;
        match state.status {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => true,
            CircuitStatus::Open => {
                let cooled = state
                    .last_failure_time
                    .map_or(true, |t| t.elapsed() >= self.config.cooldown);
                if cooled {
                    // Success rate is measured only over post-recovery calls.
                    state.status = CircuitStatus::HalfOpen;
                    state.recent_results.clear();
                    state.last_state_change = Instant::now();
                    info!("circuit breaker: transitioning to half-open");
                    true
                } else {
                    debug!("circuit breaker: request rejected (open)");
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;

        state.successes += 1;
        state.recent_results.push(true);
        if state.recent_results.len() > self.config.window_size {
            state.recent_results.remove(0);
        }

        match state.status {
            CircuitStatus::HalfOpen => {
                let success_rate = success_rate(&state);
                if success_rate >= self.config.success_threshold {
                    state.status = CircuitStatus::Closed;
                    state.failures = 0;
                    state.last_state_change = Instant::now();
                    info!(
                        success_rate = success_rate,
                        "circuit breaker: closing (provider recovered)"
                    );
                }
            }
            CircuitStatus::Closed => state.failures = 0,
            CircuitStatus::Open => {}
        }
    }

    /// Record a failed call.
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;

        state.failures += 1;
        state.last_failure_time = Some(Instant::now());
        state.recent_results.push(false);
        if state.recent_results.len() > self.config.window_size {
            state.recent_results.remove(0);
        }

        match state.status {
            CircuitStatus::Closed if state.failures >= self.config.failure_threshold => {
                state.status = CircuitStatus::Open;
                state.last_state_change = Instant::now();
                warn!(
                    failures = state.failures,
                    threshold = self.config.failure_threshold,
                    "circuit breaker: opening (threshold exceeded)"
                );
            }
            CircuitStatus::HalfOpen => {
                state.status = CircuitStatus::Open;
                state.last_state_change = Instant::now();
                warn!("circuit breaker: reopening (half-open probe failed)");
            }
            _ => {}
        }
    }

    /// Current status.
    pub async fn status(&self) -> CircuitStatus {
        self.state.read().await.status
    }

    /// Statistics snapshot.
    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.read().await;
        CircuitBreakerStats {
            status: state.status,
            failures: state.failures,
            successes: state.successes,
            success_rate: success_rate(&state),
            secs_in_current_state: state.last_state_change.elapsed().as_secs(),
        }
    }

    /// Manually reset to closed.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.status = CircuitStatus::Closed;
        state.failures = 0;
        state.successes = 0;
        state.recent_results.clear();
        state.last_state_change = Instant::now();
        info!("circuit breaker: manually reset to closed");
    }

    /// Force the breaker open (maintenance, tests).
    pub async fn trip(&self) {
        let mut state = self.state.write().await;
        state.status = CircuitStatus::Open;
        state.last_failure_time = Some(Instant::now());
        state.last_state_change = Instant::now();
        warn!("circuit breaker: manually tripped to open");
    }
}

fn success_rate(state: &CircuitState) -> f64 {
    if state.recent_results.is_empty() {
        return 0.0;
    }
    let successes = state.recent_results.iter().filter(|&&x| x).count();
    successes as f64 / state.recent_results.len() as f64
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    /// Current state.
    pub status: CircuitStatus,
    /// Consecutive failures (reset by a success while closed).
    pub failures: usize,
    /// Total successes since the last reset.
    pub successes: usize,
    /// Fraction of recent calls that succeeded (0.0 – 1.0).
    pub success_rate: f64,
    /// Whole seconds spent in the current state.
    pub secs_in_current_state: u64,
}

/// One breaker per provider, created on first use.
pub struct ProviderBreakers {
    breakers: DashMap<ProviderKind, CircuitBreaker>,
    failure_threshold: usize,
    success_threshold: f64,
    cooldown: Duration,
}

impl ProviderBreakers {
    /// All breakers share the same thresholds.
    pub fn new(failure_threshold: usize, success_threshold: f64, cooldown: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            success_threshold,
            cooldown,
        }
    }

    /// Breaker for `kind`.
    pub fn get(&self, kind: ProviderKind) -> CircuitBreaker {
        self.breakers
            .entry(kind)
            .or_insert_with(|| {
                CircuitBreaker::new(self.failure_threshold, self.success_threshold, self.cooldown)
            })
            .clone()
    }

    /// Status of every breaker that has been used.
    pub async fn snapshot(&self) -> Vec<(ProviderKind, CircuitStatus)> {
        let breakers: Vec<(ProviderKind, CircuitBreaker)> = self
            .breakers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut out = Vec::with_capacity(breakers.len());
        for (kind, breaker) in breakers {
            out.push((kind, breaker.status().await));
        }
        out.sort_by_key(|(kind, _)| *kind);
        out
    }
}

impl Default for ProviderBreakers {
    fn default() -> Self {
        Self::new(5, 0.5, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_opens_on_failures() {
        let breaker = CircuitBreaker::new(3, 0.8, Duration::from_secs(5));
        for _ in 0..3 {
            assert!(breaker.try_acquire().await);
            breaker.record_failure().await;
        }
        assert_eq!(breaker.status().await, CircuitStatus::Open);
        assert!(!breaker.try_acquire().await);
    }

    #[tokio::test]
    async fn test_circuit_closes_on_recovery() {
        let breaker = CircuitBreaker::new(2, 0.8, Duration::from_millis(50));
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.status().await, CircuitStatus::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(breaker.try_acquire().await);
        assert_eq!(breaker.status().await, CircuitStatus::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.status().await, CircuitStatus::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, 0.8, Duration::from_millis(20));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.try_acquire().await);
        breaker.record_failure().await;
        assert_eq!(breaker.status().await, CircuitStatus::Open);
        assert!(!breaker.try_acquire().await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(3, 0.8, Duration::from_secs(60));
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        let stats = breaker.stats().await;
        assert_eq!(stats.status, CircuitStatus::Closed);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.successes, 1);
    }

    #[tokio::test]
    async fn test_manual_trip_and_reset() {
        let breaker = CircuitBreaker::new(2, 0.8, Duration::from_secs(60));
        breaker.trip().await;
        assert!(!breaker.try_acquire().await);
        breaker.reset().await;
        assert!(breaker.try_acquire().await);
    }

    #[tokio::test]
    async fn test_provider_breakers_are_independent() {
        let breakers = ProviderBreakers::new(1, 0.5, Duration::from_secs(60));
        breakers.get(ProviderKind::OpenAi).record_failure().await;
        assert!(!breakers.get(ProviderKind::OpenAi).try_acquire().await);
        assert!(breakers.get(ProviderKind::Anthropic).try_acquire().await);
        let snapshot = breakers.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&(ProviderKind::OpenAi, CircuitStatus::Open)));
    }
}
