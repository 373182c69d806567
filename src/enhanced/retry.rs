//! Bounded candidate retry
//!
//! One cursor over an ordered candidate list, shared by provider failover
//! and quality-gated escalation. Each failure is classified by the caller;
//! the cursor decides whether to advance to the next candidate, stop
//! because the budget is spent, or abort outright.
//!
//! Termination is guaranteed: every advance consumes a candidate, so the
//! total number of attempts never exceeds the list length. Quality
//! retries are additionally capped by `max_quality_retries`.
//!
//! ## Usage
//!
//! ```rust
//! use prompt_guard_orchestrator::enhanced::{CandidateRetry, FailureClass, RetryDecision};
//!
//! let mut retry = CandidateRetry::new(vec!["a", "b", "c"], 1);
//! assert_eq!(retry.current(), Some(&"a"));
//! assert!(matches!(retry.on_failure(FailureClass::ProviderFault), RetryDecision::Advance { .. }));
//! assert_eq!(retry.current(), Some(&"b"));
//! ```

use std::time::Duration;
use tracing::{debug, warn};

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout, rejection, outage or open breaker.
    ProviderFault,
    /// The response came back but failed validation.
    QualityFault,
    /// Do not retry (cancellation, protocol error).
    Abort,
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try the candidate at `index` after waiting `delay`.
    Advance {
        /// Index of the new current candidate.
        index: usize,
        /// Pause before the next attempt.
        delay: Duration,
    },
    /// No candidates or quality budget left.
    Exhausted,
    /// The failure is not retryable.
    Abort,
}

/// Cursor over an ordered candidate list with per-class bounds.
#[derive(Debug, Clone)]
pub struct CandidateRetry<T> {
    candidates: Vec<T>,
    index: usize,
    attempts: usize,
    provider_faults: usize,
    quality_retries: usize,
    max_quality_retries: usize,
    backoff: Duration,
}

impl<T> CandidateRetry<T> {
    /// Start at the first candidate.
    pub fn new(candidates: Vec<T>, max_quality_retries: usize) -> Self {
        Self {
            candidates,
            index: 0,
            attempts: 1,
            provider_faults: 0,
            quality_retries: 0,
            max_quality_retries,
            backoff: Duration::ZERO,
        }
    }

    /// Pause between provider-fault attempts. Quality retries never wait.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Candidate for the current attempt.
    pub fn current(&self) -> Option<&T> {
        self.candidates.get(self.index)
    }

    /// Candidate the next advance would move to.
    pub fn peek_next(&self) -> Option<&T> {
        self.candidates.get(self.index + 1)
    }

    /// Index of the current candidate.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Attempts started so far, including the current one.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Provider faults seen so far.
    pub fn provider_faults(&self) -> usize {
        self.provider_faults
    }

    /// Quality retries taken so far.
    pub fn quality_retries(&self) -> usize {
        self.quality_retries
    }

    /// Whether another quality retry is allowed from the current position.
    pub fn can_retry_quality(&self) -> bool {
        self.quality_retries < self.max_quality_retries && self.peek_next().is_some()
    }

    /// Classify the current attempt's failure and move the cursor.
    pub fn on_failure(&mut self, class: FailureClass) -> RetryDecision {
        let delay = match class {
            FailureClass::Abort => {
                debug!(attempt = self.attempts, "retry: aborting");
                return RetryDecision::Abort;
            }
            FailureClass::ProviderFault => {
                self.provider_faults += 1;
                self.backoff
            }
            FailureClass::QualityFault => {
                if !self.can_retry_quality() {
                    debug!(
                        quality_retries = self.quality_retries,
                        max = self.max_quality_retries,
                        "retry: quality budget spent"
                    );
                    return RetryDecision::Exhausted;
                }
                self.quality_retries += 1;
                Duration::ZERO
            }
        };

        if self.peek_next().is_none() {
            warn!(attempts = self.attempts, "retry: all candidates exhausted");
            return RetryDecision::Exhausted;
        }
        self.index += 1;
        self.attempts += 1;
        debug!(
            attempt = self.attempts,
            index = self.index,
            class = ?class,
            "retry: advancing to next candidate"
        );
        RetryDecision::Advance {
            index: self.index,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_faults_walk_the_list_then_exhaust() {
        let mut retry = CandidateRetry::new(vec![1, 2, 3], 0);
        assert_eq!(retry.current(), Some(&1));
        assert_eq!(
            retry.on_failure(FailureClass::ProviderFault),
            RetryDecision::Advance {
                index: 1,
                delay: Duration::ZERO
            }
        );
        assert!(matches!(
            retry.on_failure(FailureClass::ProviderFault),
            RetryDecision::Advance { index: 2, .. }
        ));
        assert_eq!(retry.on_failure(FailureClass::ProviderFault), RetryDecision::Exhausted);
        assert_eq!(retry.attempts(), 3);
        assert_eq!(retry.provider_faults(), 3);
    }

    #[test]
    fn test_quality_retries_are_capped() {
        let mut retry = CandidateRetry::new(vec!["a", "b", "c", "d"], 2);
        assert!(matches!(
            retry.on_failure(FailureClass::QualityFault),
            RetryDecision::Advance { .. }
        ));
        assert!(matches!(
            retry.on_failure(FailureClass::QualityFault),
            RetryDecision::Advance { .. }
        ));
        assert!(!retry.can_retry_quality());
        assert_eq!(retry.on_failure(FailureClass::QualityFault), RetryDecision::Exhausted);
        assert_eq!(retry.current(), Some(&"c"), "exhaustion leaves the cursor in place");
    }

    #[test]
    fn test_quality_retry_needs_a_next_candidate() {
        let mut retry = CandidateRetry::new(vec!["only"], 5);
        assert!(!retry.can_retry_quality());
        assert_eq!(retry.on_failure(FailureClass::QualityFault), RetryDecision::Exhausted);
    }

    #[test]
    fn test_mixed_classes_share_one_bound() {
        let mut retry = CandidateRetry::new(vec![1, 2, 3], 2)
            .with_backoff(Duration::from_millis(25));
        assert_eq!(
            retry.on_failure(FailureClass::ProviderFault),
            RetryDecision::Advance {
                index: 1,
                delay: Duration::from_millis(25)
            }
        );
        assert_eq!(
            retry.on_failure(FailureClass::QualityFault),
            RetryDecision::Advance {
                index: 2,
                delay: Duration::ZERO
            }
        );
        assert_eq!(retry.on_failure(FailureClass::ProviderFault), RetryDecision::Exhausted);
    }

    #[test]
    fn test_abort_does_not_move() {
        let mut retry = CandidateRetry::new(vec![1, 2], 2);
        assert_eq!(retry.on_failure(FailureClass::Abort), RetryDecision::Abort);
        assert_eq!(retry.index(), 0);
    }

    #[test]
    fn test_empty_list_has_no_current() {
        let mut retry: CandidateRetry<u8> = CandidateRetry::new(Vec::new(), 2);
        assert!(retry.current().is_none());
        assert_eq!(retry.on_failure(FailureClass::ProviderFault), RetryDecision::Exhausted);
    }
}
