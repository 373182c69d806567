//! Resilience primitives
//!
//! Sliding-window rate limiting for admission control, per-provider circuit
//! breakers, and the bounded candidate retry cursor used by the generation
//! engine.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

// Re-exports
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitStatus, ProviderBreakers};
pub use rate_limit::{RateLimitInfo, SlidingWindowLimiter};
pub use retry::{CandidateRetry, FailureClass, RetryDecision};
