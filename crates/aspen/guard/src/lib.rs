//! Safety guards for the ASPEN engine.
//!
//! The rate limiter is consulted before any action dispatch; the circuit
//! breaker runs after actions and pauses agents that are failing repeatedly
//! or spending past their caps. Blocked actions are ordinary outcomes with
//! a reason, never errors, and a tripped breaker never retries.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, TripReason};
pub use config::{CircuitBreakerConfig, GuardConfig, RateLimitConfig, RoasRegressionConfig};
pub use error::{GuardError, GuardResult};
pub use rate_limiter::{RateDecision, RateLimiter};
