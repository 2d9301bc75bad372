//! Guard configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the safety guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Daily action caps.
    pub rate_limits: RateLimitConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Independent daily caps on executed actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum executed actions per entity per day.
    pub max_actions_per_entity_per_day: u64,

    /// Maximum executed actions per agent per day.
    pub max_actions_per_agent_per_day: u64,

    /// Maximum executed actions per workspace per day.
    pub max_actions_per_workspace_per_day: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_actions_per_entity_per_day: 3,
            max_actions_per_agent_per_day: 20,
            max_actions_per_workspace_per_day: 100,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Per-entity consecutive evaluation errors that trip the breaker.
    pub consecutive_error_threshold: u32,

    /// Trailing window for budget-increase accounting, in days.
    pub budget_window_days: i64,

    /// Absolute cap on summed budget increases within the window, in
    /// currency units. `None` disables the check.
    pub budget_increase_cap: Option<f64>,

    /// Optional post-action performance regression check. Off by default.
    pub roas_regression: Option<RoasRegressionConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_error_threshold: 5,
            budget_window_days: 7,
            budget_increase_cap: None,
            roas_regression: None,
        }
    }
}

/// Trip the breaker when ROAS drops this far after a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoasRegressionConfig {
    /// Percent drop relative to the at-trigger baseline.
    pub drop_percent: f64,

    /// How many recent evaluations to inspect.
    pub check_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.rate_limits.max_actions_per_entity_per_day, 3);
        assert_eq!(config.rate_limits.max_actions_per_agent_per_day, 20);
        assert_eq!(config.rate_limits.max_actions_per_workspace_per_day, 100);
        assert_eq!(config.circuit_breaker.consecutive_error_threshold, 5);
        assert_eq!(config.circuit_breaker.budget_window_days, 7);
        assert!(config.circuit_breaker.budget_increase_cap.is_none());
        assert!(config.circuit_breaker.roas_regression.is_none());
    }
}
