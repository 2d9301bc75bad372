//! Engine configuration.

use serde::{Deserialize, Serialize};

use aspen_types::NotificationKind;

/// Tunables for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often realtime agents are re-evaluated, in minutes.
    pub realtime_interval_minutes: i64,

    /// Tolerance window around a scheduled time of day, in minutes.
    pub schedule_tolerance_minutes: i64,

    /// Minimum spacing between runs of a scheduled agent, in minutes.
    /// Prevents double-firing inside one tolerance window.
    pub min_rerun_minutes: i64,

    /// Observation window for condition evaluation, in days.
    pub observation_window_days: i64,

    /// Lookback window for change-condition references, in days.
    pub historical_window_days: i64,

    /// Deadline for one observation fetch, in seconds.
    pub observation_timeout_secs: u64,

    /// How many entities of one agent evaluate concurrently.
    pub entity_concurrency: usize,

    /// Whole-agent consecutive failures before the agent is flipped to
    /// error status.
    pub agent_error_threshold: u32,

    /// Where to send a notification when a circuit breaker trips.
    /// `None` disables trip notifications.
    pub trip_notification: Option<TripNotificationConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            realtime_interval_minutes: 15,
            schedule_tolerance_minutes: 5,
            min_rerun_minutes: 10,
            observation_window_days: 7,
            historical_window_days: 30,
            observation_timeout_secs: 30,
            entity_concurrency: 8,
            agent_error_threshold: 3,
            trip_notification: None,
        }
    }
}

/// Recipients for circuit-breaker trip notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripNotificationConfig {
    pub kind: NotificationKind,
    pub recipients: Vec<String>,
}
