//! The agent model
//!
//! An agent pairs a condition tree with accumulation semantics, a trigger
//! policy, an entity scope, a schedule, and an ordered list of actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::Condition;
use crate::error::ValidationError;
use crate::ids::{AgentId, EntityId, WorkspaceId};
use crate::provider::{BudgetKind, EntityLevel, Provider};

/// Maximum length of the stored error message on an agent.
const ERROR_MESSAGE_MAX: usize = 500;

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent is evaluated on its schedule.
    Active,

    /// Agent is suspended; no evaluation happens.
    Paused,

    /// Agent was stopped by repeated failures or a tripped guard.
    /// Requires manual resume.
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Paused => write!(f, "paused"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// A supervision agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub status: AgentStatus,

    /// Condition tree evaluated against observations.
    pub condition: Condition,

    /// When set, the condition is bypassed and every due evaluation
    /// triggers. Used for scheduled periodic reports.
    #[serde(default)]
    pub skip_condition: bool,

    pub accumulation: AccumulationConfig,
    pub trigger: TriggerConfig,

    /// Actions executed in order on trigger.
    pub actions: Vec<ActionConfig>,

    pub scope: Scope,

    /// Evaluate the summed scope as one unit instead of per entity.
    #[serde(default)]
    pub aggregate: bool,

    pub schedule: Schedule,

    /// Consecutive whole-agent evaluation failures.
    #[serde(default)]
    pub consecutive_error_count: u32,

    /// Most recent whole-agent failure, truncated.
    #[serde(default)]
    pub error_message: Option<String>,

    /// Total number of triggers fired across all entities.
    #[serde(default)]
    pub trigger_count: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Create an active agent with default accumulation and trigger
    /// settings, a realtime schedule, and no actions.
    pub fn new(
        workspace_id: WorkspaceId,
        name: impl Into<String>,
        condition: Condition,
        scope: Scope,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::generate(),
            workspace_id,
            name: name.into(),
            status: AgentStatus::Active,
            condition,
            skip_condition: false,
            accumulation: AccumulationConfig::default(),
            trigger: TriggerConfig::default(),
            actions: Vec::new(),
            scope,
            aggregate: false,
            schedule: Schedule::Realtime,
            consecutive_error_count: 0,
            error_message: None,
            trigger_count: 0,
            created_at: now,
            updated_at: now,
            last_evaluated_at: None,
            last_triggered_at: None,
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.condition.validate()?;
        self.accumulation.validate()?;
        self.trigger.validate()?;
        self.schedule.validate()?;
        self.scope.validate()?;
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }

    /// Record a whole-agent evaluation failure. The stored message is
    /// truncated so repository rows stay bounded.
    pub fn record_failure(&mut self, message: &str, now: DateTime<Utc>) {
        self.consecutive_error_count += 1;
        let mut msg = message.to_string();
        msg.truncate(ERROR_MESSAGE_MAX);
        self.error_message = Some(msg);
        self.updated_at = now;
    }

    /// Clear failure bookkeeping after a successful evaluation.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_error_count = 0;
        self.error_message = None;
        self.last_evaluated_at = Some(now);
        self.updated_at = now;
    }

    /// Record that at least one entity triggered during a cycle.
    pub fn record_trigger(&mut self, now: DateTime<Utc>) {
        self.trigger_count += 1;
        self.last_triggered_at = Some(now);
        self.updated_at = now;
    }
}

/// How many condition hits are required, and how they are counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulationConfig {
    /// Number of counted hits required before a trigger.
    pub required_count: u32,

    /// What one "hit" is.
    pub unit: CountUnit,

    /// Whether hits must be consecutive or merely recent.
    pub mode: AccumulationMode,

    /// Lookback window for `within_window` mode, in minutes.
    pub window_minutes: Option<i64>,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            required_count: 1,
            unit: CountUnit::Evaluations,
            mode: AccumulationMode::Consecutive,
            window_minutes: None,
        }
    }
}

impl AccumulationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.required_count == 0 {
            return Err(ValidationError::Accumulation(
                "required_count must be at least 1".into(),
            ));
        }
        match self.mode {
            AccumulationMode::WithinWindow => match self.window_minutes {
                Some(minutes) if minutes > 0 => Ok(()),
                _ => Err(ValidationError::Accumulation(
                    "within_window mode requires a positive window_minutes".into(),
                )),
            },
            AccumulationMode::Consecutive => Ok(()),
        }
    }

    /// The pruning window as a chrono duration, if configured.
    pub fn window(&self) -> Option<chrono::Duration> {
        self.window_minutes.map(chrono::Duration::minutes)
    }
}

/// What counts as one accumulation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountUnit {
    /// Every evaluation with the condition met counts.
    Evaluations,

    /// Only the first met evaluation within each distinct hour counts.
    Hours,

    /// Only the first met evaluation within each distinct day counts.
    Days,
}

/// Whether required hits must be consecutive or within a lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationMode {
    Consecutive,
    WithinWindow,
}

/// Repeatability policy for triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub mode: TriggerMode,

    /// Cooldown after a trigger, in minutes.
    pub cooldown_minutes: Option<i64>,

    /// Minimum spacing between continuous-mode firings, in minutes.
    pub continuous_interval_minutes: Option<i64>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: TriggerMode::Once,
            cooldown_minutes: None,
            continuous_interval_minutes: None,
        }
    }
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(minutes) = self.cooldown_minutes {
            if minutes <= 0 {
                return Err(ValidationError::Trigger(
                    "cooldown_minutes must be positive".into(),
                ));
            }
        }
        if self.mode == TriggerMode::Cooldown && self.cooldown_minutes.is_none() {
            return Err(ValidationError::Trigger(
                "cooldown mode requires cooldown_minutes".into(),
            ));
        }
        if self.mode == TriggerMode::Continuous {
            match self.continuous_interval_minutes {
                Some(minutes) if minutes > 0 => {}
                _ => {
                    return Err(ValidationError::Trigger(
                        "continuous mode requires a positive continuous_interval_minutes".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Option<chrono::Duration> {
        self.cooldown_minutes.map(chrono::Duration::minutes)
    }

    pub fn continuous_interval(&self) -> Option<chrono::Duration> {
        self.continuous_interval_minutes.map(chrono::Duration::minutes)
    }
}

/// Trigger repeatability modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Fire, then return to watching (or cool down if configured).
    Once,

    /// Fire, then enforce the configured cooldown.
    Cooldown,

    /// Stay triggered and re-fire at the configured interval while the
    /// condition holds.
    Continuous,
}

/// Which entities an agent supervises. Always re-resolved live so newly
/// created entities are picked up automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    /// An explicit set of entity IDs.
    Entities { ids: Vec<EntityId> },

    /// Entities matching filter criteria.
    Filter {
        provider: Option<Provider>,
        level: Option<EntityLevel>,
        name_contains: Option<String>,
    },

    /// All entities for a provider at a level.
    All {
        provider: Provider,
        level: EntityLevel,
    },
}

impl Scope {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Scope::Entities { ids } if ids.is_empty() => {
                Err(ValidationError::Scope("explicit scope has no entity ids".into()))
            }
            Scope::Filter {
                provider: None,
                level: None,
                name_contains: None,
            } => Err(ValidationError::Scope(
                "filter scope has no criteria; use an `all` scope instead".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Time-of-day for scheduled agents, serialized as "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    pub hour: u8,
    pub minute: u8,
}

impl ScheduleTime {
    pub fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    /// Minutes since local midnight.
    pub fn minutes_of_day(&self) -> i32 {
        i32::from(self.hour) * 60 + i32::from(self.minute)
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ScheduleTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScheduleTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (h, m) = raw
            .split_once(':')
            .ok_or_else(|| serde::de::Error::custom("expected HH:MM"))?;
        let hour: u8 = h.parse().map_err(serde::de::Error::custom)?;
        let minute: u8 = m.parse().map_err(serde::de::Error::custom)?;
        if hour > 23 || minute > 59 {
            return Err(serde::de::Error::custom("time out of range"));
        }
        Ok(Self { hour, minute })
    }
}

/// When an agent is due for evaluation.
///
/// Non-realtime schedules carry a fixed UTC offset in minutes; the engine
/// applies a small tolerance window when matching the time of day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Evaluated every engine cycle.
    Realtime,

    Daily {
        time: ScheduleTime,
        #[serde(default)]
        utc_offset_minutes: i32,
    },

    Weekly {
        /// 0 = Monday ... 6 = Sunday.
        day_of_week: u8,
        time: ScheduleTime,
        #[serde(default)]
        utc_offset_minutes: i32,
    },

    Monthly {
        day_of_month: u8,
        time: ScheduleTime,
        #[serde(default)]
        utc_offset_minutes: i32,
    },
}

impl Schedule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let offset = match self {
            Schedule::Realtime => return Ok(()),
            Schedule::Daily {
                utc_offset_minutes, ..
            } => *utc_offset_minutes,
            Schedule::Weekly {
                day_of_week,
                utc_offset_minutes,
                ..
            } => {
                if *day_of_week > 6 {
                    return Err(ValidationError::Schedule(format!(
                        "day_of_week {} out of range 0-6",
                        day_of_week
                    )));
                }
                *utc_offset_minutes
            }
            Schedule::Monthly {
                day_of_month,
                utc_offset_minutes,
                ..
            } => {
                if !(1..=31).contains(day_of_month) {
                    return Err(ValidationError::Schedule(format!(
                        "day_of_month {} out of range 1-31",
                        day_of_month
                    )));
                }
                *utc_offset_minutes
            }
        };
        if offset.abs() > 14 * 60 {
            return Err(ValidationError::Schedule(format!(
                "utc_offset_minutes {} exceeds +/-14h",
                offset
            )));
        }
        Ok(())
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self, Schedule::Realtime)
    }
}

/// Notification channel kinds. Rendering happens outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Email,
    Slack,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Email => write!(f, "email"),
            NotificationKind::Slack => write!(f, "slack"),
        }
    }
}

/// One configured action, executed in order on trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    /// Send a notification through a configured channel.
    Notify {
        kind: NotificationKind,
        recipients: Vec<String>,
        /// Optional message template with {{variable}} placeholders.
        message: Option<String>,
    },

    /// POST a JSON payload to an external URL.
    Webhook {
        url: String,
        /// Optional payload template; string values get {{variable}}
        /// substitution.
        payload: Option<serde_json::Value>,
    },

    /// Scale the entity budget by a percentage, clamped and rounded to the
    /// platform's native unit.
    ScaleBudget {
        percent: f64,
        min_budget: Option<f64>,
        max_budget: Option<f64>,
        budget_kind: BudgetKind,
    },

    /// Pause the entity on the platform.
    Pause,

    /// Resume the entity on the platform.
    Resume,
}

impl ActionConfig {
    /// Whether the action mutates platform state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ActionConfig::ScaleBudget { .. } | ActionConfig::Pause | ActionConfig::Resume
        )
    }

    /// Stable name used in records and log fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ActionConfig::Notify { .. } => "notify",
            ActionConfig::Webhook { .. } => "webhook",
            ActionConfig::ScaleBudget { .. } => "scale_budget",
            ActionConfig::Pause => "pause",
            ActionConfig::Resume => "resume",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ActionConfig::Notify { recipients, .. } => {
                if recipients.is_empty() {
                    return Err(ValidationError::Action("notify has no recipients".into()));
                }
                Ok(())
            }
            ActionConfig::Webhook { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ValidationError::Action(format!(
                        "webhook url must be http(s): {}",
                        url
                    )));
                }
                Ok(())
            }
            ActionConfig::ScaleBudget {
                percent,
                min_budget,
                max_budget,
                ..
            } => {
                if !percent.is_finite() || *percent <= -100.0 {
                    return Err(ValidationError::Action(format!(
                        "scale percent {} must be finite and above -100",
                        percent
                    )));
                }
                if let (Some(min), Some(max)) = (min_budget, max_budget) {
                    if min > max {
                        return Err(ValidationError::Action(
                            "min_budget exceeds max_budget".into(),
                        ));
                    }
                }
                Ok(())
            }
            ActionConfig::Pause | ActionConfig::Resume => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ComparisonOp;

    fn threshold() -> Condition {
        Condition::Threshold {
            metric: "spend".into(),
            operator: ComparisonOp::Gt,
            value: 100.0,
        }
    }

    fn scope() -> Scope {
        Scope::All {
            provider: Provider::Meta,
            level: EntityLevel::Campaign,
        }
    }

    #[test]
    fn test_new_agent_is_active_realtime() {
        let agent = Agent::new(WorkspaceId::generate(), "overspend watch", threshold(), scope());
        assert_eq!(agent.status, AgentStatus::Active);
        assert!(agent.schedule.is_realtime());
        assert!(agent.validate().is_ok());
    }

    #[test]
    fn test_error_message_truncated() {
        let mut agent = Agent::new(WorkspaceId::generate(), "a", threshold(), scope());
        agent.record_failure(&"x".repeat(2000), Utc::now());
        assert_eq!(agent.error_message.as_ref().unwrap().len(), 500);
        assert_eq!(agent.consecutive_error_count, 1);

        agent.record_success(Utc::now());
        assert_eq!(agent.consecutive_error_count, 0);
        assert!(agent.error_message.is_none());
    }

    #[test]
    fn test_within_window_requires_window() {
        let config = AccumulationConfig {
            required_count: 3,
            unit: CountUnit::Evaluations,
            mode: AccumulationMode::WithinWindow,
            window_minutes: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_continuous_requires_interval() {
        let config = TriggerConfig {
            mode: TriggerMode::Continuous,
            cooldown_minutes: None,
            continuous_interval_minutes: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schedule_time_serde() {
        let time: ScheduleTime = serde_json::from_str("\"09:30\"").unwrap();
        assert_eq!(time, ScheduleTime::new(9, 30));
        assert_eq!(serde_json::to_string(&time).unwrap(), "\"09:30\"");

        let bad: Result<ScheduleTime, _> = serde_json::from_str("\"25:00\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_schedule_validation() {
        let schedule = Schedule::Weekly {
            day_of_week: 7,
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        };
        assert!(schedule.validate().is_err());

        let schedule = Schedule::Monthly {
            day_of_month: 0,
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_empty_filter_scope_rejected() {
        let scope = Scope::Filter {
            provider: None,
            level: None,
            name_contains: None,
        };
        assert!(scope.validate().is_err());
    }

    #[test]
    fn test_action_validation() {
        assert!(ActionConfig::Webhook {
            url: "ftp://example.com".into(),
            payload: None,
        }
        .validate()
        .is_err());

        assert!(ActionConfig::ScaleBudget {
            percent: -150.0,
            min_budget: None,
            max_budget: None,
            budget_kind: BudgetKind::Daily,
        }
        .validate()
        .is_err());

        assert!(ActionConfig::Pause.is_mutating());
        assert!(!ActionConfig::Notify {
            kind: NotificationKind::Email,
            recipients: vec!["ops@example.com".into()],
            message: None,
        }
        .is_mutating());
    }

    #[test]
    fn test_scope_serde_tag() {
        let scope = Scope::All {
            provider: Provider::Google,
            level: EntityLevel::Campaign,
        };
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["type"], "all");
        assert_eq!(json["provider"], "google");
    }
}
