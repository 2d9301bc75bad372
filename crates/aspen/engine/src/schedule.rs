//! Due-selection for agents.
//!
//! Realtime agents run on the engine's cadence. Scheduled agents run when
//! the local time of day (fixed UTC offset) falls within a tolerance
//! window around the configured time, subject to day-of-week/day-of-month
//! constraints and a minimum re-run guard so one window fires once.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tracing::warn;

use aspen_types::{Agent, AgentStatus, Schedule, ScheduleTime};

use crate::config::EngineConfig;

/// Whether an agent is due for evaluation at `now`.
pub fn is_due(agent: &Agent, now: DateTime<Utc>, config: &EngineConfig) -> bool {
    if agent.status != AgentStatus::Active {
        return false;
    }
    if let Err(e) = agent.schedule.validate() {
        // A broken schedule never becomes due; it is logged, not fatal.
        warn!(agent_id = %agent.id, error = %e, "invalid schedule; agent skipped");
        return false;
    }

    match &agent.schedule {
        Schedule::Realtime => match agent.last_evaluated_at {
            None => true,
            Some(last) => now - last >= Duration::minutes(config.realtime_interval_minutes),
        },
        Schedule::Daily {
            time,
            utc_offset_minutes,
        } => scheduled_due(agent, now, config, *time, *utc_offset_minutes, DayRule::Any),
        Schedule::Weekly {
            day_of_week,
            time,
            utc_offset_minutes,
        } => scheduled_due(
            agent,
            now,
            config,
            *time,
            *utc_offset_minutes,
            DayRule::Weekday(*day_of_week),
        ),
        Schedule::Monthly {
            day_of_month,
            time,
            utc_offset_minutes,
        } => scheduled_due(
            agent,
            now,
            config,
            *time,
            *utc_offset_minutes,
            DayRule::MonthDay(*day_of_month),
        ),
    }
}

enum DayRule {
    Any,
    /// 0 = Monday ... 6 = Sunday.
    Weekday(u8),
    MonthDay(u8),
}

fn scheduled_due(
    agent: &Agent,
    now: DateTime<Utc>,
    config: &EngineConfig,
    time: ScheduleTime,
    utc_offset_minutes: i32,
    day_rule: DayRule,
) -> bool {
    // One tolerance window must fire at most once.
    if let Some(last) = agent.last_evaluated_at {
        if now - last < Duration::minutes(config.min_rerun_minutes) {
            return false;
        }
    }

    let local = now + Duration::minutes(i64::from(utc_offset_minutes));

    match day_rule {
        DayRule::Any => {}
        DayRule::Weekday(day) => {
            if local.weekday().num_days_from_monday() != u32::from(day) {
                return false;
            }
        }
        DayRule::MonthDay(day) => {
            if local.day() != u32::from(day) {
                return false;
            }
        }
    }

    let local_minutes = local.hour() as i64 * 60 + local.minute() as i64;
    let scheduled_minutes = i64::from(time.minutes_of_day());

    // Distance on the 24h clock, so a window straddling midnight matches.
    let diff = (local_minutes - scheduled_minutes).abs();
    let diff = diff.min(24 * 60 - diff);
    diff <= config.schedule_tolerance_minutes
}

#[cfg(test)]
mod tests {
    use super::*;
    use aspen_types::{
        ComparisonOp, Condition, EntityLevel, Provider, Scope, WorkspaceId,
    };
    use chrono::TimeZone;

    fn agent(schedule: Schedule) -> Agent {
        let mut agent = Agent::new(
            WorkspaceId::generate(),
            "scheduled",
            Condition::Threshold {
                metric: "spend".into(),
                operator: ComparisonOp::Gt,
                value: 1.0,
            },
            Scope::All {
                provider: Provider::Meta,
                level: EntityLevel::Campaign,
            },
        );
        agent.schedule = schedule;
        agent
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        // 2025-06-02 is a Monday.
        Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_realtime_cadence() {
        let config = EngineConfig::default();
        let mut agent = agent(Schedule::Realtime);

        assert!(is_due(&agent, at(10, 0), &config));

        agent.last_evaluated_at = Some(at(9, 50));
        assert!(!is_due(&agent, at(10, 0), &config));

        agent.last_evaluated_at = Some(at(9, 40));
        assert!(is_due(&agent, at(10, 0), &config));
    }

    #[test]
    fn test_paused_agent_never_due() {
        let config = EngineConfig::default();
        let mut agent = agent(Schedule::Realtime);
        agent.status = AgentStatus::Paused;
        assert!(!is_due(&agent, at(10, 0), &config));
    }

    #[test]
    fn test_daily_within_tolerance() {
        let config = EngineConfig::default();
        let agent = agent(Schedule::Daily {
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        });

        assert!(is_due(&agent, at(9, 3), &config));
        assert!(is_due(&agent, at(8, 56), &config));
        assert!(!is_due(&agent, at(9, 10), &config));
        assert!(!is_due(&agent, at(15, 0), &config));
    }

    #[test]
    fn test_daily_respects_utc_offset() {
        let config = EngineConfig::default();
        // 09:00 at UTC+2 is 07:00 UTC.
        let agent = agent(Schedule::Daily {
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 120,
        });
        assert!(is_due(&agent, at(7, 0), &config));
        assert!(!is_due(&agent, at(9, 0), &config));
    }

    #[test]
    fn test_rerun_guard_blocks_double_fire() {
        let config = EngineConfig::default();
        let mut agent = agent(Schedule::Daily {
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        });

        agent.last_evaluated_at = Some(at(8, 58));
        assert!(!is_due(&agent, at(9, 2), &config));

        // Yesterday's run does not block today's window.
        agent.last_evaluated_at = Some(at(9, 0) - Duration::days(1));
        assert!(is_due(&agent, at(9, 2), &config));
    }

    #[test]
    fn test_weekly_day_constraint() {
        let config = EngineConfig::default();
        // Monday (0) at 09:00.
        let monday_agent = agent(Schedule::Weekly {
            day_of_week: 0,
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        });
        assert!(is_due(&monday_agent, at(9, 0), &config));

        let friday_agent = agent(Schedule::Weekly {
            day_of_week: 4,
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        });
        assert!(!is_due(&friday_agent, at(9, 0), &config));
    }

    #[test]
    fn test_monthly_day_constraint() {
        let config = EngineConfig::default();
        let second = agent(Schedule::Monthly {
            day_of_month: 2,
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        });
        assert!(is_due(&second, at(9, 0), &config));

        let fifteenth = agent(Schedule::Monthly {
            day_of_month: 15,
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        });
        assert!(!is_due(&fifteenth, at(9, 0), &config));
    }

    #[test]
    fn test_midnight_wraparound() {
        let config = EngineConfig::default();
        let agent = agent(Schedule::Daily {
            time: ScheduleTime::new(0, 2),
            utc_offset_minutes: 0,
        });
        // 23:58 the previous day is 4 minutes from 00:02.
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 23, 58, 0).unwrap();
        assert!(is_due(&agent, now, &config));
    }

    #[test]
    fn test_invalid_schedule_never_due() {
        let config = EngineConfig::default();
        let agent = agent(Schedule::Weekly {
            day_of_week: 9,
            time: ScheduleTime::new(9, 0),
            utc_offset_minutes: 0,
        });
        assert!(!is_due(&agent, at(9, 0), &config));
    }
}
