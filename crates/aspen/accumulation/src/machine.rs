//! The per-pair transition function.
//!
//! States: WATCHING -> ACCUMULATING -> TRIGGERED -> {COOLDOWN | WATCHING};
//! ERROR is absorbing until an external reset. The function is pure and
//! deterministic: identical inputs produce identical outputs.

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::debug;

use aspen_types::{
    AccumulationConfig, AccumulationMode, AccumulationSnapshot, CountUnit, EntityState,
    MachineState, TriggerConfig, TriggerMode,
};

/// Everything the transition function consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionInput {
    pub current_state: MachineState,
    pub condition_met: bool,
    pub accumulation: AccumulationSnapshot,
    pub config: AccumulationConfig,
    pub trigger: TriggerConfig,
    pub now: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub next_eligible_at: Option<DateTime<Utc>>,
}

/// Everything the transition function produces.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutput {
    pub new_state: MachineState,
    pub accumulation: AccumulationSnapshot,
    pub should_trigger: bool,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Run one transition.
pub fn process(input: &TransitionInput) -> TransitionOutput {
    let output = transition(input);
    debug!(
        state_before = %input.current_state,
        state_after = %output.new_state,
        condition_met = input.condition_met,
        count = output.accumulation.count,
        should_trigger = output.should_trigger,
        reason = %output.reason,
        "accumulation transition"
    );
    output
}

fn transition(input: &TransitionInput) -> TransitionOutput {
    // ERROR is absorbing; only an external reset leaves it.
    if input.current_state == MachineState::Error {
        return TransitionOutput {
            new_state: MachineState::Error,
            accumulation: input.accumulation.clone(),
            should_trigger: false,
            next_eligible_at: input.next_eligible_at,
            reason: "machine in error state; manual reset required".into(),
        };
    }

    if input.current_state == MachineState::Cooldown {
        return match input.next_eligible_at {
            Some(next) if input.now >= next => TransitionOutput {
                new_state: MachineState::Watching,
                accumulation: AccumulationSnapshot::reset(),
                should_trigger: false,
                next_eligible_at: None,
                reason: "cooldown expired; watching".into(),
            },
            Some(next) => TransitionOutput {
                new_state: MachineState::Cooldown,
                accumulation: input.accumulation.clone(),
                should_trigger: false,
                next_eligible_at: Some(next),
                reason: format!("in cooldown until {}", next.to_rfc3339()),
            },
            // No eligibility timestamp means the cooldown cannot be honored;
            // fall back to watching rather than wedging the pair.
            None => TransitionOutput {
                new_state: MachineState::Watching,
                accumulation: AccumulationSnapshot::reset(),
                should_trigger: false,
                next_eligible_at: None,
                reason: "cooldown without expiry; reset to watching".into(),
            },
        };
    }

    if input.condition_met {
        met_transition(input)
    } else {
        unmet_transition(input)
    }
}

fn met_transition(input: &TransitionInput) -> TransitionOutput {
    let accumulation = count_hit(&input.accumulation, &input.config, input.now);
    let complete = is_complete(&accumulation, &input.config, input.now);

    if !complete {
        let reason = format!(
            "accumulating {}/{} ({})",
            accumulation.count, input.config.required_count, input.config.mode_label()
        );
        return TransitionOutput {
            new_state: MachineState::Accumulating,
            accumulation,
            should_trigger: false,
            next_eligible_at: None,
            reason,
        };
    }

    match input.trigger.mode {
        TriggerMode::Continuous => {
            let interval = input
                .trigger
                .continuous_interval()
                .unwrap_or_else(|| chrono::Duration::minutes(60));
            let due = match input.last_triggered_at {
                Some(last) => input.now - last >= interval,
                None => true,
            };
            if due {
                TransitionOutput {
                    new_state: MachineState::Triggered,
                    accumulation,
                    should_trigger: true,
                    next_eligible_at: None,
                    reason: "accumulation complete; continuous trigger fired".into(),
                }
            } else {
                TransitionOutput {
                    new_state: MachineState::Triggered,
                    accumulation,
                    should_trigger: false,
                    next_eligible_at: None,
                    reason: "continuous interval not yet elapsed".into(),
                }
            }
        }
        TriggerMode::Once | TriggerMode::Cooldown => match input.trigger.cooldown() {
            Some(cooldown) => {
                let next = input.now + cooldown;
                TransitionOutput {
                    new_state: MachineState::Cooldown,
                    accumulation: AccumulationSnapshot::reset(),
                    should_trigger: true,
                    next_eligible_at: Some(next),
                    reason: format!(
                        "accumulation complete; trigger fired, cooling down until {}",
                        next.to_rfc3339()
                    ),
                }
            }
            None => TransitionOutput {
                new_state: MachineState::Watching,
                accumulation: AccumulationSnapshot::reset(),
                should_trigger: true,
                next_eligible_at: None,
                reason: "accumulation complete; trigger fired".into(),
            },
        },
    }
}

fn unmet_transition(input: &TransitionInput) -> TransitionOutput {
    let accumulation = match input.config.mode {
        // A miss breaks the run entirely.
        AccumulationMode::Consecutive => AccumulationSnapshot::reset(),

        // History survives (pruned) so a later hit can still complete the
        // window.
        AccumulationMode::WithinWindow => {
            let window = input
                .config
                .window()
                .unwrap_or_else(|| chrono::Duration::minutes(60));
            let mut pruned = input.accumulation.clone().pruned(input.now - window);
            pruned.count = pruned.met_history.len() as u32;
            if pruned.met_history.is_empty() {
                pruned.started_at = None;
            }
            pruned
        }
    };

    TransitionOutput {
        new_state: MachineState::Watching,
        accumulation,
        should_trigger: false,
        next_eligible_at: None,
        reason: "condition not met".into(),
    }
}

/// Count one condition hit, deduplicating by the configured unit's bucket.
fn count_hit(
    accumulation: &AccumulationSnapshot,
    config: &AccumulationConfig,
    now: DateTime<Utc>,
) -> AccumulationSnapshot {
    let mut next = accumulation.clone();

    if config.mode == AccumulationMode::WithinWindow {
        let window = config
            .window()
            .unwrap_or_else(|| chrono::Duration::minutes(60));
        next = next.pruned(now - window);
    }

    // History is chronological, so only the newest entry can share the
    // current bucket.
    let duplicate = next
        .met_history
        .last()
        .map(|last| same_bucket(*last, now, config.unit))
        .unwrap_or(false);

    if !duplicate {
        next.met_history.push(now);
        if next.met_history.len() > aspen_types::MET_HISTORY_CAP {
            let excess = next.met_history.len() - aspen_types::MET_HISTORY_CAP;
            next.met_history.drain(..excess);
        }
        if next.started_at.is_none() {
            next.started_at = Some(now);
        }
    }

    next.count = match config.mode {
        AccumulationMode::Consecutive => {
            if duplicate {
                next.count
            } else {
                next.count + 1
            }
        }
        AccumulationMode::WithinWindow => next.met_history.len() as u32,
    };

    next
}

fn is_complete(
    accumulation: &AccumulationSnapshot,
    config: &AccumulationConfig,
    now: DateTime<Utc>,
) -> bool {
    match config.mode {
        AccumulationMode::Consecutive => accumulation.count >= config.required_count,
        AccumulationMode::WithinWindow => {
            let window = config
                .window()
                .unwrap_or_else(|| chrono::Duration::minutes(60));
            let cutoff = now - window;
            let recent = accumulation
                .met_history
                .iter()
                .filter(|t| **t > cutoff)
                .count();
            recent as u32 >= config.required_count
        }
    }
}

fn same_bucket(a: DateTime<Utc>, b: DateTime<Utc>, unit: CountUnit) -> bool {
    match unit {
        CountUnit::Evaluations => false,
        CountUnit::Hours => a.date_naive() == b.date_naive() && a.hour() == b.hour(),
        CountUnit::Days => a.ordinal() == b.ordinal() && a.year() == b.year(),
    }
}

/// Apply a transition output to the persisted pair state.
///
/// This is the only mutation path for accumulation fields.
pub fn apply_transition(state: &mut EntityState, output: &TransitionOutput, now: DateTime<Utc>) {
    state.machine_state = output.new_state;
    state.accumulation = output.accumulation.clone();
    state.next_eligible_at = output.next_eligible_at;
    if output.should_trigger {
        state.last_triggered_at = Some(now);
        state.trigger_count += 1;
    }
    state.updated_at = now;
}

/// Label helper used in transition reasons.
trait ModeLabel {
    fn mode_label(&self) -> &'static str;
}

impl ModeLabel for AccumulationConfig {
    fn mode_label(&self) -> &'static str {
        match self.mode {
            AccumulationMode::Consecutive => "consecutive",
            AccumulationMode::WithinWindow => "within window",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aspen_types::{AgentId, EntityId};
    use chrono::Duration;

    fn config(required: u32, unit: CountUnit, mode: AccumulationMode, window: Option<i64>) -> AccumulationConfig {
        AccumulationConfig {
            required_count: required,
            unit,
            mode,
            window_minutes: window,
        }
    }

    fn once() -> TriggerConfig {
        TriggerConfig::default()
    }

    fn with_cooldown(minutes: i64) -> TriggerConfig {
        TriggerConfig {
            mode: TriggerMode::Cooldown,
            cooldown_minutes: Some(minutes),
            continuous_interval_minutes: None,
        }
    }

    fn input(
        state: MachineState,
        met: bool,
        accumulation: AccumulationSnapshot,
        config: AccumulationConfig,
        trigger: TriggerConfig,
        now: DateTime<Utc>,
    ) -> TransitionInput {
        TransitionInput {
            current_state: state,
            condition_met: met,
            accumulation,
            config,
            trigger,
            now,
            last_triggered_at: None,
            next_eligible_at: None,
        }
    }

    #[test]
    fn test_three_consecutive_hits_trigger_on_third() {
        let cfg = config(3, CountUnit::Evaluations, AccumulationMode::Consecutive, None);
        let mut now = Utc::now();
        let mut accumulation = AccumulationSnapshot::reset();
        let mut state = MachineState::Watching;

        for expected_count in 1..=2u32 {
            let out = process(&input(state, true, accumulation, cfg.clone(), once(), now));
            assert_eq!(out.new_state, MachineState::Accumulating);
            assert!(!out.should_trigger);
            assert_eq!(out.accumulation.count, expected_count);
            accumulation = out.accumulation;
            state = out.new_state;
            now += Duration::minutes(15);
        }

        let out = process(&input(state, true, accumulation, cfg, once(), now));
        assert!(out.should_trigger);
        assert_eq!(out.new_state, MachineState::Watching);
        assert_eq!(out.accumulation.count, 0);
    }

    #[test]
    fn test_miss_resets_consecutive_count() {
        let cfg = config(3, CountUnit::Evaluations, AccumulationMode::Consecutive, None);
        let now = Utc::now();

        let out = process(&input(
            MachineState::Watching,
            true,
            AccumulationSnapshot::reset(),
            cfg.clone(),
            once(),
            now,
        ));
        assert_eq!(out.accumulation.count, 1);

        let out = process(&input(
            out.new_state,
            false,
            out.accumulation,
            cfg,
            once(),
            now + Duration::minutes(15),
        ));
        assert_eq!(out.new_state, MachineState::Watching);
        assert_eq!(out.accumulation.count, 0);
        assert!(out.accumulation.met_history.is_empty());
    }

    #[test]
    fn test_cooldown_blocks_then_allows() {
        let cfg = config(1, CountUnit::Evaluations, AccumulationMode::Consecutive, None);
        let trigger = with_cooldown(60);
        let t0 = Utc::now();

        // First hit fires and enters cooldown.
        let fired = process(&input(
            MachineState::Watching,
            true,
            AccumulationSnapshot::reset(),
            cfg.clone(),
            trigger.clone(),
            t0,
        ));
        assert!(fired.should_trigger);
        assert_eq!(fired.new_state, MachineState::Cooldown);
        let next_eligible = fired.next_eligible_at.unwrap();
        assert_eq!(next_eligible, t0 + Duration::minutes(60));

        // 30 minutes later: still cooling down, no trigger.
        let blocked = process(&TransitionInput {
            current_state: fired.new_state,
            condition_met: true,
            accumulation: fired.accumulation.clone(),
            config: cfg.clone(),
            trigger: trigger.clone(),
            now: t0 + Duration::minutes(30),
            last_triggered_at: Some(t0),
            next_eligible_at: Some(next_eligible),
        });
        assert!(!blocked.should_trigger);
        assert_eq!(blocked.new_state, MachineState::Cooldown);

        // 61 minutes later: cooldown expires back to watching; the next
        // hit is eligible to trigger again.
        let expired = process(&TransitionInput {
            current_state: MachineState::Cooldown,
            condition_met: true,
            accumulation: fired.accumulation,
            config: cfg.clone(),
            trigger: trigger.clone(),
            now: t0 + Duration::minutes(61),
            last_triggered_at: Some(t0),
            next_eligible_at: Some(next_eligible),
        });
        assert_eq!(expired.new_state, MachineState::Watching);
        assert!(!expired.should_trigger);

        let refired = process(&TransitionInput {
            current_state: expired.new_state,
            condition_met: true,
            accumulation: expired.accumulation,
            config: cfg,
            trigger,
            now: t0 + Duration::minutes(62),
            last_triggered_at: Some(t0),
            next_eligible_at: None,
        });
        assert!(refired.should_trigger);
    }

    #[test]
    fn test_error_state_is_absorbing() {
        let cfg = config(1, CountUnit::Evaluations, AccumulationMode::Consecutive, None);
        let out = process(&input(
            MachineState::Error,
            true,
            AccumulationSnapshot::reset(),
            cfg,
            once(),
            Utc::now(),
        ));
        assert_eq!(out.new_state, MachineState::Error);
        assert!(!out.should_trigger);
        assert!(out.reason.contains("manual reset"));
    }

    #[test]
    fn test_hour_unit_dedups_within_bucket() {
        let cfg = config(2, CountUnit::Hours, AccumulationMode::Consecutive, None);
        let now = Utc::now()
            .date_naive()
            .and_hms_opt(10, 5, 0)
            .unwrap()
            .and_utc();

        let first = process(&input(
            MachineState::Watching,
            true,
            AccumulationSnapshot::reset(),
            cfg.clone(),
            once(),
            now,
        ));
        assert_eq!(first.accumulation.count, 1);

        // Same hour: not counted again.
        let same_hour = process(&input(
            first.new_state,
            true,
            first.accumulation.clone(),
            cfg.clone(),
            once(),
            now + Duration::minutes(20),
        ));
        assert_eq!(same_hour.accumulation.count, 1);
        assert!(!same_hour.should_trigger);

        // Next hour: counted, completing the requirement.
        let next_hour = process(&input(
            same_hour.new_state,
            true,
            same_hour.accumulation,
            cfg,
            once(),
            now + Duration::minutes(60),
        ));
        assert_eq!(next_hour.accumulation.count, 2);
        assert!(next_hour.should_trigger);
    }

    #[test]
    fn test_day_unit_dedups_within_bucket() {
        let cfg = config(2, CountUnit::Days, AccumulationMode::Consecutive, None);
        let now = Utc::now();

        let first = process(&input(
            MachineState::Watching,
            true,
            AccumulationSnapshot::reset(),
            cfg.clone(),
            once(),
            now,
        ));
        let same_day = process(&input(
            first.new_state,
            true,
            first.accumulation,
            cfg,
            once(),
            now + Duration::hours(2),
        ));
        assert_eq!(same_day.accumulation.count, 1);
    }

    #[test]
    fn test_within_window_completion() {
        let cfg = config(3, CountUnit::Evaluations, AccumulationMode::WithinWindow, Some(120));
        let t0 = Utc::now();

        let mut accumulation = AccumulationSnapshot::reset();
        let mut state = MachineState::Watching;
        // Two hits, then a miss, then a third hit inside the window. The
        // miss keeps history, so the third hit completes.
        for (offset, met) in [(0i64, true), (30, true), (45, false), (60, true)] {
            let out = process(&input(
                state,
                met,
                accumulation,
                cfg.clone(),
                once(),
                t0 + Duration::minutes(offset),
            ));
            accumulation = out.accumulation;
            state = out.new_state;
            if offset == 60 {
                assert!(out.should_trigger, "third in-window hit should trigger");
            }
        }
    }

    #[test]
    fn test_within_window_prunes_stale_history() {
        let cfg = config(3, CountUnit::Evaluations, AccumulationMode::WithinWindow, Some(60));
        let t0 = Utc::now();

        let accumulation = AccumulationSnapshot {
            count: 2,
            started_at: Some(t0 - Duration::hours(3)),
            met_history: vec![t0 - Duration::hours(3), t0 - Duration::minutes(30)],
        };

        // Miss prunes the 3-hour-old entry out of the window.
        let out = process(&input(
            MachineState::Accumulating,
            false,
            accumulation,
            cfg,
            once(),
            t0,
        ));
        assert_eq!(out.new_state, MachineState::Watching);
        assert_eq!(out.accumulation.count, 1);
        assert_eq!(out.accumulation.met_history.len(), 1);
    }

    #[test]
    fn test_continuous_gates_on_interval() {
        let cfg = config(1, CountUnit::Evaluations, AccumulationMode::Consecutive, None);
        let trigger = TriggerConfig {
            mode: TriggerMode::Continuous,
            cooldown_minutes: None,
            continuous_interval_minutes: Some(30),
        };
        let t0 = Utc::now();

        // First completion fires.
        let first = process(&TransitionInput {
            current_state: MachineState::Watching,
            condition_met: true,
            accumulation: AccumulationSnapshot::reset(),
            config: cfg.clone(),
            trigger: trigger.clone(),
            now: t0,
            last_triggered_at: None,
            next_eligible_at: None,
        });
        assert!(first.should_trigger);
        assert_eq!(first.new_state, MachineState::Triggered);

        // 10 minutes later: still triggered, no fire.
        let held = process(&TransitionInput {
            current_state: first.new_state,
            condition_met: true,
            accumulation: first.accumulation.clone(),
            config: cfg.clone(),
            trigger: trigger.clone(),
            now: t0 + Duration::minutes(10),
            last_triggered_at: Some(t0),
            next_eligible_at: None,
        });
        assert!(!held.should_trigger);
        assert_eq!(held.new_state, MachineState::Triggered);

        // 31 minutes later: fires again.
        let refired = process(&TransitionInput {
            current_state: held.new_state,
            condition_met: true,
            accumulation: held.accumulation,
            config: cfg,
            trigger,
            now: t0 + Duration::minutes(31),
            last_triggered_at: Some(t0),
            next_eligible_at: None,
        });
        assert!(refired.should_trigger);
    }

    #[test]
    fn test_continuous_falls_back_to_watching_on_miss() {
        let cfg = config(1, CountUnit::Evaluations, AccumulationMode::Consecutive, None);
        let trigger = TriggerConfig {
            mode: TriggerMode::Continuous,
            cooldown_minutes: None,
            continuous_interval_minutes: Some(30),
        };
        let out = process(&TransitionInput {
            current_state: MachineState::Triggered,
            condition_met: false,
            accumulation: AccumulationSnapshot {
                count: 1,
                started_at: Some(Utc::now()),
                met_history: vec![Utc::now()],
            },
            config: cfg,
            trigger,
            now: Utc::now(),
            last_triggered_at: Some(Utc::now()),
            next_eligible_at: None,
        });
        assert_eq!(out.new_state, MachineState::Watching);
    }

    #[test]
    fn test_process_is_idempotent_for_identical_inputs() {
        let cfg = config(2, CountUnit::Evaluations, AccumulationMode::Consecutive, None);
        let input = input(
            MachineState::Accumulating,
            true,
            AccumulationSnapshot {
                count: 1,
                started_at: Some(Utc::now()),
                met_history: vec![Utc::now()],
            },
            cfg,
            once(),
            Utc::now(),
        );
        assert_eq!(process(&input), process(&input));
    }

    #[test]
    fn test_apply_transition_updates_state() {
        let now = Utc::now();
        let mut state = EntityState::new(AgentId::generate(), EntityId::new("c1"), now);
        let output = TransitionOutput {
            new_state: MachineState::Cooldown,
            accumulation: AccumulationSnapshot::reset(),
            should_trigger: true,
            next_eligible_at: Some(now + Duration::minutes(60)),
            reason: "fired".into(),
        };

        apply_transition(&mut state, &output, now);
        assert_eq!(state.machine_state, MachineState::Cooldown);
        assert_eq!(state.trigger_count, 1);
        assert_eq!(state.last_triggered_at, Some(now));
        assert_eq!(state.next_eligible_at, Some(now + Duration::minutes(60)));
    }
}
