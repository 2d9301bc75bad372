//! Leaf-first evaluation of condition trees.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

use aspen_types::{
    ChangeDirection, ComparisonOp, Condition, HistoricalObservations, LogicalOp, ObservationSet,
    ReferencePeriod,
};

/// Epsilon for eq/neq comparisons. Exact float equality is flaky across
/// serialization boundaries; anything within this band counts as equal.
pub const FLOAT_EPSILON: f64 = 1e-9;

/// Result of evaluating a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub met: bool,

    /// Human-readable explanation of the decision.
    pub explanation: String,

    /// The inputs consumed, keyed by tree path.
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl ConditionOutcome {
    fn not_met(explanation: impl Into<String>) -> Self {
        Self {
            met: false,
            explanation: explanation.into(),
            inputs: BTreeMap::new(),
        }
    }
}

/// Evaluates condition trees against observations and per-date history.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    epsilon: f64,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self {
            epsilon: FLOAT_EPSILON,
        }
    }

    /// Evaluate a condition tree.
    ///
    /// `today` anchors change-condition reference lookups; callers pass the
    /// evaluation cycle's date so results are reproducible.
    pub fn evaluate(
        &self,
        condition: &Condition,
        observations: &ObservationSet,
        historical: &HistoricalObservations,
        today: NaiveDate,
    ) -> ConditionOutcome {
        let outcome = self.evaluate_node(condition, observations, historical, today, "");
        debug!(
            met = outcome.met,
            explanation = %outcome.explanation,
            "condition evaluated"
        );
        outcome
    }

    fn evaluate_node(
        &self,
        condition: &Condition,
        observations: &ObservationSet,
        historical: &HistoricalObservations,
        today: NaiveDate,
        path: &str,
    ) -> ConditionOutcome {
        match condition {
            Condition::Threshold {
                metric,
                operator,
                value,
            } => self.evaluate_threshold(metric, *operator, *value, observations, path),
            Condition::Change {
                metric,
                reference_period,
                direction,
                percent_threshold,
            } => self.evaluate_change(
                metric,
                *reference_period,
                *direction,
                *percent_threshold,
                observations,
                historical,
                today,
                path,
            ),
            Condition::Composite {
                operator,
                conditions,
            } => self.evaluate_composite(*operator, conditions, observations, historical, today, path),
            Condition::Not { condition } => {
                let child = self.evaluate_node(
                    condition,
                    observations,
                    historical,
                    today,
                    &child_path(path, 0),
                );
                ConditionOutcome {
                    met: !child.met,
                    explanation: format!("NOT ({})", child.explanation),
                    inputs: child.inputs,
                }
            }
        }
    }

    fn evaluate_threshold(
        &self,
        metric: &str,
        operator: ComparisonOp,
        value: f64,
        observations: &ObservationSet,
        path: &str,
    ) -> ConditionOutcome {
        let current = match observations.get(metric) {
            Some(v) => v,
            None => {
                return ConditionOutcome::not_met(format!("metric '{}' not available", metric));
            }
        };

        let met = match operator {
            ComparisonOp::Gt => current > value,
            ComparisonOp::Gte => current >= value,
            ComparisonOp::Lt => current < value,
            ComparisonOp::Lte => current <= value,
            ComparisonOp::Eq => (current - value).abs() <= self.epsilon,
            ComparisonOp::Neq => (current - value).abs() > self.epsilon,
        };

        let mut inputs = BTreeMap::new();
        inputs.insert(input_key(path, metric), json_number(current));
        inputs.insert(input_key(path, "threshold"), json_number(value));

        ConditionOutcome {
            met,
            explanation: format!(
                "{}={} {} {} ({})",
                metric,
                fmt_value(current),
                operator,
                fmt_value(value),
                if met { "met" } else { "not met" }
            ),
            inputs,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_change(
        &self,
        metric: &str,
        reference_period: ReferencePeriod,
        direction: ChangeDirection,
        percent_threshold: f64,
        observations: &ObservationSet,
        historical: &HistoricalObservations,
        today: NaiveDate,
        path: &str,
    ) -> ConditionOutcome {
        let current = match observations.get(metric) {
            Some(v) => v,
            None => {
                return ConditionOutcome::not_met(format!("metric '{}' not available", metric));
            }
        };

        let reference = match reference_period {
            ReferencePeriod::PreviousDay => historical.latest_before(today, metric),
            ReferencePeriod::PreviousWeek => historical
                .value_on(today - chrono::Duration::days(7), metric)
                .map(|v| (today - chrono::Duration::days(7), v)),
            ReferencePeriod::PreviousPeriod => historical.earliest(metric),
        };

        let (reference_date, reference) = match reference {
            Some(found) => found,
            None => {
                return ConditionOutcome::not_met(format!(
                    "no historical data for '{}' ({})",
                    metric, reference_period
                ));
            }
        };

        let change_percent = percent_change(current, reference);

        let met = match direction {
            ChangeDirection::Increase => change_percent >= percent_threshold,
            ChangeDirection::Decrease => change_percent <= -percent_threshold,
            ChangeDirection::Any => change_percent.abs() >= percent_threshold,
        };

        let mut inputs = BTreeMap::new();
        inputs.insert(input_key(path, metric), json_number(current));
        inputs.insert(input_key(path, "reference"), json_number(reference));
        inputs.insert(
            input_key(path, "reference_date"),
            serde_json::Value::String(reference_date.to_string()),
        );
        inputs.insert(input_key(path, "change_percent"), json_number(change_percent));

        ConditionOutcome {
            met,
            explanation: format!(
                "{} changed {}% vs {} ({}={}, reference={}) ({})",
                metric,
                fmt_value(change_percent),
                reference_period,
                metric,
                fmt_value(current),
                fmt_value(reference),
                if met { "met" } else { "not met" }
            ),
            inputs,
        }
    }

    fn evaluate_composite(
        &self,
        operator: LogicalOp,
        conditions: &[Condition],
        observations: &ObservationSet,
        historical: &HistoricalObservations,
        today: NaiveDate,
        path: &str,
    ) -> ConditionOutcome {
        let children: Vec<ConditionOutcome> = conditions
            .iter()
            .enumerate()
            .map(|(i, child)| {
                self.evaluate_node(child, observations, historical, today, &child_path(path, i))
            })
            .collect();

        let met = match operator {
            LogicalOp::And => children.iter().all(|c| c.met),
            LogicalOp::Or => children.iter().any(|c| c.met),
        };

        // AND surfaces the children that failed; OR surfaces the ones that
        // passed. When nothing stands out, concatenate everything.
        let surfaced: Vec<&ConditionOutcome> = match operator {
            LogicalOp::And => children.iter().filter(|c| !c.met).collect(),
            LogicalOp::Or => children.iter().filter(|c| c.met).collect(),
        };
        let explained: Vec<String> = if surfaced.is_empty() {
            children.iter().map(|c| c.explanation.clone()).collect()
        } else {
            surfaced.iter().map(|c| c.explanation.clone()).collect()
        };

        let mut inputs = BTreeMap::new();
        for child in children {
            inputs.extend(child.inputs);
        }

        ConditionOutcome {
            met,
            explanation: format!(
                "{} of {} children {}: {}",
                operator,
                conditions.len(),
                if met { "met" } else { "not met" },
                explained.join("; ")
            ),
            inputs,
        }
    }
}

/// Percent change with the zero-reference convention: a zero reference maps
/// positive current to +inf, negative to -inf, and zero to 0%.
fn percent_change(current: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        if current > 0.0 {
            f64::INFINITY
        } else if current < 0.0 {
            f64::NEG_INFINITY
        } else {
            0.0
        }
    } else {
        (current - reference) / reference.abs() * 100.0
    }
}

fn child_path(path: &str, index: usize) -> String {
    if path.is_empty() {
        index.to_string()
    } else {
        format!("{}.{}", path, index)
    }
}

fn input_key(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn json_number(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(value.to_string()))
}

fn fmt_value(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
