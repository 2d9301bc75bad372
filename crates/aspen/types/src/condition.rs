//! Condition trees
//!
//! Conditions are a closed tagged union so trees can be stored as data and
//! reconstructed from their `type` tag. Comparison operators accept the
//! legacy symbolic spellings (`>`, `>=`, ...) as deserialization aliases.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// A user-defined condition over campaign metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a single metric against a constant.
    Threshold {
        metric: String,
        operator: ComparisonOp,
        value: f64,
    },

    /// Compare the current value of a metric against a historical reference.
    Change {
        metric: String,
        reference_period: ReferencePeriod,
        direction: ChangeDirection,
        percent_threshold: f64,
    },

    /// AND/OR combinator over two or more child conditions.
    Composite {
        operator: LogicalOp,
        conditions: Vec<Condition>,
    },

    /// Negation of a single child condition.
    Not { condition: Box<Condition> },
}

impl Condition {
    /// Validate the tree structure. Composite nodes need at least two
    /// children; thresholds need a non-empty metric name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Condition::Threshold { metric, .. } | Condition::Change { metric, .. } => {
                if metric.trim().is_empty() {
                    return Err(ValidationError::Condition("metric name is empty".into()));
                }
                Ok(())
            }
            Condition::Composite {
                operator,
                conditions,
            } => {
                if conditions.len() < 2 {
                    return Err(ValidationError::Condition(format!(
                        "{} composite requires at least 2 children, got {}",
                        operator,
                        conditions.len()
                    )));
                }
                for child in conditions {
                    child.validate()?;
                }
                Ok(())
            }
            Condition::Not { condition } => condition.validate(),
        }
    }

    /// Number of leaf conditions in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Condition::Threshold { .. } | Condition::Change { .. } => 1,
            Condition::Composite { conditions, .. } => {
                conditions.iter().map(Condition::leaf_count).sum()
            }
            Condition::Not { condition } => condition.leaf_count(),
        }
    }
}

/// Comparison operators for threshold conditions.
///
/// The symbolic aliases keep stored agents from older releases loadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = "==", alias = "=")]
    Eq,
    #[serde(alias = "!=")]
    Neq,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Eq => "==",
            ComparisonOp::Neq => "!=",
        };
        write!(f, "{}", symbol)
    }
}

/// AND/OR for composite conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "AND"),
            LogicalOp::Or => write!(f, "OR"),
        }
    }
}

/// Which historical bucket a change condition compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePeriod {
    /// Most recent bucket before the current one.
    PreviousDay,

    /// Bucket seven days back.
    PreviousWeek,

    /// Earliest bucket in the supplied window.
    PreviousPeriod,
}

impl fmt::Display for ReferencePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferencePeriod::PreviousDay => write!(f, "previous day"),
            ReferencePeriod::PreviousWeek => write!(f, "previous week"),
            ReferencePeriod::PreviousPeriod => write!(f, "previous period"),
        }
    }
}

/// Direction filter for change conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increase,
    Decrease,
    Any,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_roundtrip() {
        let condition = Condition::Composite {
            operator: LogicalOp::And,
            conditions: vec![
                Condition::Threshold {
                    metric: "spend".into(),
                    operator: ComparisonOp::Gt,
                    value: 100.0,
                },
                Condition::Not {
                    condition: Box::new(Condition::Change {
                        metric: "roas".into(),
                        reference_period: ReferencePeriod::PreviousDay,
                        direction: ChangeDirection::Decrease,
                        percent_threshold: 20.0,
                    }),
                },
            ],
        };

        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "composite");
        assert_eq!(json["conditions"][0]["type"], "threshold");

        let back: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(back, condition);
    }

    #[test]
    fn test_legacy_symbolic_operators() {
        let json = serde_json::json!({
            "type": "threshold",
            "metric": "cpa",
            "operator": ">=",
            "value": 25.0
        });
        let condition: Condition = serde_json::from_value(json).unwrap();
        match condition {
            Condition::Threshold { operator, .. } => assert_eq!(operator, ComparisonOp::Gte),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_composite_requires_two_children() {
        let condition = Condition::Composite {
            operator: LogicalOp::Or,
            conditions: vec![Condition::Threshold {
                metric: "spend".into(),
                operator: ComparisonOp::Gt,
                value: 1.0,
            }],
        };
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_empty_metric_rejected() {
        let condition = Condition::Threshold {
            metric: "  ".into(),
            operator: ComparisonOp::Lt,
            value: 0.5,
        };
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_leaf_count() {
        let condition = Condition::Composite {
            operator: LogicalOp::And,
            conditions: vec![
                Condition::Threshold {
                    metric: "a".into(),
                    operator: ComparisonOp::Gt,
                    value: 1.0,
                },
                Condition::Threshold {
                    metric: "b".into(),
                    operator: ComparisonOp::Lt,
                    value: 2.0,
                },
            ],
        };
        assert_eq!(condition.leaf_count(), 2);
    }
}
