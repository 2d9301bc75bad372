//! Condition evaluation for the ASPEN engine.
//!
//! The evaluator is pure and total: it never performs I/O and never fails.
//! A missing metric or missing historical reference produces an ordinary
//! "not met" outcome with an explanation, not an error.

mod evaluator;

pub use evaluator::{ConditionEvaluator, ConditionOutcome, FLOAT_EPSILON};
