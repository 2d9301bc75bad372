//! Accumulation state machine for the ASPEN engine.
//!
//! Pure state-transition logic, no I/O. The orchestrator feeds each
//! condition result through [`process`] and applies the output to the
//! persisted per-pair state with [`apply_transition`]; no other code path
//! may advance accumulation counts or history.

mod machine;

pub use machine::{apply_transition, process, TransitionInput, TransitionOutput};
