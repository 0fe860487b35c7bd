//! Safety monitoring for BCI verification.
//!
//! This crate provides the [`SafetyMonitor`]: a continuously running,
//! bounded-time evaluator of registered safety constraints with
//! automatic emergency response.  Constraints carry user-supplied
//! check functions; violations land in a fixed-capacity ring buffer
//! and can trigger callbacks up to and including a synchronous
//! emergency stop.
//!
//! Each monitor instance owns its full state, so multiple independent
//! monitors can coexist in one process (useful for testing).

pub mod constraint;
pub mod monitor;
pub mod violation;

pub use constraint::{
    default_bci_constraints, CheckError, SafetyConstraint, SafetyConstraintKind, SafetyResult,
};
pub use monitor::{
    EmergencyStopCallback, SafetyMonitor, SafetyStatus, ViolationCallback, DEFAULT_CHECK_INTERVAL,
};
pub use violation::{SafetyViolation, ViolationRing};
