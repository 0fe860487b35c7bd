//! Verification orchestration for BCI devices under test.
//!
//! The [`Verifier`] coordinates the safety monitor with scenario
//! execution, user assertions, configuration, safety logging, and the
//! emergency-stop broadcast.  Fault injectors and timing analyzers are
//! independent collaborators; they subscribe to the verifier's
//! [`EmergencyBroadcast`] rather than being owned by it.

pub mod config;
pub mod emergency;
pub mod safety_log;
pub mod verifier;

pub use config::{ConfigError, ConfigStore, ConfigValue, Validator};
pub use emergency::{EmergencyBroadcast, EmergencyError, EmergencySubscriber};
pub use safety_log::{SafetyEvent, SafetyEventCallback, SafetyLevel, SafetyLog, SafetyLogError};
pub use verifier::{
    AssertionCallback, VerificationOutcome, VerificationReport, Verifier, VerifierConfig,
    VerifierError, VerifierStatistics,
};
