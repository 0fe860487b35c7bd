//! Safety constraint definitions.
//!
//! A [`SafetyConstraint`] pairs a named, typed safety property with a
//! user-supplied check function.  Check functions report through an
//! explicit error channel: an `Err` is always treated as the most
//! conservative outcome ([`SafetyResult::SystemFailure`]) for that
//! constraint, so a misbehaving check can never make the system look
//! safer than it is.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error raised by a user-supplied check or callback.
///
/// Callers of a check never propagate this further; it is mapped to
/// the conservative outcome for the callback's context and logged.
#[derive(Error, Debug, Clone)]
pub enum CheckError {
    #[error("check failed: {0}")]
    Failed(String),

    #[error("required sensor or data source unavailable: {0}")]
    Unavailable(String),
}

/// Safety severity, totally ordered from benign to catastrophic.
///
/// The overall severity of a system-wide check is the maximum across
/// all constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SafetyResult {
    /// System is operating safely.
    Safe,
    /// Warning condition detected.
    Warning,
    /// Safety violation detected.
    Violation,
    /// Critical safety violation requiring emergency response.
    CriticalViolation,
    /// System failure (including failing check functions).
    SystemFailure,
}

impl fmt::Display for SafetyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyResult::Safe => write!(f, "SAFE"),
            SafetyResult::Warning => write!(f, "WARNING"),
            SafetyResult::Violation => write!(f, "VIOLATION"),
            SafetyResult::CriticalViolation => write!(f, "CRITICAL_VIOLATION"),
            SafetyResult::SystemFailure => write!(f, "SYSTEM_FAILURE"),
        }
    }
}

/// Category of a safety constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyConstraintKind {
    /// Real-time timing constraints.
    Timing,
    /// Resource utilization constraints.
    Resource,
    /// Signal processing constraints.
    Signal,
    /// Communication safety constraints.
    Communication,
    /// Direct patient safety constraints.
    PatientSafety,
    /// Overall system integrity constraints.
    SystemIntegrity,
}

impl fmt::Display for SafetyConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyConstraintKind::Timing => write!(f, "timing"),
            SafetyConstraintKind::Resource => write!(f, "resource"),
            SafetyConstraintKind::Signal => write!(f, "signal"),
            SafetyConstraintKind::Communication => write!(f, "communication"),
            SafetyConstraintKind::PatientSafety => write!(f, "patient-safety"),
            SafetyConstraintKind::SystemIntegrity => write!(f, "system-integrity"),
        }
    }
}

/// Check function invoked each monitoring cycle.
pub type CheckFn = Arc<dyn Fn() -> Result<SafetyResult, CheckError> + Send + Sync>;

/// A registered safety constraint.
///
/// Constraints are keyed by name; registering a second constraint with
/// the same name supersedes the first.  Constraints are never deleted.
#[derive(Clone)]
pub struct SafetyConstraint {
    /// Unique constraint name.
    pub name: String,
    /// Constraint category.
    pub kind: SafetyConstraintKind,
    /// Human-readable description.
    pub description: String,
    /// Whether a violation of this constraint is critical.
    pub is_critical: bool,
    /// How often the monitoring loop should evaluate this constraint.
    pub check_interval: Duration,
    /// How long a violation may persist before escalation.
    pub violation_timeout: Duration,
    /// The check itself.
    pub check: CheckFn,
}

impl SafetyConstraint {
    /// Create a constraint with default intervals (100 ms check, 1 s timeout).
    pub fn new(
        name: impl Into<String>,
        kind: SafetyConstraintKind,
        description: impl Into<String>,
        check: impl Fn() -> Result<SafetyResult, CheckError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            is_critical: false,
            check_interval: Duration::from_millis(100),
            violation_timeout: Duration::from_millis(1000),
            check: Arc::new(check),
        }
    }

    /// Mark this constraint as critical.
    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }

    /// Override the check interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Override the violation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.violation_timeout = timeout;
        self
    }

    /// Validate the constraint definition.
    ///
    /// Name and description must be non-empty; both durations must be
    /// at least one millisecond.
    pub fn validate(&self) -> bool {
        !self.name.is_empty()
            && !self.description.is_empty()
            && self.check_interval >= Duration::from_millis(1)
            && self.violation_timeout >= Duration::from_millis(1)
    }

    /// Scheduling priority: higher number, higher priority.
    pub fn priority(&self) -> u32 {
        let mut priority = 0;
        if self.is_critical {
            priority += 100;
        }
        priority += match self.kind {
            SafetyConstraintKind::PatientSafety => 50,
            SafetyConstraintKind::Timing => 30,
            SafetyConstraintKind::SystemIntegrity => 20,
            _ => 10,
        };
        priority
    }

    /// Run the check, mapping any error to the conservative outcome.
    pub(crate) fn evaluate(&self) -> SafetyResult {
        match (self.check)() {
            Ok(result) => result,
            Err(e) => {
                log::error!("check failed for constraint {}: {e}", self.name);
                SafetyResult::SystemFailure
            }
        }
    }
}

impl fmt::Debug for SafetyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyConstraint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("is_critical", &self.is_critical)
            .field("check_interval", &self.check_interval)
            .field("violation_timeout", &self.violation_timeout)
            .finish_non_exhaustive()
    }
}

/// Stock constraints for a BCI device under test.
///
/// These carry no real check logic (always `Safe`); embedders replace
/// the checks with device-specific ones.
pub fn default_bci_constraints() -> Vec<SafetyConstraint> {
    vec![
        SafetyConstraint::new(
            "real_time_response",
            SafetyConstraintKind::Timing,
            "Real-time response constraint for BCI commands",
            || Ok(SafetyResult::Safe),
        )
        .critical()
        .with_interval(Duration::from_millis(10))
        .with_timeout(Duration::from_millis(100)),
        SafetyConstraint::new(
            "signal_amplitude_limit",
            SafetyConstraintKind::PatientSafety,
            "Neural signal amplitude within safe limits",
            || Ok(SafetyResult::Safe),
        )
        .critical()
        .with_interval(Duration::from_millis(50))
        .with_timeout(Duration::from_millis(200)),
    ]
}
