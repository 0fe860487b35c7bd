//! Timing constraints and the safety rules derived from them.

use crate::analyzer::TimingMeasurement;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A real-time requirement on a named task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConstraint {
    /// Task name this constraint applies to.
    pub name: String,
    /// Hard execution-time bound.
    pub deadline: Duration,
    /// Activation period, when the task is periodic.
    pub period: Option<Duration>,
    /// Tolerated jitter bound.
    pub max_jitter: Option<Duration>,
    /// Minimum separation between consecutive activations.
    pub min_separation: Option<Duration>,
    /// True when a miss endangers the patient.
    pub is_critical_path: bool,
    /// Tolerated fraction of deadline misses.
    pub deadline_miss_threshold: f64,
}

impl TimingConstraint {
    pub fn new(name: impl Into<String>, deadline: Duration) -> Self {
        Self {
            name: name.into(),
            deadline,
            period: None,
            max_jitter: None,
            min_separation: None,
            is_critical_path: false,
            deadline_miss_threshold: 0.001,
        }
    }

    pub fn periodic(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = Some(jitter);
        self
    }

    pub fn critical_path(mut self) -> Self {
        self.is_critical_path = true;
        self
    }

    pub fn miss_threshold(mut self, threshold: f64) -> Self {
        self.deadline_miss_threshold = threshold;
        self
    }
}

/// Validate a timing constraint definition.
///
/// Name must be non-empty, the deadline positive, the miss threshold
/// within [0, 1], and the deadline no longer than the period when a
/// period is set.
pub fn validate_timing_constraint(constraint: &TimingConstraint) -> bool {
    if constraint.name.is_empty() || constraint.deadline.is_zero() {
        return false;
    }
    if !(0.0..=1.0).contains(&constraint.deadline_miss_threshold) {
        return false;
    }
    if let Some(period) = constraint.period {
        if constraint.deadline > period {
            return false;
        }
    }
    true
}

/// Whether one measurement constitutes a safety violation under a
/// constraint.
///
/// Any miss on a critical path counts; elsewhere an overrun must reach
/// 1.5x the deadline, or the jitter must exceed twice the jitter
/// bound.
pub fn is_safety_violation(measurement: &TimingMeasurement, constraint: &TimingConstraint) -> bool {
    if constraint.is_critical_path && !measurement.deadline_met {
        return true;
    }

    if measurement.execution_time > constraint.deadline.mul_f64(1.5) {
        return true;
    }

    if let Some(max_jitter) = constraint.max_jitter {
        if measurement.jitter > max_jitter * 2 {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn measurement(execution_time: Duration, deadline_met: bool) -> TimingMeasurement {
        let now = Instant::now();
        TimingMeasurement {
            task_name: "neural_decode".into(),
            start: now,
            end: now + execution_time,
            execution_time,
            jitter: Duration::ZERO,
            deadline_met,
            is_outlier: false,
        }
    }

    #[test]
    fn validation_rules() {
        assert!(validate_timing_constraint(&TimingConstraint::new(
            "t",
            Duration::from_millis(10)
        )));
        assert!(!validate_timing_constraint(&TimingConstraint::new(
            "",
            Duration::from_millis(10)
        )));
        assert!(!validate_timing_constraint(&TimingConstraint::new(
            "t",
            Duration::ZERO
        )));
        assert!(!validate_timing_constraint(
            &TimingConstraint::new("t", Duration::from_millis(10)).miss_threshold(1.5)
        ));
        // Deadline longer than period is unschedulable.
        assert!(!validate_timing_constraint(
            &TimingConstraint::new("t", Duration::from_millis(20))
                .periodic(Duration::from_millis(10))
        ));
        assert!(validate_timing_constraint(
            &TimingConstraint::new("t", Duration::from_millis(10))
                .periodic(Duration::from_millis(10))
        ));
    }

    #[test]
    fn critical_path_miss_is_always_a_violation() {
        let c = TimingConstraint::new("neural_decode", Duration::from_millis(50)).critical_path();
        let m = measurement(Duration::from_millis(51), false);
        assert!(is_safety_violation(&m, &c));
    }

    #[test]
    fn non_critical_miss_needs_margin() {
        let c = TimingConstraint::new("neural_decode", Duration::from_millis(50));
        // Missed, but under the 1.5x margin.
        let m = measurement(Duration::from_millis(60), false);
        assert!(!is_safety_violation(&m, &c));
        let m = measurement(Duration::from_millis(80), false);
        assert!(is_safety_violation(&m, &c));
    }

    #[test]
    fn excessive_jitter_is_a_violation() {
        let c = TimingConstraint::new("neural_decode", Duration::from_millis(50))
            .max_jitter(Duration::from_millis(2));
        let mut m = measurement(Duration::from_millis(10), true);
        m.jitter = Duration::from_millis(5);
        assert!(is_safety_violation(&m, &c));
        m.jitter = Duration::from_millis(3);
        assert!(!is_safety_violation(&m, &c));
    }
}
