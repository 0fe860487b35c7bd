//! Violation records and the bounded violation history.

use crate::constraint::{SafetyConstraintKind, SafetyResult};
use std::collections::VecDeque;
use std::time::SystemTime;

/// An observed safety violation.
///
/// Created by the monitoring loop whenever a constraint check returns
/// [`SafetyResult::Violation`] or worse; immutable once created.
#[derive(Debug, Clone)]
pub struct SafetyViolation {
    /// Wall-clock time of detection.
    pub timestamp: SystemTime,
    /// Name of the violated constraint.
    pub constraint_name: String,
    /// Category of the violated constraint.
    pub constraint_kind: SafetyConstraintKind,
    /// Observed severity.
    pub severity: SafetyResult,
    /// Human-readable description.
    pub description: String,
    /// Whether the constraint was registered as critical.
    pub is_critical: bool,
    /// Whether this violation demands an immediate emergency stop.
    pub requires_emergency_stop: bool,
}

/// Fixed-capacity FIFO store of recent violations.
///
/// When full, pushing evicts the oldest entry.  Insertion order is
/// preserved; entries are never reordered.
#[derive(Debug)]
pub struct ViolationRing {
    entries: VecDeque<SafetyViolation>,
    capacity: usize,
}

impl ViolationRing {
    /// Capacity used by the safety monitor.
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a violation, evicting the oldest entry when at capacity.
    pub fn push(&mut self, violation: SafetyViolation) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(violation);
    }

    /// The `max_count` most recent violations, oldest first.
    pub fn recent(&self, max_count: usize) -> Vec<SafetyViolation> {
        let count = max_count.min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - count)
            .cloned()
            .collect()
    }

    /// Number of violations a critical constraint produced.
    pub fn critical_count(&self) -> usize {
        self.entries.iter().filter(|v| v.is_critical).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ViolationRing {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(name: &str, critical: bool) -> SafetyViolation {
        SafetyViolation {
            timestamp: SystemTime::now(),
            constraint_name: name.to_string(),
            constraint_kind: SafetyConstraintKind::SystemIntegrity,
            severity: SafetyResult::Violation,
            description: "test violation".to_string(),
            is_critical: critical,
            requires_emergency_stop: false,
        }
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let mut ring = ViolationRing::default();
        for i in 0..250 {
            ring.push(violation(&format!("c{i}"), false));
        }
        assert_eq!(ring.len(), ViolationRing::DEFAULT_CAPACITY);
    }

    #[test]
    fn fifo_eviction_drops_oldest() {
        let mut ring = ViolationRing::default();
        for i in 0..=ViolationRing::DEFAULT_CAPACITY {
            ring.push(violation(&format!("c{i}"), false));
        }
        // 101 pushes into a 100-slot ring: c0 evicted, c1 is now oldest.
        let all = ring.recent(usize::MAX);
        assert_eq!(all.len(), 100);
        assert_eq!(all[0].constraint_name, "c1");
        assert_eq!(all.last().unwrap().constraint_name, "c100");
    }

    #[test]
    fn recent_returns_newest_in_insertion_order() {
        let mut ring = ViolationRing::new(10);
        for i in 0..5 {
            ring.push(violation(&format!("c{i}"), false));
        }
        let last_two = ring.recent(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].constraint_name, "c3");
        assert_eq!(last_two[1].constraint_name, "c4");
    }

    #[test]
    fn critical_count_filters() {
        let mut ring = ViolationRing::new(10);
        ring.push(violation("a", true));
        ring.push(violation("b", false));
        ring.push(violation("c", true));
        assert_eq!(ring.critical_count(), 2);
    }
}
