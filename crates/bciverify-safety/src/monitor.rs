//! The safety monitor: continuous constraint evaluation with
//! emergency response.
//!
//! The [`SafetyMonitor`] owns a background thread that evaluates every
//! registered constraint once per check interval.  Results at
//! [`SafetyResult::Violation`] or worse are recorded in a bounded ring
//! buffer and reported through an optional violation callback; a
//! [`SafetyResult::CriticalViolation`] additionally latches the
//! emergency flag and invokes the emergency-stop callback
//! synchronously on the monitoring thread.
//!
//! All user callbacks use an explicit `Result` error channel.  A
//! failing callback is caught, logged, and treated conservatively: a
//! failing check is a `SystemFailure`, a failing emergency-stop
//! callback makes [`SafetyMonitor::emergency_stop`] report `false`.

use crate::constraint::{CheckError, SafetyConstraint, SafetyResult};
use crate::violation::{SafetyViolation, ViolationRing};
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

/// Interval of the background monitoring loop.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Substrings that mark a scenario as containing dangerous operations.
/// Literal substring match, preserved for compatibility with existing
/// scenario suites.
const DANGEROUS_KEYWORDS: [&str; 4] = [
    "emergency_stop",
    "critical_fault",
    "patient_disconnect",
    "power_failure",
];

/// Callback invoked for each recorded violation.
pub type ViolationCallback =
    Box<dyn Fn(&SafetyViolation) -> Result<(), CheckError> + Send + Sync>;

/// Callback invoked on emergency stop.  Must be fast and non-blocking.
pub type EmergencyStopCallback = Box<dyn Fn() -> Result<(), CheckError> + Send + Sync>;

/// Snapshot of the monitor's state.
#[derive(Debug, Clone)]
pub struct SafetyStatus {
    pub is_monitoring_active: bool,
    pub last_check_time: SystemTime,
    pub active_constraints: usize,
    pub total_violations: usize,
    pub critical_violations: usize,
    pub recent_violations: Vec<SafetyViolation>,
    pub max_check_duration: Duration,
    pub avg_check_duration: Duration,
}

#[derive(Default)]
struct CheckStats {
    total_duration: Duration,
    max_duration: Duration,
    total_checks: u64,
}

#[derive(Default)]
struct Callbacks {
    violation: Option<ViolationCallback>,
    emergency_stop: Option<EmergencyStopCallback>,
}

struct Inner {
    monitoring: AtomicBool,
    emergency_active: AtomicBool,
    violation_count: AtomicUsize,
    constraints: Mutex<BTreeMap<String, SafetyConstraint>>,
    violations: Mutex<ViolationRing>,
    callbacks: Mutex<Callbacks>,
    stats: Mutex<CheckStats>,
}

/// Continuous safety monitoring with bounded response times.
pub struct SafetyMonitor {
    inner: Arc<Inner>,
    device_name: Mutex<String>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SafetyMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                monitoring: AtomicBool::new(false),
                emergency_active: AtomicBool::new(false),
                violation_count: AtomicUsize::new(0),
                constraints: Mutex::new(BTreeMap::new()),
                violations: Mutex::new(ViolationRing::default()),
                callbacks: Mutex::new(Callbacks::default()),
                stats: Mutex::new(CheckStats::default()),
            }),
            device_name: Mutex::new(String::new()),
            worker: Mutex::new(None),
        }
    }

    /// Initialize for a device under test.
    ///
    /// Fails while monitoring is active.  Resets the violation count
    /// and history.
    pub fn initialize(&self, device_name: &str) -> bool {
        if self.inner.monitoring.load(Ordering::SeqCst) {
            warn!("cannot initialize while monitoring is active");
            return false;
        }

        *self.device_name.lock().unwrap() = device_name.to_string();
        self.inner.violation_count.store(0, Ordering::SeqCst);
        self.inner.violations.lock().unwrap().clear();

        info!("safety monitor initialized for device: {device_name}");
        true
    }

    /// Register (or supersede by name) a safety constraint.
    ///
    /// Returns `false` when the constraint fails validation: empty
    /// name or description, or either duration below one millisecond.
    pub fn register_constraint(&self, constraint: SafetyConstraint) -> bool {
        if !constraint.validate() {
            error!("invalid safety constraint: {}", constraint.name);
            return false;
        }

        info!("registered safety constraint: {}", constraint.name);
        self.inner
            .constraints
            .lock()
            .unwrap()
            .insert(constraint.name.clone(), constraint);
        true
    }

    /// Start the background monitoring loop.
    ///
    /// `Warning` when already running; `SystemFailure` when no
    /// constraints are registered (monitoring stays inactive).
    pub fn start_monitoring(&self) -> SafetyResult {
        if self.inner.monitoring.load(Ordering::SeqCst) {
            warn!("safety monitor already running");
            return SafetyResult::Warning;
        }

        if self.inner.constraints.lock().unwrap().is_empty() {
            error!("no safety constraints registered");
            return SafetyResult::SystemFailure;
        }

        self.inner.violation_count.store(0, Ordering::SeqCst);
        self.inner.emergency_active.store(false, Ordering::SeqCst);
        self.inner.monitoring.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("safety-monitor".into())
            .spawn(move || monitoring_loop(&inner))
            .expect("failed to spawn safety monitor thread");
        *self.worker.lock().unwrap() = Some(handle);

        info!("safety monitoring started");
        SafetyResult::Safe
    }

    /// Stop the monitoring loop and join its thread.  Idempotent.
    pub fn stop_monitoring(&self) -> SafetyResult {
        if !self.inner.monitoring.load(Ordering::SeqCst) {
            return SafetyResult::Warning;
        }

        self.inner.monitoring.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }

        info!("safety monitoring stopped");
        SafetyResult::Safe
    }

    /// Evaluate every constraint once and return the maximum severity.
    ///
    /// Constraints are evaluated in a stable (name) order.  Evaluation
    /// stops early at the first `CriticalViolation` so the worst-case
    /// check time stays bounded; constraints after that point are not
    /// evaluated in this pass.
    pub fn check_system_safety(&self) -> SafetyResult {
        let start = Instant::now();
        let constraints: Vec<SafetyConstraint> = self
            .inner
            .constraints
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        let mut overall = SafetyResult::Safe;
        for constraint in &constraints {
            let result = constraint.evaluate();
            overall = overall.max(result);
            if result == SafetyResult::CriticalViolation {
                break;
            }
        }

        let elapsed = start.elapsed();
        let mut stats = self.inner.stats.lock().unwrap();
        stats.total_duration += elapsed;
        stats.max_duration = stats.max_duration.max(elapsed);
        stats.total_checks += 1;

        overall
    }

    /// Evaluate a single constraint by name.
    pub fn check_constraint(&self, name: &str) -> SafetyResult {
        let constraint = self.inner.constraints.lock().unwrap().get(name).cloned();
        match constraint {
            Some(c) => c.evaluate(),
            None => {
                error!("unknown constraint: {name}");
                SafetyResult::SystemFailure
            }
        }
    }

    /// Pre-flight scan of scenario content.
    ///
    /// Empty content is a `SystemFailure`.  The scan is a literal
    /// substring match over a fixed keyword list and yields `Warning`
    /// on the first hit; it is a crude heuristic kept as-is for
    /// compatibility.
    pub fn check_scenario_safety(&self, scenario_content: &str) -> SafetyResult {
        if scenario_content.is_empty() {
            return SafetyResult::SystemFailure;
        }

        for keyword in DANGEROUS_KEYWORDS {
            if scenario_content.contains(keyword) {
                warn!("scenario contains dangerous operation: {keyword}");
                return SafetyResult::Warning;
            }
        }

        SafetyResult::Safe
    }

    /// Register the violation callback.
    pub fn register_violation_callback(&self, callback: ViolationCallback) {
        self.inner.callbacks.lock().unwrap().violation = Some(callback);
        info!("safety violation callback registered");
    }

    /// Register the emergency-stop callback.
    pub fn register_emergency_stop_callback(&self, callback: EmergencyStopCallback) {
        self.inner.callbacks.lock().unwrap().emergency_stop = Some(callback);
        info!("emergency stop callback registered");
    }

    /// Snapshot the monitor state.
    pub fn get_safety_status(&self) -> SafetyStatus {
        let violations = self.inner.violations.lock().unwrap();
        let stats = self.inner.stats.lock().unwrap();
        let avg = if stats.total_checks > 0 {
            stats.total_duration / stats.total_checks as u32
        } else {
            Duration::ZERO
        };

        SafetyStatus {
            is_monitoring_active: self.inner.monitoring.load(Ordering::SeqCst),
            last_check_time: SystemTime::now(),
            active_constraints: self.inner.constraints.lock().unwrap().len(),
            total_violations: self.inner.violation_count.load(Ordering::SeqCst),
            critical_violations: violations.critical_count(),
            recent_violations: violations.recent(10),
            max_check_duration: stats.max_duration,
            avg_check_duration: avg,
        }
    }

    /// The `max_count` most recent violations, oldest first.
    pub fn get_recent_violations(&self, max_count: usize) -> Vec<SafetyViolation> {
        self.inner.violations.lock().unwrap().recent(max_count)
    }

    /// Whether the system is currently safe (at most `Warning`).
    pub fn is_system_safe(&self) -> bool {
        self.check_system_safety() <= SafetyResult::Warning
    }

    /// Acknowledge a recorded violation.  Audit-trail only: the
    /// acknowledgement is logged and always succeeds, even for ids no
    /// recorded violation carries, so callers cannot use the return
    /// value to probe the history.
    pub fn acknowledge_violation(&self, violation_id: &str, reason: &str) -> bool {
        info!("violation acknowledged: {violation_id} reason: {reason}");
        true
    }

    /// Latch the emergency flag and run the emergency-stop callback.
    ///
    /// Never panics by contract; a callback `Err` is caught and
    /// reported as `false`.
    pub fn emergency_stop(&self) -> bool {
        self.inner.emergency_active.store(true, Ordering::SeqCst);
        error!("EMERGENCY STOP ACTIVATED");

        let callbacks = self.inner.callbacks.lock().unwrap();
        match callbacks.emergency_stop.as_deref() {
            Some(cb) => match cb() {
                Ok(()) => true,
                Err(e) => {
                    error!("emergency stop callback failed: {e}");
                    false
                }
            },
            None => true,
        }
    }

    /// Clear the emergency flag.  Only valid while it is set.
    pub fn reset_after_emergency(&self) -> bool {
        if !self.inner.emergency_active.load(Ordering::SeqCst) {
            return false;
        }

        self.inner.emergency_active.store(false, Ordering::SeqCst);
        warn!("emergency stop reset, system ready");
        true
    }

    /// Whether the emergency flag is latched.
    pub fn is_emergency_active(&self) -> bool {
        self.inner.emergency_active.load(Ordering::SeqCst)
    }

    /// Update a constraint's check interval at runtime.
    ///
    /// The interval must lie within 10 ms..=10 s.
    pub fn update_constraint_interval(&self, name: &str, interval: Duration) -> bool {
        if interval < Duration::from_millis(10) || interval > Duration::from_secs(10) {
            return false;
        }

        let mut constraints = self.inner.constraints.lock().unwrap();
        match constraints.get_mut(name) {
            Some(c) => {
                c.check_interval = interval;
                info!("updated constraint interval for {name}");
                true
            }
            None => false,
        }
    }

    /// Human-readable monitoring summary.
    pub fn generate_safety_report(&self) -> String {
        let status = self.get_safety_status();
        let mut report = String::from("=== Safety Monitoring Report ===\n");
        report.push_str(&format!(
            "Monitoring Active: {}\n",
            if status.is_monitoring_active { "Yes" } else { "No" }
        ));
        report.push_str(&format!("Active Constraints: {}\n", status.active_constraints));
        report.push_str(&format!("Total Violations: {}\n", status.total_violations));
        report.push_str(&format!(
            "Critical Violations: {}\n",
            status.critical_violations
        ));
        report.push_str(&format!(
            "Average Check Duration: {:?}\n",
            status.avg_check_duration
        ));

        if !status.recent_violations.is_empty() {
            report.push_str("\nRecent Violations:\n");
            for v in &status.recent_violations {
                report.push_str(&format!("- {}: {}\n", v.constraint_name, v.description));
            }
        }

        report
    }

    /// Whether the monitoring loop is running.
    pub fn is_monitoring_active(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SafetyMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
        info!(
            "safety monitor destroyed, total violations: {}",
            self.inner.violation_count.load(Ordering::SeqCst)
        );
    }
}

fn monitoring_loop(inner: &Inner) {
    info!("safety monitoring loop started");

    while inner.monitoring.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();

        let constraints: Vec<SafetyConstraint> =
            inner.constraints.lock().unwrap().values().cloned().collect();

        for constraint in &constraints {
            if !inner.monitoring.load(Ordering::SeqCst) {
                break;
            }

            let result = constraint.evaluate();
            if result >= SafetyResult::Violation {
                let violation = SafetyViolation {
                    timestamp: SystemTime::now(),
                    constraint_name: constraint.name.clone(),
                    constraint_kind: constraint.kind,
                    severity: result,
                    description: "constraint violation detected".to_string(),
                    is_critical: constraint.is_critical,
                    requires_emergency_stop: result == SafetyResult::CriticalViolation,
                };
                let emergency = violation.requires_emergency_stop;
                record_violation(inner, violation);

                if emergency {
                    inner.emergency_active.store(true, Ordering::SeqCst);
                    let callbacks = inner.callbacks.lock().unwrap();
                    if let Some(cb) = callbacks.emergency_stop.as_deref() {
                        if let Err(e) = cb() {
                            error!("emergency stop callback failed: {e}");
                        }
                    }
                }
            }
        }

        // Wall-clock corrected: sleep the remainder of the interval.
        let elapsed = cycle_start.elapsed();
        if let Some(remaining) = DEFAULT_CHECK_INTERVAL.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        }
    }

    info!("safety monitoring loop ended");
}

fn record_violation(inner: &Inner, violation: SafetyViolation) {
    inner.violation_count.fetch_add(1, Ordering::SeqCst);
    error!(
        "SAFETY VIOLATION [{}]: {} - {}",
        violation.severity, violation.constraint_name, violation.description
    );

    inner.violations.lock().unwrap().push(violation.clone());

    // Callback runs outside the violations lock.
    let callbacks = inner.callbacks.lock().unwrap();
    if let Some(cb) = callbacks.violation.as_deref() {
        if let Err(e) = cb(&violation) {
            error!("safety violation callback failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::SafetyConstraintKind;
    use std::sync::atomic::AtomicUsize;

    fn monitor() -> SafetyMonitor {
        let _ = env_logger::builder().is_test(true).try_init();
        let m = SafetyMonitor::new();
        assert!(m.initialize("bci-dut"));
        m
    }

    fn constant(name: &str, result: SafetyResult) -> SafetyConstraint {
        SafetyConstraint::new(
            name,
            SafetyConstraintKind::SystemIntegrity,
            "fixed-result test constraint",
            move || Ok(result),
        )
    }

    #[test]
    fn start_without_constraints_is_system_failure() {
        let m = monitor();
        assert_eq!(m.start_monitoring(), SafetyResult::SystemFailure);
        assert!(!m.is_monitoring_active());
    }

    #[test]
    fn start_stop_lifecycle() {
        let m = monitor();
        assert!(m.register_constraint(constant("ok", SafetyResult::Safe)));

        assert_eq!(m.start_monitoring(), SafetyResult::Safe);
        assert!(m.is_monitoring_active());
        assert_eq!(m.start_monitoring(), SafetyResult::Warning);

        assert_eq!(m.stop_monitoring(), SafetyResult::Safe);
        assert!(!m.is_monitoring_active());
        assert_eq!(m.stop_monitoring(), SafetyResult::Warning);
    }

    #[test]
    fn initialize_fails_while_monitoring() {
        let m = monitor();
        m.register_constraint(constant("ok", SafetyResult::Safe));
        m.start_monitoring();
        assert!(!m.initialize("other-device"));
        m.stop_monitoring();
    }

    #[test]
    fn system_check_escalates_to_max_severity() {
        let m = monitor();
        m.register_constraint(constant("a_safe", SafetyResult::Safe));
        m.register_constraint(constant("b_warn", SafetyResult::Warning));
        m.register_constraint(constant("c_violation", SafetyResult::Violation));
        assert_eq!(m.check_system_safety(), SafetyResult::Violation);
    }

    #[test]
    fn system_check_stops_at_first_critical() {
        let m = monitor();
        let later_evaluations = Arc::new(AtomicUsize::new(0));

        // BTreeMap order: "a_critical" sorts before "z_counted".
        m.register_constraint(constant("a_critical", SafetyResult::CriticalViolation));
        let counter = Arc::clone(&later_evaluations);
        m.register_constraint(SafetyConstraint::new(
            "z_counted",
            SafetyConstraintKind::Resource,
            "counts evaluations",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(SafetyResult::Safe)
            },
        ));

        assert_eq!(m.check_system_safety(), SafetyResult::CriticalViolation);
        assert_eq!(later_evaluations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_check_downgrades_that_constraint_only() {
        let m = monitor();
        m.register_constraint(SafetyConstraint::new(
            "broken",
            SafetyConstraintKind::Signal,
            "always errors",
            || Err(CheckError::Failed("sensor fault".into())),
        ));
        assert_eq!(m.check_system_safety(), SafetyResult::SystemFailure);
        assert_eq!(m.check_constraint("broken"), SafetyResult::SystemFailure);
    }

    #[test]
    fn unknown_constraint_is_system_failure() {
        let m = monitor();
        assert_eq!(m.check_constraint("nope"), SafetyResult::SystemFailure);
    }

    #[test]
    fn sub_millisecond_constraint_rejected() {
        let m = monitor();
        let c = constant("fast", SafetyResult::Safe)
            .with_interval(Duration::from_micros(100));
        assert!(!m.register_constraint(c));
        assert_eq!(m.get_safety_status().active_constraints, 0);
    }

    #[test]
    fn scenario_safety_keyword_scan() {
        let m = monitor();
        assert_eq!(m.check_scenario_safety(""), SafetyResult::SystemFailure);
        assert_eq!(
            m.check_scenario_safety("ramp amplitude then emergency_stop"),
            SafetyResult::Warning
        );
        assert_eq!(
            m.check_scenario_safety("simulate power_failure on rail B"),
            SafetyResult::Warning
        );
        assert_eq!(
            m.check_scenario_safety("read telemetry; verify checksum"),
            SafetyResult::Safe
        );
    }

    #[test]
    fn monitoring_loop_records_violations_and_invokes_callback() {
        let m = monitor();
        m.register_constraint(constant("flaky", SafetyResult::Violation));

        let callback_hits = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&callback_hits);
        m.register_violation_callback(Box::new(move |v| {
            assert_eq!(v.constraint_name, "flaky");
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(m.start_monitoring(), SafetyResult::Safe);
        std::thread::sleep(Duration::from_millis(250));
        m.stop_monitoring();

        assert!(callback_hits.load(Ordering::SeqCst) >= 1);
        assert!(m.get_safety_status().total_violations >= 1);
        assert!(!m.get_recent_violations(10).is_empty());
    }

    #[test]
    fn critical_violation_triggers_emergency_stop_callback() {
        let m = monitor();
        m.register_constraint(
            constant("meltdown", SafetyResult::CriticalViolation).critical(),
        );

        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        m.register_emergency_stop_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        m.start_monitoring();
        std::thread::sleep(Duration::from_millis(150));
        m.stop_monitoring();

        assert!(stops.load(Ordering::SeqCst) >= 1);
        assert!(m.is_emergency_active());
        assert!(m.reset_after_emergency());
        assert!(!m.is_emergency_active());
    }

    #[test]
    fn emergency_stop_reports_callback_failure_as_false() {
        let m = monitor();
        m.register_emergency_stop_callback(Box::new(|| {
            Err(CheckError::Failed("actuator stuck".into()))
        }));
        assert!(!m.emergency_stop());
        assert!(m.is_emergency_active());
    }

    #[test]
    fn emergency_stop_without_callback_succeeds() {
        let m = monitor();
        assert!(m.emergency_stop());
        assert!(m.is_emergency_active());
    }

    #[test]
    fn reset_requires_active_emergency() {
        let m = monitor();
        assert!(!m.reset_after_emergency());
    }

    #[test]
    fn acknowledgement_always_succeeds() {
        let m = monitor();
        assert!(m.acknowledge_violation("no-such-violation", "reviewed"));
    }

    #[test]
    fn update_interval_validates_range() {
        let m = monitor();
        m.register_constraint(constant("c", SafetyResult::Safe));

        assert!(!m.update_constraint_interval("c", Duration::from_millis(5)));
        assert!(!m.update_constraint_interval("c", Duration::from_secs(11)));
        assert!(m.update_constraint_interval("c", Duration::from_millis(500)));
        assert!(!m.update_constraint_interval("missing", Duration::from_millis(500)));
    }

    #[test]
    fn report_mentions_violations() {
        let m = monitor();
        m.register_constraint(constant("leak", SafetyResult::Violation));
        m.start_monitoring();
        std::thread::sleep(Duration::from_millis(150));
        m.stop_monitoring();

        let report = m.generate_safety_report();
        assert!(report.contains("Safety Monitoring Report"));
        assert!(report.contains("leak"));
    }
}
