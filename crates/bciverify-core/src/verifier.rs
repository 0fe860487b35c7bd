//! The verification orchestrator.
//!
//! A [`Verifier`] owns the safety monitor, configuration store, and
//! safety log for one device under test, executes scenario content
//! under safety pre-checks and user assertions, and fans an emergency
//! shutdown out to every subscribed component through the
//! [`EmergencyBroadcast`].

use crate::config::ConfigStore;
use crate::emergency::{EmergencyBroadcast, EmergencyError};
use crate::safety_log::SafetyLog;
use bciverify_safety::{default_bci_constraints, SafetyMonitor, SafetyResult};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

/// Errors surfaced by verifier callbacks.
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("verifier not initialized")]
    NotInitialized,

    #[error("assertion failed: {0}")]
    Assertion(String),
}

/// Safety assertion consulted before and after scenario execution and
/// on every monitoring tick.  `Ok(false)` or `Err` counts as a failed
/// assertion.
pub type AssertionCallback = Box<dyn Fn() -> Result<bool, VerifierError> + Send + Sync>;

/// Outcome of one verification activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Success,
    Failure,
    Timeout,
    SafetyViolation,
    InvalidInput,
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationOutcome::Success => "SUCCESS",
            VerificationOutcome::Failure => "FAILURE",
            VerificationOutcome::Timeout => "TIMEOUT",
            VerificationOutcome::SafetyViolation => "SAFETY_VIOLATION",
            VerificationOutcome::InvalidInput => "INVALID_INPUT",
        };
        write!(f, "{s}")
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    pub device_name: String,
    /// Fraction of operations eligible for fault injection.
    pub fault_injection_rate: f64,
    pub test_timeout: Duration,
    pub verbose_logging: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            fault_injection_rate: 0.1,
            test_timeout: Duration::from_secs(30),
            verbose_logging: false,
        }
    }
}

impl VerifierConfig {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    fn is_valid(&self) -> bool {
        !self.device_name.is_empty()
            && (0.0..=1.0).contains(&self.fault_injection_rate)
            && !self.test_timeout.is_zero()
    }
}

/// Result of one scenario execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub outcome: VerificationOutcome,
    pub started: SystemTime,
    pub duration: Duration,
    pub violations_detected: usize,
    pub assertions_failed: usize,
    pub details: String,
}

/// Aggregate counters over the verifier's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierStatistics {
    pub scenarios_executed: usize,
    pub scenarios_failed: usize,
    pub safety_violations_detected: usize,
    pub assertions_failed: usize,
}

#[derive(Default)]
struct Counters {
    scenarios_executed: AtomicUsize,
    scenarios_failed: AtomicUsize,
    safety_violations_detected: AtomicUsize,
    assertions_failed: AtomicUsize,
}

type AssertionList = Arc<Mutex<Vec<(String, AssertionCallback)>>>;

/// IV&V orchestrator for one device under test.
pub struct Verifier {
    config: Mutex<Option<VerifierConfig>>,
    config_store: ConfigStore,
    log: SafetyLog,
    monitor: Arc<SafetyMonitor>,
    emergency: Arc<EmergencyBroadcast>,
    assertions: AssertionList,
    counters: Arc<Counters>,
    monitoring: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl Verifier {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(None),
            config_store: ConfigStore::new(),
            log: SafetyLog::new(),
            monitor: Arc::new(SafetyMonitor::new()),
            emergency: Arc::new(EmergencyBroadcast::new()),
            assertions: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            monitoring: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Initialize for a device under test.
    ///
    /// Validates the configuration, prepares the safety monitor with
    /// the stock BCI constraints, and subscribes the monitor to the
    /// emergency broadcast.
    pub fn initialize(&self, config: VerifierConfig) -> VerificationOutcome {
        if !config.is_valid() {
            error!("invalid verifier configuration");
            return VerificationOutcome::InvalidInput;
        }
        if self.monitoring.load(Ordering::SeqCst) {
            warn!("cannot re-initialize while monitoring");
            return VerificationOutcome::Failure;
        }

        if !self.monitor.initialize(&config.device_name) {
            return VerificationOutcome::Failure;
        }
        for constraint in default_bci_constraints() {
            if !self.monitor.register_constraint(constraint) {
                return VerificationOutcome::Failure;
            }
        }

        self.config_store.register_safety_param(
            "fault_injection_rate",
            0.0,
            1.0,
            None,
        );
        if self
            .config_store
            .set_double("fault_injection_rate", config.fault_injection_rate)
            .is_err()
        {
            return VerificationOutcome::Failure;
        }
        let _ = self
            .config_store
            .set_string("device_name", config.device_name.clone());
        let _ = self
            .config_store
            .set_duration("test_timeout", config.test_timeout);

        let monitor = Arc::clone(&self.monitor);
        self.emergency.subscribe("safety-monitor", Box::new(move || {
            if monitor.emergency_stop() {
                Ok(())
            } else {
                Err(EmergencyError::Handler(
                    "safety-monitor".into(),
                    "emergency stop callback failed".into(),
                ))
            }
        }));

        self.shutdown.store(false, Ordering::SeqCst);
        *self.config.lock().unwrap() = Some(config);
        info!("verifier initialized");
        VerificationOutcome::Success
    }

    /// Register a named safety assertion.
    pub fn register_safety_assertion(&self, name: impl Into<String>, callback: AssertionCallback) {
        let name = name.into();
        info!("safety assertion registered: {name}");
        self.assertions.lock().unwrap().push((name, callback));
    }

    /// Execute scenario content.
    ///
    /// The content itself is opaque; the verifier contributes the
    /// safety pre-check, the pre- and post-execution assertion sweeps,
    /// and the timing envelope.
    pub fn execute_scenario_content(&self, content: &str) -> VerificationReport {
        let started = SystemTime::now();
        let begin = Instant::now();

        let config = self.config.lock().unwrap().clone();
        let Some(config) = config else {
            return self.finish_report(
                VerificationOutcome::InvalidInput,
                started,
                begin,
                0,
                "verifier not initialized",
            );
        };

        if self.shutdown.load(Ordering::SeqCst) || self.emergency.is_active() {
            self.counters.scenarios_failed.fetch_add(1, Ordering::SeqCst);
            return self.finish_report(
                VerificationOutcome::SafetyViolation,
                started,
                begin,
                0,
                "emergency shutdown active",
            );
        }

        self.counters.scenarios_executed.fetch_add(1, Ordering::SeqCst);

        let pre_check = self.monitor.check_scenario_safety(content);
        if pre_check != SafetyResult::Safe {
            self.counters
                .safety_violations_detected
                .fetch_add(1, Ordering::SeqCst);
            self.counters.scenarios_failed.fetch_add(1, Ordering::SeqCst);
            self.log.log_critical(
                "scenario rejected by safety pre-check",
                &config.device_name,
            );
            let mut report = self.finish_report(
                VerificationOutcome::SafetyViolation,
                started,
                begin,
                0,
                "scenario failed safety pre-check",
            );
            report.violations_detected = 1;
            return report;
        }

        if let Some(name) = self.check_assertions("pre-execution") {
            return self.assertion_violation_report(started, begin, &name);
        }

        if config.verbose_logging {
            info!("executing scenario ({} bytes)", content.len());
        }
        let steps = content.lines().filter(|l| !l.trim().is_empty()).count();

        if begin.elapsed() > config.test_timeout {
            self.counters.scenarios_failed.fetch_add(1, Ordering::SeqCst);
            return self.finish_report(
                VerificationOutcome::Timeout,
                started,
                begin,
                0,
                "scenario exceeded test timeout",
            );
        }

        if let Some(name) = self.check_assertions("post-execution") {
            return self.assertion_violation_report(started, begin, &name);
        }

        self.finish_report(
            VerificationOutcome::Success,
            started,
            begin,
            0,
            &format!("scenario completed, {steps} steps"),
        )
    }

    /// Run the assertion sweep for a scenario phase, stopping at the
    /// first failure.  Returns the failed assertion's name.
    fn check_assertions(&self, phase: &str) -> Option<String> {
        let assertions = self.assertions.lock().unwrap();
        for (name, callback) in assertions.iter() {
            match callback() {
                Ok(true) => {}
                Ok(false) => {
                    warn!("{phase} assertion failed: {name}");
                    return Some(name.clone());
                }
                Err(e) => {
                    error!("{phase} assertion {name} errored: {e}");
                    return Some(name.clone());
                }
            }
        }
        None
    }

    /// A false safety assertion aborts the scenario as a safety
    /// violation, not a plain failure.
    fn assertion_violation_report(
        &self,
        started: SystemTime,
        begin: Instant,
        name: &str,
    ) -> VerificationReport {
        self.counters.assertions_failed.fetch_add(1, Ordering::SeqCst);
        self.counters
            .safety_violations_detected
            .fetch_add(1, Ordering::SeqCst);
        self.counters.scenarios_failed.fetch_add(1, Ordering::SeqCst);

        let mut report = self.finish_report(
            VerificationOutcome::SafetyViolation,
            started,
            begin,
            1,
            &format!("safety assertion failed: {name}"),
        );
        report.violations_detected = 1;
        report
    }

    fn finish_report(
        &self,
        outcome: VerificationOutcome,
        started: SystemTime,
        begin: Instant,
        assertions_failed: usize,
        details: &str,
    ) -> VerificationReport {
        info!("scenario outcome: {outcome} ({details})");
        VerificationReport {
            outcome,
            started,
            duration: begin.elapsed(),
            violations_detected: 0,
            assertions_failed,
            details: details.to_string(),
        }
    }

    /// Start the continuous verification loop: the safety monitor's
    /// own loop plus a 100 ms sweep over system safety and all
    /// registered assertions.  Per-tick failures are counted and
    /// logged; they never abort the loop.
    pub fn start_monitoring(&self) -> bool {
        if self.config.lock().unwrap().is_none() {
            error!("cannot start monitoring before initialization");
            return false;
        }
        if self.monitoring.swap(true, Ordering::SeqCst) {
            warn!("verification monitoring already active");
            return false;
        }

        if self.monitor.start_monitoring() == SafetyResult::SystemFailure {
            self.monitoring.store(false, Ordering::SeqCst);
            return false;
        }

        let monitoring = Arc::clone(&self.monitoring);
        let monitor = Arc::clone(&self.monitor);
        let assertions = Arc::clone(&self.assertions);
        let counters = Arc::clone(&self.counters);
        let handle = std::thread::Builder::new()
            .name("verifier-monitor".into())
            .spawn(move || {
                while monitoring.load(Ordering::SeqCst) {
                    let tick = Instant::now();

                    let result = monitor.check_system_safety();
                    if result >= SafetyResult::Violation {
                        warn!("system safety degraded to {result}");
                        counters
                            .safety_violations_detected
                            .fetch_add(1, Ordering::SeqCst);
                    }

                    let failures = sweep_assertions(&assertions.lock().unwrap(), "monitoring");
                    counters.assertions_failed.fetch_add(failures, Ordering::SeqCst);

                    if let Some(remaining) =
                        Duration::from_millis(100).checked_sub(tick.elapsed())
                    {
                        std::thread::sleep(remaining);
                    }
                }
            })
            .expect("failed to spawn verifier monitoring thread");
        *self.worker.lock().unwrap() = Some(handle);

        info!("verification monitoring started");
        true
    }

    /// Stop the verification loop and the safety monitor.  Idempotent.
    pub fn stop_monitoring(&self) {
        if !self.monitoring.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.monitor.stop_monitoring();
        info!("verification monitoring stopped");
    }

    /// Shut everything down and broadcast the emergency.
    ///
    /// Never panics and is idempotent: repeated calls return without
    /// re-broadcasting.
    pub fn emergency_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        self.log
            .log_critical("emergency shutdown initiated", "verifier");
        self.stop_monitoring();
        self.emergency.trigger();
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub fn get_statistics(&self) -> VerifierStatistics {
        VerifierStatistics {
            scenarios_executed: self.counters.scenarios_executed.load(Ordering::SeqCst),
            scenarios_failed: self.counters.scenarios_failed.load(Ordering::SeqCst),
            safety_violations_detected: self
                .counters
                .safety_violations_detected
                .load(Ordering::SeqCst),
            assertions_failed: self.counters.assertions_failed.load(Ordering::SeqCst),
        }
    }

    pub fn get_config(&self) -> Option<VerifierConfig> {
        self.config.lock().unwrap().clone()
    }

    /// The configuration store, for safety-critical parameters.
    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    /// The safety log front end.
    pub fn safety_log(&self) -> &SafetyLog {
        &self.log
    }

    /// The owned safety monitor.
    pub fn safety_monitor(&self) -> &Arc<SafetyMonitor> {
        &self.monitor
    }

    /// The broadcast other components subscribe to (fault injectors,
    /// timing analyzers).
    pub fn emergency_broadcast(&self) -> &Arc<EmergencyBroadcast> {
        &self.emergency
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Verifier {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

fn sweep_assertions(assertions: &[(String, AssertionCallback)], phase: &str) -> usize {
    let mut failures = 0;
    for (name, callback) in assertions {
        match callback() {
            Ok(true) => {}
            Ok(false) => {
                warn!("{phase} assertion failed: {name}");
                failures += 1;
            }
            Err(e) => {
                // An erroring assertion counts as failed.
                error!("{phase} assertion {name} errored: {e}");
                failures += 1;
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> Verifier {
        let _ = env_logger::builder().is_test(true).try_init();
        let v = Verifier::new();
        assert_eq!(
            v.initialize(VerifierConfig::new("neurobridge-01")),
            VerificationOutcome::Success
        );
        v
    }

    #[test]
    fn initialize_validates_input() {
        let v = Verifier::new();
        assert_eq!(
            v.initialize(VerifierConfig::new("")),
            VerificationOutcome::InvalidInput
        );

        let mut config = VerifierConfig::new("dut");
        config.fault_injection_rate = 1.5;
        assert_eq!(v.initialize(config), VerificationOutcome::InvalidInput);

        let mut config = VerifierConfig::new("dut");
        config.test_timeout = Duration::ZERO;
        assert_eq!(v.initialize(config), VerificationOutcome::InvalidInput);
    }

    #[test]
    fn initialization_seeds_config_and_constraints() {
        let v = verifier();
        assert_eq!(
            v.config_store().get_string("device_name", ""),
            "neurobridge-01"
        );
        assert!(v.config_store().is_safety_compliant());
        assert_eq!(v.safety_monitor().get_safety_status().active_constraints, 2);
    }

    #[test]
    fn benign_scenario_succeeds() {
        let v = verifier();
        let report = v.execute_scenario_content("calibrate\nread telemetry\n");
        assert_eq!(report.outcome, VerificationOutcome::Success);

        let stats = v.get_statistics();
        assert_eq!(stats.scenarios_executed, 1);
        assert_eq!(stats.scenarios_failed, 0);
    }

    #[test]
    fn uninitialized_verifier_rejects_scenarios() {
        let v = Verifier::new();
        let report = v.execute_scenario_content("calibrate");
        assert_eq!(report.outcome, VerificationOutcome::InvalidInput);
    }

    #[test]
    fn dangerous_scenario_is_a_safety_violation() {
        let v = verifier();
        let report = v.execute_scenario_content("ramp then critical_fault injection");
        assert_eq!(report.outcome, VerificationOutcome::SafetyViolation);
        assert_eq!(report.violations_detected, 1);

        // Empty content is rejected the same way.
        let report = v.execute_scenario_content("");
        assert_eq!(report.outcome, VerificationOutcome::SafetyViolation);

        let stats = v.get_statistics();
        assert_eq!(stats.scenarios_failed, 2);
        assert!(stats.safety_violations_detected >= 2);
    }

    #[test]
    fn failing_assertion_aborts_as_safety_violation() {
        let v = verifier();
        v.register_safety_assertion("impedance in range", Box::new(|| Ok(false)));

        let report = v.execute_scenario_content("calibrate");
        assert_eq!(report.outcome, VerificationOutcome::SafetyViolation);
        assert_eq!(report.assertions_failed, 1);
        assert_eq!(report.violations_detected, 1);

        let stats = v.get_statistics();
        assert!(stats.assertions_failed >= 1);
        assert!(stats.safety_violations_detected >= 1);
        assert_eq!(stats.scenarios_failed, 1);
    }

    #[test]
    fn erroring_assertion_is_a_safety_violation_too() {
        let v = verifier();
        v.register_safety_assertion(
            "telemetry reachable",
            Box::new(|| Err(VerifierError::Assertion("link down".into()))),
        );

        let report = v.execute_scenario_content("calibrate");
        assert_eq!(report.outcome, VerificationOutcome::SafetyViolation);
        assert_eq!(report.assertions_failed, 1);
        assert!(v.get_statistics().safety_violations_detected >= 1);
    }

    #[test]
    fn assertion_sweep_stops_at_the_first_failure() {
        let v = verifier();
        v.register_safety_assertion("first", Box::new(|| Ok(false)));

        let later_checked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&later_checked);
        v.register_safety_assertion("second", Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(true)
        }));

        let report = v.execute_scenario_content("calibrate");
        assert_eq!(report.outcome, VerificationOutcome::SafetyViolation);
        assert!(!later_checked.load(Ordering::SeqCst));
    }

    #[test]
    fn monitoring_lifecycle() {
        let v = verifier();
        assert!(!v.is_monitoring());
        assert!(v.start_monitoring());
        assert!(v.is_monitoring());
        assert!(!v.start_monitoring());

        std::thread::sleep(Duration::from_millis(50));
        v.stop_monitoring();
        assert!(!v.is_monitoring());
        assert!(!v.safety_monitor().is_monitoring_active());
    }

    #[test]
    fn emergency_shutdown_reaches_the_monitor_and_is_idempotent() {
        let v = verifier();
        assert!(v.start_monitoring());

        v.emergency_shutdown();
        assert!(!v.is_monitoring());
        assert!(v.emergency_broadcast().is_active());
        assert!(v.safety_monitor().is_emergency_active());

        // Second call must be a no-op.
        v.emergency_shutdown();

        let report = v.execute_scenario_content("calibrate");
        assert_eq!(report.outcome, VerificationOutcome::SafetyViolation);
    }

    #[test]
    fn re_initialization_does_not_duplicate_emergency_handling() {
        let v = verifier();
        assert_eq!(
            v.initialize(VerifierConfig::new("neurobridge-01")),
            VerificationOutcome::Success
        );

        v.emergency_shutdown();
        assert!(v.safety_monitor().is_emergency_active());
        // The monitor subscription was replaced, not accumulated.
        assert!(v.emergency_broadcast().is_active());
    }

    #[test]
    fn report_serializes_for_archival() {
        let v = verifier();
        let report = v.execute_scenario_content("calibrate");
        let json = serde_json::to_string(&report).unwrap();
        let back: VerificationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcome, VerificationOutcome::Success);
    }

    #[test]
    fn external_subscribers_hear_the_shutdown() {
        let v = verifier();
        let heard = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&heard);
        v.emergency_broadcast().subscribe("fault-injector", Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));

        v.emergency_shutdown();
        assert!(heard.load(Ordering::SeqCst));
    }
}
