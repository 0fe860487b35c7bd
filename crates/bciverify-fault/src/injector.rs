//! The fault injector: gated, auditable fault delivery.
//!
//! Every injection runs the same gate sequence before any fault code
//! executes: initialization check, emergency latch, safety pre-checks
//! (excluded functions, impact bound, registered safety callbacks,
//! fail-closed), and target lookup.  Only then does the type-specific
//! executor run, and every attempt lands in the injection history.

use crate::faults::{
    impact_score, validate_fault_config, CommFaultKind, CorruptionType, FaultInjectionConfig,
    FaultInjectionResult, FaultTarget, FaultType, InjectionStatus,
};
use log::{error, info, warn};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;
use thiserror::Error;

/// Errors surfaced by injector callbacks.
#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("safety check failed: {0}")]
    SafetyCheck(String),

    #[error("propagation analysis failed: {0}")]
    Propagation(String),
}

/// Callback consulted before every injection.  `Ok(true)` permits the
/// injection; `Ok(false)` or `Err` blocks it.
pub type SafetyCheckCallback =
    Box<dyn Fn(&FaultInjectionConfig) -> Result<bool, InjectionError> + Send + Sync>;

/// Callback invoked with every completed injection result.
pub type PropagationCallback =
    Box<dyn Fn(&FaultInjectionResult) -> Result<(), InjectionError> + Send + Sync>;

/// Aggregate view over the injection history.
#[derive(Debug, Clone, Default)]
pub struct InjectionStatistics {
    pub total_injections: usize,
    pub successful: usize,
    pub blocked_by_safety: usize,
    pub failed: usize,
    pub average_impact: f64,
}

#[derive(Default)]
struct Callbacks {
    safety: Vec<SafetyCheckCallback>,
    propagation: Option<PropagationCallback>,
}

pub(crate) struct CampaignSignal {
    pub(crate) stop: Mutex<bool>,
    pub(crate) cv: Condvar,
}

pub(crate) struct InjectorInner {
    pub(crate) initialized: AtomicBool,
    pub(crate) emergency_active: AtomicBool,
    pub(crate) campaign_active: AtomicBool,
    pub(crate) campaign: CampaignSignal,
    targets: Mutex<BTreeMap<String, FaultTarget>>,
    history: Mutex<Vec<FaultInjectionResult>>,
    callbacks: Mutex<Callbacks>,
    rng: Mutex<ChaCha20Rng>,
}

/// Controlled fault injection with safety gating.
pub struct FaultInjector {
    pub(crate) inner: Arc<InjectorInner>,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
}

impl FaultInjector {
    /// Injector with a fixed default seed; see [`FaultInjector::with_seed`].
    pub fn new() -> Self {
        Self::with_seed(42)
    }

    /// Injector whose jitter and probability sampling is reproducible
    /// from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(InjectorInner {
                initialized: AtomicBool::new(false),
                emergency_active: AtomicBool::new(false),
                campaign_active: AtomicBool::new(false),
                campaign: CampaignSignal {
                    stop: Mutex::new(false),
                    cv: Condvar::new(),
                },
                targets: Mutex::new(BTreeMap::new()),
                history: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Callbacks::default()),
                rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Prepare the injector for a system under test.
    pub fn initialize(&self, system_name: &str) -> bool {
        if system_name.is_empty() {
            error!("injector requires a system name");
            return false;
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        self.inner.emergency_active.store(false, Ordering::SeqCst);
        info!("fault injector initialized for system: {system_name}");
        true
    }

    /// Register (or replace by component name) an injectable target.
    pub fn configure_target(&self, target: FaultTarget) -> bool {
        if target.component.is_empty() {
            error!("fault target requires a component name");
            return false;
        }

        info!("configured fault target: {}", target.component);
        self.inner
            .targets
            .lock()
            .unwrap()
            .insert(target.component.clone(), target);
        true
    }

    pub fn inject_timing_fault(&self, config: &FaultInjectionConfig) -> FaultInjectionResult {
        self.inner.inject(config, FaultType::Timing)
    }

    pub fn inject_data_corruption(&self, config: &FaultInjectionConfig) -> FaultInjectionResult {
        self.inner.inject(config, FaultType::DataCorruption)
    }

    pub fn inject_communication_fault(
        &self,
        config: &FaultInjectionConfig,
    ) -> FaultInjectionResult {
        self.inner.inject(config, FaultType::Communication)
    }

    pub fn inject_hardware_fault(&self, config: &FaultInjectionConfig) -> FaultInjectionResult {
        self.inner.inject(config, FaultType::HardwareFailure)
    }

    /// Dispatch on the config's own fault type.
    pub fn inject_fault(&self, config: &FaultInjectionConfig) -> FaultInjectionResult {
        self.inner.inject(config, config.fault_type)
    }

    /// Consulted before every injection; any callback can veto.
    pub fn register_safety_callback(&self, callback: SafetyCheckCallback) {
        self.inner.callbacks.lock().unwrap().safety.push(callback);
        info!("injection safety callback registered");
    }

    /// Receives every completed injection result.
    pub fn register_propagation_callback(&self, callback: PropagationCallback) {
        self.inner.callbacks.lock().unwrap().propagation = Some(callback);
        info!("fault propagation callback registered");
    }

    /// Snapshot of the injection history.
    pub fn get_injection_history(&self) -> Vec<FaultInjectionResult> {
        self.inner.history.lock().unwrap().clone()
    }

    pub fn get_statistics(&self) -> InjectionStatistics {
        let history = self.inner.history.lock().unwrap();
        let mut stats = InjectionStatistics {
            total_injections: history.len(),
            ..Default::default()
        };

        let mut impact_sum = 0.0;
        for result in history.iter() {
            match result.status {
                InjectionStatus::Success => stats.successful += 1,
                InjectionStatus::BlockedBySafety => stats.blocked_by_safety += 1,
                InjectionStatus::Failed | InjectionStatus::Timeout => stats.failed += 1,
                InjectionStatus::TargetNotFound => {}
            }
            impact_sum += result.system_impact_score;
        }
        if !history.is_empty() {
            stats.average_impact = impact_sum / history.len() as f64;
        }
        stats
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().unwrap().clear();
    }

    /// Whether the emergency latch is set.
    pub fn is_emergency_active(&self) -> bool {
        self.inner.emergency_active.load(Ordering::SeqCst)
    }

    /// Clear the emergency latch; only valid while it is set.
    pub fn reset_after_emergency(&self) -> bool {
        if !self.inner.emergency_active.load(Ordering::SeqCst) {
            return false;
        }

        self.inner.emergency_active.store(false, Ordering::SeqCst);
        warn!("fault injector emergency state reset");
        true
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectorInner {
    pub(crate) fn inject(
        &self,
        config: &FaultInjectionConfig,
        fault_type: FaultType,
    ) -> FaultInjectionResult {
        if !self.initialized.load(Ordering::SeqCst) {
            let result =
                FaultInjectionResult::new(InjectionStatus::Failed, "injector not initialized");
            self.record(result.clone());
            return result;
        }

        if self.emergency_active.load(Ordering::SeqCst) {
            let result = FaultInjectionResult::new(
                InjectionStatus::BlockedBySafety,
                "emergency stop active",
            );
            self.record(result.clone());
            return result;
        }

        if !validate_fault_config(config) {
            let result =
                FaultInjectionResult::new(InjectionStatus::Failed, "invalid fault configuration");
            self.record(result.clone());
            return result;
        }

        if let Some(reason) = self.safety_block_reason(config) {
            warn!("injection blocked: {reason}");
            let result = FaultInjectionResult::new(InjectionStatus::BlockedBySafety, reason);
            self.record(result.clone());
            return result;
        }

        let target = self
            .targets
            .lock()
            .unwrap()
            .get(&config.target.component)
            .cloned();
        let Some(target) = target else {
            let result = FaultInjectionResult::new(
                InjectionStatus::TargetNotFound,
                format!("target not configured: {}", config.target.component),
            );
            self.record(result.clone());
            return result;
        };

        if !config.injection_delay.is_zero() {
            std::thread::sleep(config.injection_delay);
        }

        let mut result = FaultInjectionResult::new(
            InjectionStatus::Success,
            format!("{fault_type} fault injected into {}", target.component),
        );
        result.propagation_path.push(target.component.clone());

        match fault_type {
            FaultType::Timing => self.execute_timing_fault(config, &mut result),
            FaultType::DataCorruption => self.execute_data_corruption(config, &mut result),
            FaultType::Communication => self.execute_communication_fault(config, &mut result),
            FaultType::HardwareFailure => {
                self.execute_hardware_failure(config, &target, &mut result)
            }
            FaultType::ResourceExhaustion => self.execute_resource_exhaustion(config, &mut result),
            FaultType::PowerFailure => self.execute_power_failure(config, &target, &mut result),
        }

        if config.auto_recovery {
            result.recovery_time = Some(SystemTime::now());
        }
        result.system_impact_score = impact_score(&result);

        info!(
            "fault injection complete: {} status={} impact={:.2}",
            target.component, result.status, result.system_impact_score
        );
        self.record(result.clone());
        result
    }

    /// Safety pre-checks for one injection.  Returns the blocking
    /// reason, or `None` when the injection may proceed.
    fn safety_block_reason(&self, config: &FaultInjectionConfig) -> Option<String> {
        if !config.respect_safety_constraints {
            return None;
        }

        if let Some(function) = &config.target.function {
            if config.excluded_critical_functions.contains(function) {
                return Some(format!("target function is excluded: {function}"));
            }
        }

        if config.max_system_impact > 0.5 {
            return Some(format!(
                "requested system impact too high: {:.2}",
                config.max_system_impact
            ));
        }

        // Fail closed: a callback error blocks just like a veto.
        let callbacks = self.callbacks.lock().unwrap();
        for callback in &callbacks.safety {
            match callback(config) {
                Ok(true) => {}
                Ok(false) => return Some("vetoed by safety callback".to_string()),
                Err(e) => {
                    error!("safety callback failed: {e}");
                    return Some(format!("safety callback error: {e}"));
                }
            }
        }

        None
    }

    fn execute_timing_fault(&self, config: &FaultInjectionConfig, result: &mut FaultInjectionResult) {
        let tf = &config.timing_fault;
        if !tf.injected_delay.is_zero() {
            std::thread::sleep(tf.injected_delay);
            result
                .observed_effects
                .push(format!("execution delayed by {:?}", tf.injected_delay));
        }

        if !tf.jitter_amplitude.is_zero() {
            let amplitude = tf.jitter_amplitude.as_micros() as i64;
            let jitter_us = self.rng.lock().unwrap().gen_range(-amplitude..=amplitude);
            result
                .observed_effects
                .push(format!("timing jitter of {jitter_us} us introduced"));
        }

        if tf.cause_timeout {
            result
                .safety_violations
                .push("operation timeout induced".to_string());
        }

        if tf.deadline_violation_factor > 1.0 {
            result.observed_effects.push(format!(
                "deadline stretched by factor {:.2}",
                tf.deadline_violation_factor
            ));
        }
    }

    fn execute_data_corruption(
        &self,
        config: &FaultInjectionConfig,
        result: &mut FaultInjectionResult,
    ) {
        let dc = &config.data_corruption;
        let effect = match dc.corruption_type {
            CorruptionType::BitFlip => {
                format!("bits flipped at positions {:?}", dc.bit_positions)
            }
            CorruptionType::ValueRange => "value driven outside its valid range".to_string(),
            CorruptionType::PatternCorruption => {
                format!("data overwritten with {}-byte pattern", dc.pattern.len())
            }
            CorruptionType::ChecksumViolation => "checksum invalidated".to_string(),
        };
        result.observed_effects.push(effect);

        if config.target.address_range.is_some() {
            result
                .observed_effects
                .push("corruption confined to configured address range".to_string());
        }
    }

    fn execute_communication_fault(
        &self,
        config: &FaultInjectionConfig,
        result: &mut FaultInjectionResult,
    ) {
        let cf = &config.comm_fault;
        let effect = match cf.kind {
            CommFaultKind::PacketLoss => {
                format!("packets dropped with probability {:.2}", cf.probability)
            }
            CommFaultKind::PacketDelay => {
                std::thread::sleep(cf.delay_range);
                format!("packets delayed by {:?}", cf.delay_range)
            }
            CommFaultKind::PacketCorruption => "packet payload corrupted".to_string(),
            CommFaultKind::DuplicatePackets => "packets duplicated".to_string(),
            CommFaultKind::ReorderPackets => "packet order scrambled".to_string(),
        };
        result.observed_effects.push(effect);
    }

    fn execute_hardware_failure(
        &self,
        _config: &FaultInjectionConfig,
        target: &FaultTarget,
        result: &mut FaultInjectionResult,
    ) {
        result
            .observed_effects
            .push(format!("simulated hardware failure in {}", target.component));
        result.affected_components.push(target.component.clone());

        if target.is_critical_path {
            result
                .safety_violations
                .push("hardware failure on patient-critical path".to_string());
        }
    }

    fn execute_resource_exhaustion(
        &self,
        config: &FaultInjectionConfig,
        result: &mut FaultInjectionResult,
    ) {
        result.observed_effects.push(format!(
            "resource exhaustion simulated in {}",
            config.target.component
        ));
        result
            .affected_components
            .push(config.target.component.clone());
    }

    fn execute_power_failure(
        &self,
        _config: &FaultInjectionConfig,
        target: &FaultTarget,
        result: &mut FaultInjectionResult,
    ) {
        result
            .observed_effects
            .push(format!("power loss simulated for {}", target.component));
        result.affected_components.push(target.component.clone());
        // Power loss always endangers the patient, critical path or not.
        result
            .safety_violations
            .push("power failure endangers patient safety".to_string());
    }

    fn record(&self, result: FaultInjectionResult) {
        self.history.lock().unwrap().push(result.clone());

        let callbacks = self.callbacks.lock().unwrap();
        if let Some(cb) = callbacks.propagation.as_deref() {
            if let Err(e) = cb(&result) {
                error!("propagation callback failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn injector() -> FaultInjector {
        let _ = env_logger::builder().is_test(true).try_init();
        let inj = FaultInjector::with_seed(7);
        assert!(inj.initialize("bci-dut"));
        assert!(inj.configure_target(FaultTarget::new("signal_processor")));
        inj
    }

    fn timing_config() -> FaultInjectionConfig {
        let mut c =
            FaultInjectionConfig::new(FaultType::Timing, FaultTarget::new("signal_processor"));
        c.timing_fault.injected_delay = Duration::from_millis(1);
        c.timing_fault.jitter_amplitude = Duration::from_micros(100);
        c
    }

    #[test]
    fn uninitialized_injector_fails() {
        let inj = FaultInjector::new();
        let result = inj.inject_timing_fault(&timing_config());
        assert_eq!(result.status, InjectionStatus::Failed);
    }

    #[test]
    fn successful_timing_injection_records_effects() {
        let inj = injector();
        let result = inj.inject_timing_fault(&timing_config());
        assert_eq!(result.status, InjectionStatus::Success);
        assert!(!result.observed_effects.is_empty());
        assert!(result.recovery_time.is_some());
        assert!(result.system_impact_score > 0.0);
        assert_eq!(inj.get_injection_history().len(), 1);
    }

    #[test]
    fn unknown_target_is_target_not_found() {
        let inj = injector();
        let c = FaultInjectionConfig::new(FaultType::Timing, FaultTarget::new("stimulator"));
        let result = inj.inject_timing_fault(&c);
        assert_eq!(result.status, InjectionStatus::TargetNotFound);
    }

    #[test]
    fn excluded_function_is_never_injected() {
        let inj = injector();
        let mut c = timing_config();
        c.target = FaultTarget::new("signal_processor").function("emergency_stop");
        c.excluded_critical_functions.push("emergency_stop".into());

        let result = inj.inject_timing_fault(&c);
        assert_eq!(result.status, InjectionStatus::BlockedBySafety);
        assert_ne!(result.status, InjectionStatus::Success);
    }

    #[test]
    fn excessive_impact_request_is_blocked() {
        let inj = injector();
        let mut c = timing_config();
        c.max_system_impact = 0.7;
        // 0.7 passes config validation but exceeds the runtime bound.
        let result = inj.inject_timing_fault(&c);
        assert_eq!(result.status, InjectionStatus::BlockedBySafety);
    }

    #[test]
    fn safety_callback_veto_blocks() {
        let inj = injector();
        inj.register_safety_callback(Box::new(|_| Ok(false)));
        let result = inj.inject_timing_fault(&timing_config());
        assert_eq!(result.status, InjectionStatus::BlockedBySafety);
    }

    #[test]
    fn safety_callback_error_fails_closed() {
        let inj = injector();
        inj.register_safety_callback(Box::new(|_| {
            Err(InjectionError::SafetyCheck("monitor unreachable".into()))
        }));
        let result = inj.inject_timing_fault(&timing_config());
        assert_eq!(result.status, InjectionStatus::BlockedBySafety);
    }

    #[test]
    fn emergency_latch_blocks_everything() {
        let inj = injector();
        inj.inner.emergency_active.store(true, Ordering::SeqCst);
        let result = inj.inject_timing_fault(&timing_config());
        assert_eq!(result.status, InjectionStatus::BlockedBySafety);

        assert!(inj.reset_after_emergency());
        let result = inj.inject_timing_fault(&timing_config());
        assert_eq!(result.status, InjectionStatus::Success);
    }

    #[test]
    fn hardware_fault_on_critical_path_records_violation() {
        let inj = injector();
        inj.configure_target(FaultTarget::new("stim_driver").critical_path());
        let c = FaultInjectionConfig::new(
            FaultType::HardwareFailure,
            FaultTarget::new("stim_driver"),
        );
        let result = inj.inject_hardware_fault(&c);
        assert_eq!(result.status, InjectionStatus::Success);
        assert!(!result.safety_violations.is_empty());
    }

    #[test]
    fn power_failure_always_violates_safety() {
        let inj = injector();
        let c = FaultInjectionConfig::new(
            FaultType::PowerFailure,
            FaultTarget::new("signal_processor"),
        );
        let result = inj.inject_fault(&c);
        assert_eq!(result.status, InjectionStatus::Success);
        assert_eq!(
            result.safety_violations,
            vec!["power failure endangers patient safety".to_string()]
        );
    }

    #[test]
    fn propagation_callback_sees_every_result() {
        let inj = injector();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        inj.register_propagation_callback(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        inj.inject_timing_fault(&timing_config());
        let c = FaultInjectionConfig::new(FaultType::Timing, FaultTarget::new("missing"));
        inj.inject_timing_fault(&c);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn statistics_aggregate_history() {
        let inj = injector();
        inj.inject_timing_fault(&timing_config());
        let c = FaultInjectionConfig::new(FaultType::Timing, FaultTarget::new("missing"));
        inj.inject_timing_fault(&c);

        let stats = inj.get_statistics();
        assert_eq!(stats.total_injections, 2);
        assert_eq!(stats.successful, 1);
        assert!(stats.average_impact > 0.0);
    }

    #[test]
    fn seeded_injectors_sample_identical_jitter() {
        let a = FaultInjector::with_seed(99);
        let b = FaultInjector::with_seed(99);
        for inj in [&a, &b] {
            inj.initialize("dut");
            inj.configure_target(FaultTarget::new("signal_processor"));
        }

        let ra = a.inject_timing_fault(&timing_config());
        let rb = b.inject_timing_fault(&timing_config());
        assert_eq!(ra.observed_effects, rb.observed_effects);
    }
}
