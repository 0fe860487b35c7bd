//! Fault definitions: the kinds of faults that can be injected into a
//! BCI device under test, their configuration, and the injection result
//! record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// The kinds of fault the injector can introduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    /// Delay, jitter, or deadline-violation faults.
    Timing,
    /// Corruption of data in flight or at rest.
    DataCorruption,
    /// Packet-level communication faults.
    Communication,
    /// Simulated component hardware failure.
    HardwareFailure,
    /// Memory, CPU, or handle exhaustion.
    ResourceExhaustion,
    /// Loss of supply power.
    PowerFailure,
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultType::Timing => "timing",
            FaultType::DataCorruption => "data-corruption",
            FaultType::Communication => "communication",
            FaultType::HardwareFailure => "hardware-failure",
            FaultType::ResourceExhaustion => "resource-exhaustion",
            FaultType::PowerFailure => "power-failure",
        };
        write!(f, "{s}")
    }
}

/// When a fault fires relative to the injection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionTiming {
    Immediate,
    Delayed,
    Periodic,
    Conditional,
}

/// Where a fault lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultTarget {
    /// Component under test, e.g. `"signal_processor"`.
    pub component: String,
    /// Optional function within the component.
    pub function: Option<String>,
    /// Free-form parameters for the executor.
    pub parameters: Vec<String>,
    /// Optional memory address range for corruption faults.
    pub address_range: Option<(u64, u64)>,
    /// True when the target sits on a patient-critical path.
    pub is_critical_path: bool,
}

impl FaultTarget {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            function: None,
            parameters: Vec::new(),
            address_range: None,
            is_critical_path: false,
        }
    }

    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn critical_path(mut self) -> Self {
        self.is_critical_path = true;
        self
    }
}

/// Parameters for timing faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingFaultConfig {
    /// Delay added to the targeted operation.
    pub injected_delay: Duration,
    /// Amplitude of the signed jitter sampled per injection.
    pub jitter_amplitude: Duration,
    /// Multiplier applied to the task deadline to provoke misses.
    pub deadline_violation_factor: f64,
    /// Whether the fault should present as an operation timeout.
    pub cause_timeout: bool,
}

impl Default for TimingFaultConfig {
    fn default() -> Self {
        Self {
            injected_delay: Duration::from_millis(10),
            jitter_amplitude: Duration::from_millis(1),
            deadline_violation_factor: 1.5,
            cause_timeout: false,
        }
    }
}

/// How data corruption is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorruptionType {
    BitFlip,
    ValueRange,
    PatternCorruption,
    ChecksumViolation,
}

/// Parameters for data-corruption faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCorruptionConfig {
    pub corruption_type: CorruptionType,
    /// Bit positions for [`CorruptionType::BitFlip`].
    pub bit_positions: Vec<u8>,
    /// Per-access corruption probability.
    pub probability: f64,
    /// Pattern bytes for [`CorruptionType::PatternCorruption`].
    pub pattern: Vec<u8>,
}

impl Default for DataCorruptionConfig {
    fn default() -> Self {
        Self {
            corruption_type: CorruptionType::BitFlip,
            bit_positions: vec![0],
            probability: 1.0,
            pattern: Vec::new(),
        }
    }
}

/// Packet-level fault kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommFaultKind {
    PacketLoss,
    PacketDelay,
    PacketCorruption,
    DuplicatePackets,
    ReorderPackets,
}

/// Parameters for communication faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommFaultConfig {
    pub kind: CommFaultKind,
    /// Per-packet probability of the fault applying.
    pub probability: f64,
    /// Delay applied for [`CommFaultKind::PacketDelay`].
    pub delay_range: Duration,
    /// Upper bound on affected packet size.
    pub max_packet_size: usize,
}

impl Default for CommFaultConfig {
    fn default() -> Self {
        Self {
            kind: CommFaultKind::PacketLoss,
            probability: 0.1,
            delay_range: Duration::from_millis(5),
            max_packet_size: 1500,
        }
    }
}

/// Full configuration for a single injection (or one campaign step).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    pub fault_type: FaultType,
    pub target: FaultTarget,
    pub timing: InjectionTiming,
    /// Delay before the fault fires.
    pub injection_delay: Duration,
    /// Spacing between campaign steps.
    pub injection_period: Duration,
    /// Cap on repeated injections of this config.
    pub max_injections: u32,
    /// Whether the injector records an automatic recovery point.
    pub auto_recovery: bool,
    pub recovery_timeout: Duration,
    pub timing_fault: TimingFaultConfig,
    pub data_corruption: DataCorruptionConfig,
    pub comm_fault: CommFaultConfig,
    /// When false, safety pre-checks are skipped entirely.
    pub respect_safety_constraints: bool,
    /// Functions that must never receive a fault.
    pub excluded_critical_functions: Vec<String>,
    /// Maximum tolerated system impact, as a fraction.
    pub max_system_impact: f64,
}

impl FaultInjectionConfig {
    pub fn new(fault_type: FaultType, target: FaultTarget) -> Self {
        Self {
            fault_type,
            target,
            timing: InjectionTiming::Immediate,
            injection_delay: Duration::ZERO,
            injection_period: Duration::from_millis(100),
            max_injections: 1,
            auto_recovery: true,
            recovery_timeout: Duration::from_secs(1),
            timing_fault: TimingFaultConfig::default(),
            data_corruption: DataCorruptionConfig::default(),
            comm_fault: CommFaultConfig::default(),
            respect_safety_constraints: true,
            excluded_critical_functions: Vec::new(),
            max_system_impact: 0.1,
        }
    }
}

/// Outcome category of one injection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionStatus {
    Success,
    Failed,
    BlockedBySafety,
    TargetNotFound,
    Timeout,
}

impl fmt::Display for InjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InjectionStatus::Success => "SUCCESS",
            InjectionStatus::Failed => "FAILED",
            InjectionStatus::BlockedBySafety => "BLOCKED_BY_SAFETY",
            InjectionStatus::TargetNotFound => "TARGET_NOT_FOUND",
            InjectionStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{s}")
    }
}

/// Record of one injection attempt and everything observed around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultInjectionResult {
    pub status: InjectionStatus,
    pub description: String,
    pub injection_time: SystemTime,
    pub recovery_time: Option<SystemTime>,
    pub observed_effects: Vec<String>,
    pub safety_violations: Vec<String>,
    pub affected_components: Vec<String>,
    pub propagation_path: Vec<String>,
    /// Post-hoc impact estimate, see [`impact_score`].
    pub system_impact_score: f64,
}

impl FaultInjectionResult {
    pub(crate) fn new(status: InjectionStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
            injection_time: SystemTime::now(),
            recovery_time: None,
            observed_effects: Vec::new(),
            safety_violations: Vec::new(),
            affected_components: Vec::new(),
            propagation_path: Vec::new(),
            system_impact_score: 0.0,
        }
    }
}

/// Validate a fault configuration before use.
///
/// Requires a non-empty target component, a positive injection cap,
/// and an impact fraction within [0, 1].
pub fn validate_fault_config(config: &FaultInjectionConfig) -> bool {
    !config.target.component.is_empty()
        && config.max_injections > 0
        && (0.0..=1.0).contains(&config.max_system_impact)
}

/// Estimate the system impact of a completed injection.
///
/// Status contributes a base score, each observed effect adds 0.1 and
/// each safety violation 0.3; the result is clamped to [0, 1].
pub fn impact_score(result: &FaultInjectionResult) -> f64 {
    let base = match result.status {
        InjectionStatus::Success => 0.1,
        InjectionStatus::Failed => 0.3,
        InjectionStatus::Timeout => 0.5,
        _ => 0.2,
    };

    let score = base
        + 0.1 * result.observed_effects.len() as f64
        + 0.3 * result.safety_violations.len() as f64;
    score.clamp(0.0, 1.0)
}
