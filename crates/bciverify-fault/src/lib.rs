//! Controlled fault injection for BCI device verification.
//!
//! The [`FaultInjector`] delivers timing, data-corruption,
//! communication, hardware, resource, and power faults to configured
//! targets, with every injection gated by safety pre-checks and
//! recorded in an auditable history.  Campaigns run a whole fault list
//! sequentially on a worker thread.
//!
//! Jitter and probability sampling uses a seeded ChaCha20 RNG so a
//! campaign can be replayed bit-for-bit.

pub mod campaign;
pub mod faults;
pub mod injector;

pub use faults::{
    impact_score, validate_fault_config, CommFaultConfig, CommFaultKind, CorruptionType,
    DataCorruptionConfig, FaultInjectionConfig, FaultInjectionResult, FaultTarget, FaultType,
    InjectionStatus, InjectionTiming, TimingFaultConfig,
};
pub use injector::{
    FaultInjector, InjectionError, InjectionStatistics, PropagationCallback, SafetyCheckCallback,
};
