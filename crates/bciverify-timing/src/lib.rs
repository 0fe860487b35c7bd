//! Real-time timing measurement and deadline analysis for BCI tasks.
//!
//! The [`TimingAnalyzer`] records per-task execution times into
//! bounded histories, checks them against registered
//! [`TimingConstraint`]s, and derives worst-case estimates,
//! percentiles, jitter, and compliance reports.

pub mod analyzer;
pub mod constraint;
pub mod stats;

pub use analyzer::{
    TimingAnalyzer, TimingError, TimingMeasurement, TimingReport, VerificationCallback,
    DEFAULT_HISTORY_CAPACITY,
};
pub use constraint::{is_safety_violation, validate_timing_constraint, TimingConstraint};
pub use stats::{
    calculate_percentile, detect_outliers, PerformanceStatistics, DEFAULT_OUTLIER_THRESHOLD,
};
