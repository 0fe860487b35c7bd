//! The timing analyzer: measurement collection and deadline
//! verification for real-time BCI tasks.
//!
//! Measurements are opened with [`TimingAnalyzer::start_measurement`]
//! and closed with [`TimingAnalyzer::stop_measurement`]; the pair is
//! cheap enough to wrap individual signal-processing steps.  Invalid
//! and unknown measurement ids come back as sentinel records rather
//! than errors so instrumentation code can stay branch-free.

use crate::constraint::{is_safety_violation, validate_timing_constraint, TimingConstraint};
use crate::stats::{
    calculate_percentile, compute_statistics, detect_outliers, PerformanceStatistics,
    DEFAULT_OUTLIER_THRESHOLD,
};
use log::{error, info, warn};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

/// Default bound on retained measurements per task.
pub const DEFAULT_HISTORY_CAPACITY: usize = 4096;

/// Errors surfaced by analyzer callbacks.
#[derive(Error, Debug)]
pub enum TimingError {
    #[error("timing verification failed: {0}")]
    Verification(String),
}

/// Consulted when a critical-path task overruns its deadline margin.
/// `Ok(true)` accepts the overrun; `Ok(false)` or `Err` keeps it
/// flagged.
pub type VerificationCallback =
    Box<dyn Fn(&TimingMeasurement) -> Result<bool, TimingError> + Send + Sync>;

/// One completed measurement.
#[derive(Debug, Clone)]
pub struct TimingMeasurement {
    /// Task name, or the sentinel `"INVALID"` / `"NOT_FOUND"`.
    pub task_name: String,
    pub start: Instant,
    pub end: Instant,
    pub execution_time: Duration,
    /// Max deviation of inter-arrival times from their mean.
    pub jitter: Duration,
    pub deadline_met: bool,
    pub is_outlier: bool,
}

impl TimingMeasurement {
    fn sentinel(name: &str) -> Self {
        let now = Instant::now();
        Self {
            task_name: name.to_string(),
            start: now,
            end: now,
            execution_time: Duration::ZERO,
            jitter: Duration::ZERO,
            deadline_met: false,
            is_outlier: false,
        }
    }
}

/// Full timing report across all measured tasks.
#[derive(Debug, Clone)]
pub struct TimingReport {
    pub timestamp: SystemTime,
    pub task_statistics: BTreeMap<String, PerformanceStatistics>,
    pub all_constraints_met: bool,
    /// Mean over tasks of (1 - deadline miss rate).
    pub utilization_score: f64,
    pub recommendations: String,
}

struct ActiveMeasurement {
    task_name: String,
    start: Instant,
    thread: ThreadId,
}

/// Timing measurement and deadline analysis.
pub struct TimingAnalyzer {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, ActiveMeasurement>>,
    history: Mutex<BTreeMap<String, VecDeque<TimingMeasurement>>>,
    constraints: Mutex<BTreeMap<String, TimingConstraint>>,
    verification: Mutex<Option<VerificationCallback>>,
    history_capacity: usize,
}

impl TimingAnalyzer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Analyzer retaining at most `capacity` measurements per task.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(BTreeMap::new()),
            constraints: Mutex::new(BTreeMap::new()),
            verification: Mutex::new(None),
            history_capacity: capacity.max(1),
        }
    }

    /// Register (or replace by name) a timing constraint.
    pub fn register_constraint(&self, constraint: TimingConstraint) -> bool {
        if !validate_timing_constraint(&constraint) {
            error!("invalid timing constraint: {}", constraint.name);
            return false;
        }

        info!("registered timing constraint: {}", constraint.name);
        self.constraints
            .lock()
            .unwrap()
            .insert(constraint.name.clone(), constraint);
        true
    }

    /// Consulted on critical-path overruns; see [`VerificationCallback`].
    pub fn register_verification_callback(&self, callback: VerificationCallback) {
        *self.verification.lock().unwrap() = Some(callback);
        info!("timing verification callback registered");
    }

    /// Open a measurement.  Ids are non-zero and strictly increasing.
    pub fn start_measurement(&self, task_name: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().unwrap().insert(
            id,
            ActiveMeasurement {
                task_name: task_name.to_string(),
                start: Instant::now(),
                thread: std::thread::current().id(),
            },
        );
        id
    }

    /// Close a measurement and append it to the task history.
    ///
    /// Id 0 yields the `"INVALID"` sentinel; an unknown id yields
    /// `"NOT_FOUND"`.  Stopping from a different thread than the one
    /// that started the measurement is tolerated with a warning.
    pub fn stop_measurement(&self, id: u64) -> TimingMeasurement {
        let end = Instant::now();

        if id == 0 {
            warn!("stop_measurement called with invalid id 0");
            return TimingMeasurement::sentinel("INVALID");
        }

        let active = self.active.lock().unwrap().remove(&id);
        let Some(active) = active else {
            warn!("stop_measurement: unknown measurement id {id}");
            return TimingMeasurement::sentinel("NOT_FOUND");
        };

        if active.thread != std::thread::current().id() {
            warn!(
                "measurement {id} for task {} stopped on a different thread",
                active.task_name
            );
        }

        let execution_time = end.duration_since(active.start);
        let mut measurement = TimingMeasurement {
            task_name: active.task_name.clone(),
            start: active.start,
            end,
            execution_time,
            jitter: Duration::ZERO,
            deadline_met: true,
            is_outlier: false,
        };

        let constraint = self
            .constraints
            .lock()
            .unwrap()
            .get(&active.task_name)
            .cloned();

        {
            let history = self.history.lock().unwrap();
            if let Some(entries) = history.get(&active.task_name) {
                measurement.jitter = jitter_with(entries, active.start);

                let mut samples: Vec<Duration> =
                    entries.iter().map(|m| m.execution_time).collect();
                samples.push(execution_time);
                if let Some(flag) =
                    detect_outliers(&samples, DEFAULT_OUTLIER_THRESHOLD).last()
                {
                    measurement.is_outlier = *flag;
                }
            }
        }

        if let Some(constraint) = &constraint {
            measurement.deadline_met = execution_time <= constraint.deadline;
            if !measurement.deadline_met {
                warn!(
                    "deadline miss: task {} ran {:?} against deadline {:?}",
                    active.task_name, execution_time, constraint.deadline
                );
            }
            self.check_safety(&measurement, constraint);
        }

        let mut history = self.history.lock().unwrap();
        let entries = history.entry(active.task_name).or_default();
        if entries.len() == self.history_capacity {
            entries.pop_front();
        }
        entries.push_back(measurement.clone());

        measurement
    }

    /// Critical-path tasks past 1.1x their deadline are flagged unless
    /// the verification callback accepts the overrun.
    fn check_safety(&self, measurement: &TimingMeasurement, constraint: &TimingConstraint) {
        if !constraint.is_critical_path
            || measurement.execution_time <= constraint.deadline.mul_f64(1.1)
        {
            return;
        }

        let verification = self.verification.lock().unwrap();
        let accepted = match verification.as_deref() {
            Some(cb) => match cb(measurement) {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("timing verification callback failed: {e}");
                    false
                }
            },
            None => false,
        };

        if !accepted {
            error!(
                "TIMING SAFETY VIOLATION: critical task {} ran {:?}",
                measurement.task_name, measurement.execution_time
            );
        }

        if is_safety_violation(measurement, constraint) {
            warn!(
                "measurement of {} violates safety margins",
                measurement.task_name
            );
        }
    }

    /// Run `f` under measurement.  The measurement is finalized even
    /// when `f` panics; the panic then propagates unchanged.
    pub fn measure_execution<F, R>(&self, task_name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let id = self.start_measurement(task_name);
        let outcome = catch_unwind(AssertUnwindSafe(f));
        self.stop_measurement(id);
        match outcome {
            Ok(value) => value,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Statistics over a task's retained history.
    pub fn calculate_statistics(&self, task_name: &str) -> PerformanceStatistics {
        let history = self.history.lock().unwrap();
        let Some(entries) = history.get(task_name) else {
            return PerformanceStatistics::default();
        };

        let samples: Vec<Duration> = entries.iter().map(|m| m.execution_time).collect();
        let misses = entries.iter().filter(|m| !m.deadline_met).count();
        compute_statistics(&samples, misses)
    }

    /// Deadline compliance over measurements younger than `window`.
    /// No measurements in the window counts as full compliance.
    pub fn analyze_deadline_compliance(&self, window: Duration) -> f64 {
        let now = Instant::now();
        let history = self.history.lock().unwrap();

        let mut total = 0usize;
        let mut met = 0usize;
        for entries in history.values() {
            for m in entries.iter().rev() {
                if now.duration_since(m.end) > window {
                    break;
                }
                total += 1;
                if m.deadline_met {
                    met += 1;
                }
            }
        }

        if total == 0 {
            1.0
        } else {
            met as f64 / total as f64
        }
    }

    /// Jitter over the last `n` measurements of a task.
    pub fn measure_jitter(&self, task_name: &str, n: usize) -> Duration {
        let history = self.history.lock().unwrap();
        let Some(entries) = history.get(task_name) else {
            return Duration::ZERO;
        };

        let skip = entries.len().saturating_sub(n);
        let starts: Vec<Instant> = entries.iter().skip(skip).map(|m| m.start).collect();
        jitter_of(&starts)
    }

    /// WCET estimate as the execution-time percentile at `confidence`.
    pub fn estimate_wcet(&self, task_name: &str, confidence: f64) -> Duration {
        let history = self.history.lock().unwrap();
        let Some(entries) = history.get(task_name) else {
            return Duration::ZERO;
        };

        let samples: Vec<Duration> = entries.iter().map(|m| m.execution_time).collect();
        calculate_percentile(&samples, confidence)
    }

    /// Check every registered constraint against recent history.
    ///
    /// Per constraint, the miss rate over the last min(len, 100)
    /// measurements must stay within its threshold.  Tasks without
    /// measurements pass.
    pub fn verify_timing_constraints(&self) -> bool {
        let constraints = self.constraints.lock().unwrap();
        let history = self.history.lock().unwrap();

        let mut all_met = true;
        for constraint in constraints.values() {
            let Some(entries) = history.get(&constraint.name) else {
                continue;
            };
            if entries.is_empty() {
                continue;
            }

            let window = entries.len().min(100);
            let recent = entries.iter().rev().take(window);
            let misses = recent.filter(|m| !m.deadline_met).count();
            let miss_rate = misses as f64 / window as f64;

            if miss_rate > constraint.deadline_miss_threshold {
                warn!(
                    "constraint {} violated: miss rate {:.4} over {} samples",
                    constraint.name, miss_rate, window
                );
                all_met = false;
            }
        }

        all_met
    }

    /// Full report over all measured tasks.
    pub fn generate_report(&self) -> TimingReport {
        let task_names: Vec<String> = self.history.lock().unwrap().keys().cloned().collect();

        let mut task_statistics = BTreeMap::new();
        let mut compliance_sum = 0.0;
        for name in &task_names {
            let stats = self.calculate_statistics(name);
            compliance_sum += 1.0 - stats.deadline_miss_rate;
            task_statistics.insert(name.clone(), stats);
        }

        let utilization_score = if task_names.is_empty() {
            1.0
        } else {
            compliance_sum / task_names.len() as f64
        };
        let all_constraints_met = self.verify_timing_constraints();

        let recommendations = if all_constraints_met {
            "All timing constraints satisfied.".to_string()
        } else {
            let worst = task_statistics
                .iter()
                .max_by(|a, b| {
                    a.1.deadline_miss_rate
                        .partial_cmp(&b.1.deadline_miss_rate)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(name, _)| name.clone())
                .unwrap_or_default();
            format!("Review scheduling of task {worst}: deadline misses exceed its threshold.")
        };

        TimingReport {
            timestamp: SystemTime::now(),
            task_statistics,
            all_constraints_met,
            utilization_score,
            recommendations,
        }
    }

    /// Drop all retained measurements.  Constraints stay registered.
    pub fn clear_measurements(&self) {
        self.history.lock().unwrap().clear();
        self.active.lock().unwrap().clear();
        info!("timing measurement history cleared");
    }
}

impl Default for TimingAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn jitter_with(entries: &VecDeque<TimingMeasurement>, new_start: Instant) -> Duration {
    let mut starts: Vec<Instant> = entries.iter().map(|m| m.start).collect();
    starts.push(new_start);
    jitter_of(&starts)
}

/// Max deviation of consecutive inter-arrival times from their mean.
/// Fewer than two intervals yields zero.
fn jitter_of(starts: &[Instant]) -> Duration {
    if starts.len() < 3 {
        return Duration::ZERO;
    }

    let intervals: Vec<f64> = starts
        .windows(2)
        .map(|w| w[1].duration_since(w[0]).as_secs_f64())
        .collect();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let max_dev = intervals
        .iter()
        .map(|i| (i - mean).abs())
        .fold(0.0, f64::max);
    Duration::from_secs_f64(max_dev)
}
