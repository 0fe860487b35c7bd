//! Statistics over timing samples: percentiles, outliers, and the
//! aggregate per-task summary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregate statistics for one task's execution-time history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStatistics {
    pub sample_count: usize,
    pub min_execution_time: Duration,
    pub max_execution_time: Duration,
    pub avg_execution_time: Duration,
    /// Population standard deviation.
    pub std_deviation: Duration,
    pub wcet_estimate: Duration,
    pub deadline_miss_rate: f64,
    /// Standard deviation over mean; dimensionless spread measure.
    pub jitter_coefficient: f64,
    /// [p95, p99, p99.9] execution-time percentiles.
    pub percentiles: [Duration; 3],
}

/// Nearest-rank percentile over unsorted samples.
///
/// Empty input yields zero.  The rank is `floor(p * (n - 1))` into the
/// sorted samples, so `p = 0.0` is the minimum, `p = 1.0` the maximum,
/// and `p = 0.5` over an odd-length slice is the exact median.
pub fn calculate_percentile(samples: &[Duration], percentile: f64) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let p = percentile.clamp(0.0, 1.0);
    let index = (p * (sorted.len() - 1) as f64).floor() as usize;
    sorted[index]
}

/// Flag outliers by Z-score against the sample mean.
///
/// Returns one flag per sample, in order, without mutating anything.
/// Fewer than 3 samples (or zero spread) flags nothing.
pub fn detect_outliers(samples: &[Duration], threshold: f64) -> Vec<bool> {
    if samples.len() < 3 {
        return vec![false; samples.len()];
    }

    let values: Vec<f64> = samples.iter().map(|d| d.as_secs_f64()).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return vec![false; samples.len()];
    }

    values
        .iter()
        .map(|v| ((v - mean) / std_dev).abs() > threshold)
        .collect()
}

/// Default Z-score threshold for [`detect_outliers`].
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;

/// Compute the full statistics block over execution-time samples.
///
/// `deadline_misses` is the miss count over the same samples.
pub fn compute_statistics(samples: &[Duration], deadline_misses: usize) -> PerformanceStatistics {
    if samples.is_empty() {
        return PerformanceStatistics::default();
    }

    let n = samples.len();
    let min = samples.iter().min().copied().unwrap_or_default();
    let max = samples.iter().max().copied().unwrap_or_default();
    let total: Duration = samples.iter().sum();
    let avg = total / n as u32;

    let mean_s = avg.as_secs_f64();
    let variance = samples
        .iter()
        .map(|d| (d.as_secs_f64() - mean_s).powi(2))
        .sum::<f64>()
        / n as f64;
    let std_dev = Duration::from_secs_f64(variance.sqrt());

    let jitter_coefficient = if mean_s > 0.0 {
        std_dev.as_secs_f64() / mean_s
    } else {
        0.0
    };

    PerformanceStatistics {
        sample_count: n,
        min_execution_time: min,
        max_execution_time: max,
        avg_execution_time: avg,
        std_deviation: std_dev,
        wcet_estimate: calculate_percentile(samples, 0.999),
        deadline_miss_rate: deadline_misses as f64 / n as f64,
        jitter_coefficient,
        percentiles: [
            calculate_percentile(samples, 0.95),
            calculate_percentile(samples, 0.99),
            calculate_percentile(samples, 0.999),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(calculate_percentile(&[], 0.95), Duration::ZERO);
    }

    #[test]
    fn percentile_endpoints() {
        let samples = vec![ms(5), ms(1), ms(3), ms(2), ms(4)];
        assert_eq!(calculate_percentile(&samples, 0.0), ms(1));
        assert_eq!(calculate_percentile(&samples, 1.0), ms(5));
    }

    #[test]
    fn median_of_odd_length_is_the_middle_element() {
        let samples = vec![ms(9), ms(1), ms(5), ms(7), ms(3)];
        assert_eq!(calculate_percentile(&samples, 0.5), ms(5));
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let samples: Vec<Duration> = (1..=100).map(ms).collect();
        // floor(0.95 * 99) = 94, sorted[94] = 95 ms.
        assert_eq!(calculate_percentile(&samples, 0.95), ms(95));
    }

    #[test]
    fn outliers_need_at_least_three_samples() {
        assert_eq!(detect_outliers(&[ms(1), ms(1000)], 3.0), vec![false, false]);
    }

    #[test]
    fn zero_spread_flags_nothing() {
        let samples = vec![ms(5); 10];
        assert!(detect_outliers(&samples, 3.0).iter().all(|f| !f));
    }

    #[test]
    fn spike_is_flagged_as_outlier() {
        let mut samples = vec![ms(10); 30];
        samples.push(ms(500));
        let flags = detect_outliers(&samples, DEFAULT_OUTLIER_THRESHOLD);
        assert!(flags[30]);
        assert!(flags[..30].iter().all(|f| !f));
    }

    #[test]
    fn statistics_over_uniform_samples() {
        let stats = compute_statistics(&[ms(10); 5], 0);
        assert_eq!(stats.sample_count, 5);
        assert_eq!(stats.min_execution_time, ms(10));
        assert_eq!(stats.max_execution_time, ms(10));
        assert_eq!(stats.avg_execution_time, ms(10));
        assert_eq!(stats.std_deviation, Duration::ZERO);
        assert_eq!(stats.deadline_miss_rate, 0.0);
        assert_eq!(stats.jitter_coefficient, 0.0);
    }

    #[test]
    fn miss_rate_is_fractional() {
        let stats = compute_statistics(&[ms(10); 4], 1);
        assert!((stats.deadline_miss_rate - 0.25).abs() < f64::EPSILON);
    }
}
