//! Streaming anomaly detection over per-metric sliding windows
//!
//! Three interchangeable detectors share one output shape:
//! - z-score: distance from the window mean in standard deviations
//! - IQR: distance outside the Tukey fences
//! - isolation: distance from the mean relative to the largest distance seen

use std::collections::{HashMap, VecDeque};

use crate::config::AnomalyConfig;
use crate::models::{metric_key, Anomaly, AnomalyAlgorithm, ExpectedRange, Severity};
use crate::stats::{mean, quartiles, std_dev};

/// Minimum std dev / spread to consider a window non-degenerate
const EPSILON: f64 = 1e-9;

/// Deviation above which a z-score anomaly is `high`
const ZSCORE_HIGH: f64 = 3.0;
/// IQR multiples defining the inner and outer fences
const IQR_FENCE: f64 = 1.5;
const IQR_FENCE_HIGH: f64 = 3.0;
/// Isolation score cutoffs
const ISOLATION_FLAG: f64 = 0.7;
const ISOLATION_HIGH: f64 = 0.9;

/// Common result of every detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyVerdict {
    pub expected_range: ExpectedRange,
    pub deviation: f64,
    pub severity: Severity,
}

pub fn zscore(window: &[f64], value: f64, threshold: f64) -> Option<AnomalyVerdict> {
    let m = mean(window);
    let sd = std_dev(window);
    if sd < EPSILON {
        return None;
    }
    let deviation = (value - m).abs() / sd;
    if deviation <= threshold {
        return None;
    }
    Some(AnomalyVerdict {
        expected_range: ExpectedRange {
            low: m - threshold * sd,
            high: m + threshold * sd,
        },
        deviation,
        severity: if deviation > ZSCORE_HIGH {
            Severity::High
        } else {
            Severity::Medium
        },
    })
}

/// Deviation is reported in IQR multiples beyond the nearest quartile
pub fn iqr(window: &[f64], value: f64) -> Option<AnomalyVerdict> {
    let (q1, q3) = quartiles(window);
    let spread = q3 - q1;
    if spread < EPSILON {
        return None;
    }
    let low = q1 - IQR_FENCE * spread;
    let high = q3 + IQR_FENCE * spread;
    if value >= low && value <= high {
        return None;
    }
    let deviation = if value > q3 {
        (value - q3) / spread
    } else {
        (q1 - value) / spread
    };
    Some(AnomalyVerdict {
        expected_range: ExpectedRange { low, high },
        deviation,
        severity: if deviation > IQR_FENCE_HIGH {
            Severity::High
        } else {
            Severity::Medium
        },
    })
}

/// Simplified isolation score: `|value - mean| / max |v - mean|`, where the
/// maximum runs over the window and the value itself
pub fn isolation(window: &[f64], value: f64) -> Option<AnomalyVerdict> {
    let m = mean(window);
    let max_distance = window
        .iter()
        .chain(std::iter::once(&value))
        .map(|v| (v - m).abs())
        .fold(0.0_f64, f64::max);
    if max_distance < EPSILON {
        return None;
    }
    let score = (value - m).abs() / max_distance;
    if score <= ISOLATION_FLAG {
        return None;
    }
    Some(AnomalyVerdict {
        expected_range: ExpectedRange {
            low: m - ISOLATION_FLAG * max_distance,
            high: m + ISOLATION_FLAG * max_distance,
        },
        deviation: score,
        severity: if score > ISOLATION_HIGH {
            Severity::High
        } else {
            Severity::Medium
        },
    })
}

pub fn evaluate(
    algorithm: AnomalyAlgorithm,
    window: &[f64],
    value: f64,
    threshold: f64,
) -> Option<AnomalyVerdict> {
    match algorithm {
        AnomalyAlgorithm::ZScore => zscore(window, value, threshold),
        AnomalyAlgorithm::Iqr => iqr(window, value),
        AnomalyAlgorithm::Isolation => isolation(window, value),
    }
}

/// Sliding windows keyed by `source.metric`
pub struct AnomalyDetector {
    config: AnomalyConfig,
    windows: HashMap<String, VecDeque<f64>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn algorithm(&self) -> AnomalyAlgorithm {
        self.config.algorithm
    }

    /// Evaluate `value` against the metric's window, then append it.
    /// Nothing is flagged until the window holds `min_samples` values.
    pub fn observe(
        &mut self,
        source: &str,
        metric: &str,
        timestamp: i64,
        value: f64,
    ) -> Option<Anomaly> {
        let window_size = self.config.window_size.max(1);
        let window = self
            .windows
            .entry(metric_key(source, metric))
            .or_default();

        let anomaly = if window.len() >= self.config.min_samples {
            let samples = window.make_contiguous();
            evaluate(self.config.algorithm, samples, value, self.config.threshold).map(|verdict| {
                Anomaly {
                    timestamp,
                    source: source.to_string(),
                    metric: metric.to_string(),
                    value,
                    expected_range: verdict.expected_range,
                    deviation_score: verdict.deviation,
                    severity: verdict.severity,
                    algorithm: self.config.algorithm,
                }
            })
        } else {
            None
        };

        window.push_back(value);
        while window.len() > window_size {
            window.pop_front();
        }
        anomaly
    }

    /// Replay a historical series through a fresh detector
    pub fn scan(
        config: &AnomalyConfig,
        source: &str,
        metric: &str,
        points: &[(i64, f64)],
    ) -> Vec<Anomaly> {
        let mut detector = AnomalyDetector::new(config.clone());
        points
            .iter()
            .filter_map(|(timestamp, value)| detector.observe(source, metric, *timestamp, *value))
            .collect()
    }

    pub fn tracked_metrics(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATTERN: [f64; 5] = [-1.0, -0.5, 0.0, 0.5, 1.0];

    fn normal(i: usize) -> f64 {
        50.0 + 2.0 * PATTERN[i % PATTERN.len()]
    }

    /// Deterministic N(mean, sd) samples: Box-Muller over a 64-bit LCG
    fn gaussian(seed: u64, n: usize, mean: f64, sd: f64) -> Vec<f64> {
        let mut state = seed;
        let mut uniform = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        (0..n)
            .map(|_| {
                let u1 = 1.0 - uniform();
                let u2 = uniform();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                mean + sd * z
            })
            .collect()
    }

    fn config(algorithm: AnomalyAlgorithm) -> AnomalyConfig {
        AnomalyConfig {
            algorithm,
            ..AnomalyConfig::default()
        }
    }

    #[test]
    fn test_zscore_flags_only_the_outlier() {
        let mut detector = AnomalyDetector::new(config(AnomalyAlgorithm::ZScore));
        let mut history = Vec::new();
        let mut anomalies = Vec::new();

        // Seeded so no ordinary sample strays past 2σ of its window
        let samples = gaussian(34, 79, 50.0, 2.0);
        for (i, &v) in samples[..40].iter().enumerate() {
            history.push(v);
            anomalies.extend(detector.observe("system", "cpu_usage", i as i64, v));
        }

        let outlier = mean(&history) + 5.0 * std_dev(&history);
        anomalies.extend(detector.observe("system", "cpu_usage", 40, outlier));

        for (i, &v) in samples[40..].iter().enumerate() {
            anomalies.extend(detector.observe("system", "cpu_usage", 41 + i as i64, v));
        }

        assert_eq!(anomalies.len(), 1);
        let anomaly = &anomalies[0];
        assert_eq!(anomaly.value, outlier);
        assert_eq!(anomaly.timestamp, 40);
        assert_eq!(anomaly.severity, Severity::High);
        assert_eq!(anomaly.algorithm, AnomalyAlgorithm::ZScore);
        assert!(anomaly.deviation_score > 4.5);
        assert!(anomaly.expected_range.high < outlier);
    }

    #[test]
    fn test_nothing_flagged_before_min_samples() {
        let mut detector = AnomalyDetector::new(config(AnomalyAlgorithm::ZScore));
        for i in 0..10 {
            assert!(detector.observe("system", "cpu_usage", i, normal(i as usize)).is_none());
        }
        assert!(detector.observe("system", "cpu_usage", 10, 10_000.0).is_none());
    }

    #[test]
    fn test_constant_window_is_not_anomalous() {
        let window = vec![5.0; 30];
        assert!(zscore(&window, 5.0, 2.5).is_none());
        assert!(iqr(&window, 6.0).is_none());
        assert!(isolation(&window, 5.0).is_none());
    }

    #[test]
    fn test_iqr_fences() {
        let window: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        // Q1 = 5.75, Q3 = 15.25, IQR = 9.5
        assert!(iqr(&window, 20.0).is_none());
        let medium = iqr(&window, 35.0).unwrap();
        assert_eq!(medium.severity, Severity::Medium);
        assert!((medium.expected_range.high - 29.5).abs() < 1e-9);
        let high = iqr(&window, 60.0).unwrap();
        assert_eq!(high.severity, Severity::High);
        assert!(iqr(&window, -20.0).is_some());
    }

    #[test]
    fn test_isolation_score() {
        let window: Vec<f64> = (0..30).map(normal).collect();
        assert!(isolation(&window, 50.5).is_none());
        let verdict = isolation(&window, 80.0).unwrap();
        assert_eq!(verdict.severity, Severity::High);
        assert!((verdict.deviation - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_algorithms_share_output_shape() {
        let window: Vec<f64> = (0..40).map(normal).collect();
        for algorithm in [
            AnomalyAlgorithm::ZScore,
            AnomalyAlgorithm::Iqr,
            AnomalyAlgorithm::Isolation,
        ] {
            let verdict = evaluate(algorithm, &window, 500.0, 2.5).unwrap();
            assert!(verdict.expected_range.low < verdict.expected_range.high);
            assert_eq!(verdict.severity, Severity::High);
        }
    }

    #[test]
    fn test_scan_replays_series() {
        let mut points: Vec<(i64, f64)> = (0..30).map(|i| (i as i64, normal(i))).collect();
        points.push((30, 200.0));
        let anomalies = AnomalyDetector::scan(
            &config(AnomalyAlgorithm::ZScore),
            "system",
            "cpu_usage",
            &points,
        );
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].timestamp, 30);
    }
}
