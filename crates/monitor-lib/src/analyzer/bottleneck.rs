//! Sustained threshold breach detection

use crate::models::{Bottleneck, Severity, Threshold};
use crate::stats::mean;

/// Severity of a breach period from its peak value
pub fn breach_severity(max_value: f64, threshold: &Threshold) -> Severity {
    let midpoint = (threshold.warning + threshold.critical) / 2.0;
    if max_value >= threshold.critical {
        Severity::Critical
    } else if max_value >= midpoint {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Walk time-ordered points and report every period at or above the warning
/// threshold that lasted at least `sustained_ms`.
///
/// A period runs from its first breaching sample to its last one; a period
/// still open at the end of the series is reported if it is long enough.
pub fn detect_sustained(
    source: &str,
    metric: &str,
    points: &[(i64, f64)],
    threshold: &Threshold,
    sustained_ms: i64,
) -> Vec<Bottleneck> {
    let mut bottlenecks = Vec::new();
    let mut period: Vec<(i64, f64)> = Vec::new();

    let mut close = |period: &mut Vec<(i64, f64)>| {
        if let (Some(first), Some(last)) = (period.first(), period.last()) {
            let duration_ms = last.0 - first.0;
            if duration_ms >= sustained_ms {
                let values: Vec<f64> = period.iter().map(|(_, v)| *v).collect();
                let max_value = values.iter().copied().fold(f64::MIN, f64::max);
                bottlenecks.push(Bottleneck {
                    kind: metric.to_string(),
                    source: source.to_string(),
                    severity: breach_severity(max_value, threshold),
                    start_time: first.0,
                    end_time: last.0,
                    duration_ms,
                    max_value,
                    avg_value: mean(&values),
                    threshold: *threshold,
                });
            }
        }
        period.clear();
    };

    for &(timestamp, value) in points {
        if value >= threshold.warning {
            period.push((timestamp, value));
        } else {
            close(&mut period);
        }
    }
    close(&mut period);
    bottlenecks
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: i64 = 1_000;
    const FIVE_MINUTES: i64 = 300 * SECOND;

    fn held(value: f64, duration_secs: i64) -> Vec<(i64, f64)> {
        (0..=duration_secs / 30)
            .map(|i| (i * 30 * SECOND, value))
            .collect()
    }

    #[test]
    fn test_six_minutes_at_95_is_one_critical_bottleneck() {
        let threshold = Threshold::new(80.0, 90.0);
        let bottlenecks = detect_sustained("system", "cpu_usage", &held(95.0, 360), &threshold, FIVE_MINUTES);
        assert_eq!(bottlenecks.len(), 1);
        let b = &bottlenecks[0];
        assert_eq!(b.severity, Severity::Critical);
        assert_eq!(b.duration_ms, 360 * SECOND);
        assert_eq!(b.max_value, 95.0);
        assert_eq!(b.avg_value, 95.0);
    }

    #[test]
    fn test_two_minutes_is_not_sustained() {
        let threshold = Threshold::new(80.0, 90.0);
        assert!(detect_sustained("system", "cpu_usage", &held(95.0, 120), &threshold, FIVE_MINUTES).is_empty());
    }

    #[test]
    fn test_transient_dip_splits_periods() {
        let threshold = Threshold::new(80.0, 90.0);
        let mut points = held(82.0, 600);
        // Dip below warning at 4 minutes
        points[8].1 = 50.0;
        let bottlenecks = detect_sustained("system", "cpu_usage", &points, &threshold, FIVE_MINUTES);
        assert_eq!(bottlenecks.len(), 1);
        assert_eq!(bottlenecks[0].start_time, 270 * SECOND);
        assert_eq!(bottlenecks[0].severity, Severity::Medium);
    }

    #[test]
    fn test_severity_scaling() {
        let threshold = Threshold::new(80.0, 90.0);
        assert_eq!(breach_severity(81.0, &threshold), Severity::Medium);
        assert_eq!(breach_severity(86.0, &threshold), Severity::High);
        assert_eq!(breach_severity(90.0, &threshold), Severity::Critical);
    }
}
