//! Threshold-based health scoring

use std::collections::BTreeMap;

use crate::models::{AggregatedMetrics, HealthReport, HealthScore, Threshold};

/// Scores metric values against configured warning/critical thresholds
#[derive(Debug, Clone)]
pub struct HealthScorer {
    thresholds: BTreeMap<String, Threshold>,
}

impl HealthScorer {
    pub fn new(thresholds: BTreeMap<String, Threshold>) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &BTreeMap<String, Threshold> {
        &self.thresholds
    }

    /// Penalty curve: 100 below warning, linear down to 0 at critical
    pub fn component_score(value: f64, threshold: &Threshold) -> f64 {
        if value < threshold.warning {
            return 100.0;
        }
        if value >= threshold.critical {
            return 0.0;
        }
        let span = threshold.critical - threshold.warning;
        if span <= f64::EPSILON {
            return 0.0;
        }
        100.0 * (1.0 - (value - threshold.warning) / span)
    }

    /// Score every thresholded metric present in `values` and average them.
    /// With no thresholded metric present the overall score is 100.
    pub fn score(&self, values: &BTreeMap<String, f64>) -> HealthReport {
        let mut components = BTreeMap::new();
        for (metric, threshold) in &self.thresholds {
            if let Some(value) = values.get(metric) {
                if value.is_finite() {
                    components.insert(
                        metric.clone(),
                        HealthScore::from_value(Self::component_score(*value, threshold)),
                    );
                }
            }
        }

        let overall = if components.is_empty() {
            HealthScore::perfect()
        } else {
            let total: f64 = components.values().map(|s| s.value).sum();
            HealthScore::from_value(total / components.len() as f64)
        };

        HealthReport {
            overall,
            components,
        }
    }

    /// Score cross-source aggregates: a metric reported under several
    /// categories is averaged across them first.
    pub fn score_aggregated(&self, aggregated: &AggregatedMetrics) -> HealthReport {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for fields in aggregated.values() {
            for (metric, value) in fields {
                let entry = sums.entry(metric.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        let flattened: BTreeMap<String, f64> = sums
            .into_iter()
            .map(|(metric, (sum, count))| (metric, sum / count as f64))
            .collect();
        self.score(&flattened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthStatus;

    fn scorer() -> HealthScorer {
        let mut thresholds = BTreeMap::new();
        thresholds.insert("cpu_usage".to_string(), Threshold::new(70.0, 90.0));
        thresholds.insert("memory_usage".to_string(), Threshold::new(80.0, 95.0));
        HealthScorer::new(thresholds)
    }

    #[test]
    fn test_penalty_curve() {
        let threshold = Threshold::new(70.0, 90.0);
        assert_eq!(HealthScorer::component_score(50.0, &threshold), 100.0);
        assert!((HealthScorer::component_score(80.0, &threshold) - 50.0).abs() < 1e-9);
        assert_eq!(HealthScorer::component_score(90.0, &threshold), 0.0);
        assert_eq!(HealthScorer::component_score(150.0, &threshold), 0.0);
    }

    #[test]
    fn test_overall_is_mean_of_components() {
        let mut values = BTreeMap::new();
        values.insert("cpu_usage".to_string(), 80.0);
        values.insert("memory_usage".to_string(), 10.0);
        values.insert("unrelated".to_string(), 1e9);

        let report = scorer().score(&values);
        assert_eq!(report.components.len(), 2);
        assert!((report.overall.value - 75.0).abs() < 1e-9);
        assert_eq!(report.overall.status, HealthStatus::Warning);
        assert_eq!(report.components["cpu_usage"].status, HealthStatus::Critical);
    }

    #[test]
    fn test_no_components_is_healthy() {
        let report = scorer().score(&BTreeMap::new());
        assert_eq!(report.overall.value, 100.0);
        assert_eq!(report.overall.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_score_aggregated_averages_across_categories() {
        let mut aggregated = AggregatedMetrics::new();
        aggregated
            .entry("system".to_string())
            .or_default()
            .insert("cpu_usage".to_string(), 60.0);
        aggregated
            .entry("performance".to_string())
            .or_default()
            .insert("cpu_usage".to_string(), 100.0);

        let report = scorer().score_aggregated(&aggregated);
        // mean cpu = 80 -> 50 points
        assert!((report.components["cpu_usage"].value - 50.0).abs() < 1e-9);
    }
}
