//! Value cleaning, derived metrics and data quality grading

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collector::HealthScorer;
use crate::config::MetricBounds;
use crate::models::{MetricValue, MetricValues};

const PERCENT_BOUNDS: MetricBounds = MetricBounds {
    min: 0.0,
    max: 100.0,
};

/// Metrics that are percentages by naming convention
pub fn is_percentage_metric(name: &str) -> bool {
    name == "health_score"
        || ["_percent", "_usage", "_rate", "_utilization"]
            .iter()
            .any(|suffix| name.ends_with(suffix))
}

fn bounds_for(name: &str, explicit: &BTreeMap<String, MetricBounds>) -> Option<MetricBounds> {
    explicit
        .get(name)
        .copied()
        .or_else(|| is_percentage_metric(name).then_some(PERCENT_BOUNDS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.95 {
            QualityGrade::Excellent
        } else if ratio >= 0.8 {
            QualityGrade::Good
        } else if ratio >= 0.5 {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }
}

/// Fraction of reported fields that survived cleaning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub grade: QualityGrade,
    pub score: f64,
    pub valid_fields: usize,
    pub total_fields: usize,
}

impl DataQuality {
    pub fn new(valid_fields: usize, total_fields: usize) -> Self {
        let score = if total_fields == 0 {
            0.0
        } else {
            valid_fields as f64 / total_fields as f64
        };
        Self {
            grade: QualityGrade::from_ratio(score),
            score,
            valid_fields,
            total_fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedValues {
    pub metrics: BTreeMap<String, f64>,
    /// Fields dropped as non-numeric or non-finite
    pub dropped: Vec<String>,
    /// Fields whose value was clamped into bounds
    pub clamped: Vec<String>,
    pub quality: DataQuality,
}

/// Coerce, bound and filter raw values.
///
/// Booleans become 0/1, numeric strings are parsed, anything else that is not
/// a finite number is dropped. Bounded metrics are clamped.
pub fn clean_values(values: &MetricValues, bounds: &BTreeMap<String, MetricBounds>) -> CleanedValues {
    let mut metrics = BTreeMap::new();
    let mut dropped = Vec::new();
    let mut clamped = Vec::new();

    for (name, value) in values {
        let number = match value {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(text) => text.trim().parse::<f64>().ok(),
        };
        let Some(number) = number.filter(|v| v.is_finite()) else {
            dropped.push(name.clone());
            continue;
        };

        let cleaned = match bounds_for(name, bounds) {
            Some(b) => {
                let c = number.clamp(b.min, b.max);
                if c != number {
                    clamped.push(name.clone());
                }
                c
            }
            None => number,
        };
        metrics.insert(name.clone(), cleaned);
    }

    let quality = DataQuality::new(metrics.len(), values.len());
    CleanedValues {
        metrics,
        dropped,
        clamped,
        quality,
    }
}

/// Secondary metrics computed from cleaned values
pub fn derive_metrics(metrics: &BTreeMap<String, f64>, scorer: &HealthScorer) -> BTreeMap<String, f64> {
    let mut derived = BTreeMap::new();
    derived.insert(
        "health_score".to_string(),
        scorer.score(metrics).overall.value,
    );

    let resources: Vec<f64> = ["cpu_usage", "memory_usage"]
        .iter()
        .filter_map(|name| metrics.get(*name).copied())
        .collect();
    if !resources.is_empty() {
        derived.insert(
            "resource_utilization".to_string(),
            resources.iter().sum::<f64>() / resources.len() as f64,
        );
    }
    derived
}
