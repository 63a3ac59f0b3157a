//! Best-effort pattern detection over processed history

use serde::{Deserialize, Serialize};

use crate::config::{AnomalyConfig, TrendConfig};
use crate::models::{TimeRange, TrendDirection};
use crate::stats::{linear_regression, mean, std_dev};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Trend,
    Seasonal,
    Cyclical,
    Spike,
}

impl PatternType {
    pub const ALL: [PatternType; 4] = [
        PatternType::Trend,
        PatternType::Seasonal,
        PatternType::Cyclical,
        PatternType::Spike,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternQuery {
    pub time_range: TimeRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    /// Empty means every pattern type
    #[serde(default)]
    pub pattern_types: Vec<PatternType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFinding {
    pub pattern: PatternType,
    pub source: String,
    pub metric: String,
    /// r² for trends, deviation for spikes
    pub strength: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<TrendDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    /// Timestamps of the points that make up the pattern
    pub timestamps: Vec<i64>,
    pub description: String,
}

pub fn direction_of(slope: f64, epsilon: f64) -> TrendDirection {
    if slope > epsilon {
        TrendDirection::Increasing
    } else if slope < -epsilon {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// Significant linear trend over `points`, if any
pub fn detect_trend(
    source: &str,
    metric: &str,
    points: &[(i64, f64)],
    config: &TrendConfig,
) -> Option<PatternFinding> {
    if points.len() < config.min_samples.max(2) {
        return None;
    }
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let fit = linear_regression(&values)?;
    if fit.r_squared < config.significance_threshold {
        return None;
    }
    let direction = direction_of(fit.slope, config.stable_epsilon);
    Some(PatternFinding {
        pattern: PatternType::Trend,
        source: source.to_string(),
        metric: metric.to_string(),
        strength: fit.r_squared,
        direction: Some(direction),
        slope: Some(fit.slope),
        timestamps: vec![points[0].0, points[points.len() - 1].0],
        description: format!(
            "{} is {} by {:.3} per sample (r² {:.2})",
            metric, direction, fit.slope, fit.r_squared
        ),
    })
}

/// Points that deviate from the whole series by more than the anomaly threshold
pub fn detect_spikes(
    source: &str,
    metric: &str,
    points: &[(i64, f64)],
    config: &AnomalyConfig,
) -> Option<PatternFinding> {
    if points.len() < config.min_samples.max(2) {
        return None;
    }
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let m = mean(&values);
    let sd = std_dev(&values);
    if sd < 1e-9 {
        return None;
    }

    let spikes: Vec<(i64, f64)> = points
        .iter()
        .filter(|(_, v)| (v - m).abs() / sd > config.threshold)
        .copied()
        .collect();
    if spikes.is_empty() {
        return None;
    }
    let strength = spikes
        .iter()
        .map(|(_, v)| (v - m).abs() / sd)
        .fold(0.0_f64, f64::max);
    Some(PatternFinding {
        pattern: PatternType::Spike,
        source: source.to_string(),
        metric: metric.to_string(),
        strength,
        direction: None,
        slope: None,
        timestamps: spikes.iter().map(|(t, _)| *t).collect(),
        description: format!(
            "{} spiked {} time(s), up to {:.1} standard deviations from {:.2}",
            metric,
            spikes.len(),
            strength,
            m
        ),
    })
}
