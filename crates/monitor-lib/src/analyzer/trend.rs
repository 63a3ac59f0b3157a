//! Linear trend models and forecasts

use serde::{Deserialize, Serialize};

use crate::config::TrendConfig;
use crate::models::TrendDirection;
use crate::processor::direction_of;
use crate::stats::linear_regression;

/// One forecast value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Fitted line for one `source.metric` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendModel {
    pub metric: String,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub direction: TrendDirection,
    pub trained: bool,
    /// Points used by the last fit
    pub samples: usize,
    pub last_trained: Option<i64>,
    /// Timestamp of the last fitted point
    pub last_timestamp: Option<i64>,
    /// Mean spacing between fitted points
    pub cadence_ms: Option<i64>,
}

impl TrendModel {
    pub fn untrained(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
            direction: TrendDirection::Stable,
            trained: false,
            samples: 0,
            last_trained: None,
            last_timestamp: None,
            cadence_ms: None,
        }
    }

    /// Refit on the most recent `window_size` points.
    /// The model stays untrained until `min_samples` points exist.
    pub fn train(&mut self, points: &[(i64, f64)], config: &TrendConfig, now: i64) {
        let window = recent(points, config.window_size);
        if window.len() < config.min_samples.max(2) {
            self.samples = window.len();
            return;
        }
        let values: Vec<f64> = window.iter().map(|(_, v)| *v).collect();
        let Some(fit) = linear_regression(&values) else {
            return;
        };
        self.slope = fit.slope;
        self.intercept = fit.intercept;
        self.r_squared = fit.r_squared;
        self.direction = direction_of(fit.slope, config.stable_epsilon);
        self.samples = window.len();
        self.trained = true;
        self.last_trained = Some(now);
        self.last_timestamp = window.last().map(|(t, _)| *t);
        self.cadence_ms = cadence(window);
    }

    /// Extrapolate `steps` points past the last fitted sample
    pub fn forecast(&self, steps: usize) -> Vec<ForecastPoint> {
        let (Some(last_timestamp), Some(cadence_ms)) = (self.last_timestamp, self.cadence_ms) else {
            return Vec::new();
        };
        if !self.trained {
            return Vec::new();
        }
        let last_index = self.samples.saturating_sub(1) as f64;
        (1..=steps)
            .map(|k| ForecastPoint {
                timestamp: last_timestamp + cadence_ms * k as i64,
                value: self.intercept + self.slope * (last_index + k as f64),
            })
            .collect()
    }
}

/// A significant trend surfaced by an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub source: String,
    pub metric: String,
    pub direction: TrendDirection,
    pub slope: f64,
    /// r² of the fit
    pub significance: f64,
    pub samples: usize,
    pub forecast: Vec<ForecastPoint>,
}

/// Fit the window and return it only if r² reaches the significance threshold
pub fn analyze_trend(
    source: &str,
    metric: &str,
    points: &[(i64, f64)],
    config: &TrendConfig,
    now: i64,
) -> Option<TrendAnalysis> {
    let mut model = TrendModel::untrained(metric);
    model.train(points, config, now);
    if !model.trained || model.r_squared < config.significance_threshold {
        return None;
    }
    Some(TrendAnalysis {
        source: source.to_string(),
        metric: metric.to_string(),
        direction: model.direction,
        slope: model.slope,
        significance: model.r_squared,
        samples: model.samples,
        forecast: model.forecast(config.forecast_steps),
    })
}

fn recent(points: &[(i64, f64)], window_size: usize) -> &[(i64, f64)] {
    let start = points.len().saturating_sub(window_size.max(2));
    &points[start..]
}

fn cadence(points: &[(i64, f64)]) -> Option<i64> {
    let (first, last) = (points.first()?, points.last()?);
    if points.len() < 2 {
        return None;
    }
    Some(((last.0 - first.0) / (points.len() as i64 - 1)).max(1))
}
