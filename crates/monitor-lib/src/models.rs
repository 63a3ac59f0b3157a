//! Core data models for the monitoring pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current wall-clock time as Unix epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single value reported by a metric source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value; booleans map to 0/1, text is not numeric
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(_) => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// Flat map of named values returned by one `collect()` call
pub type MetricValues = BTreeMap<String, MetricValue>;

/// Weighted cross-source aggregates: category -> field -> value
pub type AggregatedMetrics = BTreeMap<String, BTreeMap<String, f64>>;

/// One timestamped read of all fields from a single source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub source: String,
    pub timestamp: i64,
    pub values: MetricValues,
    /// Time spent inside the source's `collect()` call
    pub duration_ms: u64,
}

/// Inclusive time window in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The window of `duration_ms` ending at `end`
    pub fn ending_at(end: i64, duration_ms: i64) -> Self {
        Self {
            start: end.saturating_sub(duration_ms),
            end,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

/// Warning/critical limits for a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Severity shared by anomalies, bottlenecks and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Bucketed health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// A 0-100 composite score with its status bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub value: f64,
    pub status: HealthStatus,
}

impl HealthScore {
    pub fn from_value(value: f64) -> Self {
        let value = value.clamp(0.0, 100.0);
        let status = if value >= 80.0 {
            HealthStatus::Healthy
        } else if value >= 60.0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };
        Self { value, status }
    }

    pub fn perfect() -> Self {
        Self::from_value(100.0)
    }
}

/// Overall score plus one score per thresholded resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: HealthScore,
    pub components: BTreeMap<String, HealthScore>,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            overall: HealthScore::perfect(),
            components: BTreeMap::new(),
        }
    }
}

/// Time bucket width used by the aggregation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Minute, Granularity::Hour, Granularity::Day];

    /// Window size in milliseconds
    pub fn window_ms(&self) -> i64 {
        match self {
            Granularity::Minute => 60_000,
            Granularity::Hour => 3_600_000,
            Granularity::Day => 86_400_000,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Minute => write!(f, "minute"),
            Granularity::Hour => write!(f, "hour"),
            Granularity::Day => write!(f, "day"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" | "1m" => Ok(Granularity::Minute),
            "hour" | "1h" => Ok(Granularity::Hour),
            "day" | "1d" => Ok(Granularity::Day),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

/// Anomaly detection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyAlgorithm {
    ZScore,
    Iqr,
    Isolation,
}

impl fmt::Display for AnomalyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyAlgorithm::ZScore => write!(f, "zscore"),
            AnomalyAlgorithm::Iqr => write!(f, "iqr"),
            AnomalyAlgorithm::Isolation => write!(f, "isolation"),
        }
    }
}

/// Range of values considered normal at detection time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRange {
    pub low: f64,
    pub high: f64,
}

/// A value that deviated from its recent history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub timestamp: i64,
    pub source: String,
    pub metric: String,
    pub value: f64,
    pub expected_range: ExpectedRange,
    pub deviation_score: f64,
    pub severity: Severity,
    pub algorithm: AnomalyAlgorithm,
}

/// A threshold breach sustained for at least the configured duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    /// Metric that breached its threshold
    pub kind: String,
    pub source: String,
    pub severity: Severity,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: i64,
    pub max_value: f64,
    pub avg_value: f64,
    pub threshold: Threshold,
}

/// Direction of a fitted trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Decreasing => write!(f, "decreasing"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// Structured outcome returned across the API boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
        }
    }
}

/// Join a source and field name into the key used by per-metric state
pub fn metric_key(source: &str, metric: &str) -> String {
    format!("{}.{}", source, metric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_value_untagged_roundtrip() {
        let values: MetricValues = serde_json::from_str(r#"{"a": 1.5, "b": true, "c": "up"}"#).unwrap();
        assert_eq!(values["a"], MetricValue::Number(1.5));
        assert_eq!(values["b"], MetricValue::Bool(true));
        assert_eq!(values["c"], MetricValue::Text("up".to_string()));
        assert_eq!(values["b"].as_number(), Some(1.0));
        assert_eq!(values["c"].as_number(), None);
    }

    #[test]
    fn test_health_score_buckets() {
        assert_eq!(HealthScore::from_value(80.0).status, HealthStatus::Healthy);
        assert_eq!(HealthScore::from_value(79.9).status, HealthStatus::Warning);
        assert_eq!(HealthScore::from_value(60.0).status, HealthStatus::Warning);
        assert_eq!(HealthScore::from_value(59.0).status, HealthStatus::Critical);
        assert_eq!(HealthScore::from_value(140.0).value, 100.0);
    }

    #[test]
    fn test_granularity_parsing() {
        assert_eq!("hour".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("1d".parse::<Granularity>().unwrap(), Granularity::Day);
        assert!("week".parse::<Granularity>().is_err());
        assert_eq!(Granularity::Minute.window_ms(), 60_000);
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::ending_at(10_000, 4_000);
        assert_eq!(range.start, 6_000);
        assert!(range.contains(6_000));
        assert!(range.contains(10_000));
        assert!(!range.contains(10_001));
        assert!(!TimeRange::new(5, 1).is_valid());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert_eq!(Severity::Medium.to_string(), "medium");
    }
}
