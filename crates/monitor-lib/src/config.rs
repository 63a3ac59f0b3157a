//! Configuration for the monitoring pipeline
//!
//! Every section has sensible defaults so a partial file (or none at all)
//! yields a working configuration.

use crate::models::{AnomalyAlgorithm, Granularity, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level configuration shared by all components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub collection: CollectionConfig,
    pub retention: RetentionConfig,
    /// Per-metric warning/critical thresholds, keyed by field name
    pub thresholds: BTreeMap<String, Threshold>,
    /// Per-source weight and category overrides
    pub sources: BTreeMap<String, SourceOptions>,
    pub processing: ProcessingConfig,
    pub anomaly: AnomalyConfig,
    pub bottleneck: BottleneckConfig,
    pub trend: TrendConfig,
    pub analysis: AnalysisConfig,
    pub alerts: AlertConfig,
    pub events: EventConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            collection: CollectionConfig::default(),
            retention: RetentionConfig::default(),
            thresholds: default_thresholds(),
            sources: BTreeMap::new(),
            processing: ProcessingConfig::default(),
            anomaly: AnomalyConfig::default(),
            bottleneck: BottleneckConfig::default(),
            trend: TrendConfig::default(),
            analysis: AnalysisConfig::default(),
            alerts: AlertConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Options for a source, falling back to weight 1.0 and no explicit category
    pub fn source_options(&self, name: &str) -> SourceOptions {
        self.sources.get(name).cloned().unwrap_or_default()
    }
}

fn default_thresholds() -> BTreeMap<String, Threshold> {
    let mut thresholds = BTreeMap::new();
    thresholds.insert("cpu_usage".to_string(), Threshold::new(70.0, 90.0));
    thresholds.insert("memory_usage".to_string(), Threshold::new(80.0, 95.0));
    thresholds.insert("disk_usage".to_string(), Threshold::new(85.0, 95.0));
    thresholds.insert("error_rate".to_string(), Threshold::new(5.0, 10.0));
    thresholds.insert("response_time_ms".to_string(), Threshold::new(1000.0, 5000.0));
    thresholds
}

/// Collection loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Interval between collection ticks (default: 5 seconds)
    pub interval_ms: u64,
    /// Consecutive failures tolerated before a source is disabled
    pub max_consecutive_failures: u32,
    /// Per-source deadline for one collection; 80% of the interval when unset
    pub source_timeout_ms: Option<u64>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_consecutive_failures: 5,
            source_timeout_ms: None,
        }
    }
}

impl CollectionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn source_timeout(&self) -> Duration {
        let ms = self
            .source_timeout_ms
            .unwrap_or(self.interval_ms.saturating_mul(4) / 5);
        Duration::from_millis(ms.max(1))
    }
}

/// Raw snapshot retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum snapshots kept per source
    pub max_snapshots: usize,
    /// Maximum snapshot age in seconds
    pub max_age_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 1_000,
            max_age_secs: 24 * 60 * 60,
        }
    }
}

impl RetentionConfig {
    pub fn max_age_ms(&self) -> i64 {
        (self.max_age_secs as i64).saturating_mul(1_000)
    }
}

/// Static weight and category of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    pub weight: f64,
    pub category: Option<String>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            weight: 1.0,
            category: None,
        }
    }
}

/// Bucket count caps per granularity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketLimits {
    pub minute: usize,
    pub hour: usize,
    pub day: usize,
}

impl Default for BucketLimits {
    fn default() -> Self {
        Self {
            minute: 1_440,
            hour: 168,
            day: 90,
        }
    }
}

impl BucketLimits {
    pub fn limit(&self, granularity: Granularity) -> usize {
        match granularity {
            Granularity::Minute => self.minute,
            Granularity::Hour => self.hour,
            Granularity::Day => self.day,
        }
    }
}

/// Inclusive clamp bounds for a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBounds {
    pub min: f64,
    pub max: f64,
}

/// Data processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub granularities: Vec<Granularity>,
    pub bucket_limits: BucketLimits,
    /// Explicit bounds; percentage-like metrics default to [0, 100]
    pub metric_bounds: BTreeMap<String, MetricBounds>,
    /// Processed points kept per source for pattern detection
    pub history_size: usize,
    /// Interval of the bucket cleanup tick
    pub cleanup_interval_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            granularities: Granularity::ALL.to_vec(),
            bucket_limits: BucketLimits::default(),
            metric_bounds: BTreeMap::new(),
            history_size: 1_000,
            cleanup_interval_secs: 300,
        }
    }
}

/// Streaming anomaly detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub algorithm: AnomalyAlgorithm,
    /// z-score threshold (sensitivity)
    pub threshold: f64,
    /// Sliding window length per metric
    pub window_size: usize,
    /// Samples required before anything is flagged
    pub min_samples: usize,
    /// Recent anomalies kept for dashboards
    pub recent_limit: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            algorithm: AnomalyAlgorithm::ZScore,
            threshold: 2.5,
            window_size: 100,
            min_samples: 20,
            recent_limit: 200,
        }
    }
}

/// Sustained bottleneck detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BottleneckConfig {
    /// Minimum breach duration to report (default: 5 minutes)
    pub sustained_duration_secs: u64,
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        Self {
            sustained_duration_secs: 5 * 60,
        }
    }
}

impl BottleneckConfig {
    pub fn sustained_duration_ms(&self) -> i64 {
        (self.sustained_duration_secs as i64).saturating_mul(1_000)
    }
}

/// Trend fitting and forecasting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Minimum r² for a trend to be surfaced
    pub significance_threshold: f64,
    /// Samples required before a model is trained
    pub min_samples: usize,
    /// Most recent samples used for fitting
    pub window_size: usize,
    /// Points forecast per trend
    pub forecast_steps: usize,
    /// Slope magnitude below which a trend is stable
    pub stable_epsilon: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            significance_threshold: 0.7,
            min_samples: 10,
            window_size: 360,
            forecast_steps: 10,
            stable_epsilon: 0.1,
        }
    }
}

/// Analyzer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Interval of the self-analysis tick
    pub interval_secs: u64,
    /// Window analyzed by the self-analysis tick
    pub lookback_secs: u64,
    /// Metric keys (`source.metric`) that get a trend model at startup
    pub tracked_metrics: Vec<String>,
    /// Points kept per metric
    pub history_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            lookback_secs: 60 * 60,
            tracked_metrics: Vec::new(),
            history_size: 2_000,
        }
    }
}

/// Alert deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Window in which repeated alerts are suppressed (default: 15 minutes)
    pub dedup_window_secs: u64,
    /// Maximum alerts retained
    pub max_active: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 15 * 60,
            max_active: 100,
        }
    }
}

/// Event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 1_024 }
    }
}
