//! Data processing: cleaning, bucketing and streaming anomaly detection
//!
//! The processor consumes collection results, never fails on bad input, and
//! owns the aggregation buckets plus the anomaly detector windows.

mod aggregation;
mod anomaly;
mod cleaning;
mod patterns;

pub use aggregation::{bucket_start, AggregationBucket, BucketStats, BucketStore};
pub use anomaly::{evaluate, iqr, isolation, zscore, AnomalyDetector, AnomalyVerdict};
pub use cleaning::{
    clean_values, derive_metrics, is_percentage_metric, CleanedValues, DataQuality, QualityGrade,
};
pub use patterns::{detect_spikes, detect_trend, direction_of, PatternFinding, PatternQuery, PatternType};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::collector::{CollectionResult, HealthScorer};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::events::{EventBus, MonitorEvent};
use crate::models::{now_millis, AggregatedMetrics, Anomaly, Granularity, Severity, TimeRange};
use crate::schedule::Ticker;

/// Utilization above which an insight is raised
const HIGH_UTILIZATION: f64 = 80.0;

/// Cleaned view of one source in one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSource {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub derived: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<DataQuality>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_fields: Vec<String>,
}

impl ProcessedSource {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            metrics: BTreeMap::new(),
            derived: BTreeMap::new(),
            quality: None,
            dropped_fields: Vec::new(),
        }
    }
}

/// Short human-readable observation about a processed tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub category: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub timestamp: i64,
    pub sources: BTreeMap<String, ProcessedSource>,
    pub aggregated: AggregatedMetrics,
    pub anomalies: Vec<Anomaly>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationQuery {
    pub start_time: i64,
    pub end_time: i64,
    pub interval: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<String>>,
}

/// One cleaned point of a source's history
#[derive(Debug, Clone)]
struct ProcessedPoint {
    timestamp: i64,
    metrics: BTreeMap<String, f64>,
}

struct ProcessorState {
    buckets: BucketStore,
    detector: AnomalyDetector,
    history: HashMap<String, VecDeque<ProcessedPoint>>,
    recent_anomalies: VecDeque<Anomaly>,
}

pub struct DataProcessor {
    config: MonitorConfig,
    scorer: HealthScorer,
    state: RwLock<ProcessorState>,
    events: EventBus,
    running: AtomicBool,
    cleanup: Ticker,
}

impl DataProcessor {
    pub fn new(config: MonitorConfig, events: EventBus) -> Self {
        let state = ProcessorState {
            buckets: BucketStore::new(
                config.processing.granularities.clone(),
                config.processing.bucket_limits.clone(),
            ),
            detector: AnomalyDetector::new(config.anomaly.clone()),
            history: HashMap::new(),
            recent_anomalies: VecDeque::new(),
        };
        Self {
            scorer: HealthScorer::new(config.thresholds.clone()),
            state: RwLock::new(state),
            events,
            running: AtomicBool::new(false),
            cleanup: Ticker::new(),
            config,
        }
    }

    /// Start the periodic bucket cleanup
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }
        let period = Duration::from_secs(self.config.processing.cleanup_interval_secs.max(1));
        let processor = Arc::downgrade(self);
        self.cleanup.spawn(period, "processor-cleanup", move || {
            let processor = processor.clone();
            async move {
                if let Some(processor) = processor.upgrade() {
                    processor.cleanup(now_millis()).await;
                }
            }
        });
        info!("Data processor started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(MonitorError::NotRunning);
        }
        self.cleanup.cancel();
        info!("Data processor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clean, derive, bucket and scan one collection result.
    ///
    /// Failed sources are carried through as failed entries.
    pub async fn process(&self, collection: &CollectionResult) -> ProcessedResult {
        let timestamp = collection.timestamp;
        let mut sources = BTreeMap::new();
        let mut anomalies = Vec::new();
        let mut insights = Vec::new();

        let mut state = self.state.write().await;
        for (name, outcome) in &collection.per_source {
            let values = match (&outcome.values, outcome.success) {
                (Some(values), true) => values,
                _ => {
                    let error = outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "source reported no values".to_string());
                    insights.push(Insight {
                        category: "collection".to_string(),
                        severity: Severity::Medium,
                        source: Some(name.clone()),
                        message: format!("Collection from {} failed: {}", name, error),
                    });
                    sources.insert(name.clone(), ProcessedSource::failed(error));
                    continue;
                }
            };

            let cleaned = clean_values(values, &self.config.processing.metric_bounds);
            let derived = derive_metrics(&cleaned.metrics, &self.scorer);

            if !cleaned.dropped.is_empty() {
                debug!(source = %name, dropped = ?cleaned.dropped, "Dropped invalid fields");
            }

            for (metric, value) in &cleaned.metrics {
                if let Some(anomaly) = state.detector.observe(name, metric, timestamp, *value) {
                    anomalies.push(anomaly);
                }
            }

            let mut bucketed = cleaned.metrics.clone();
            bucketed.extend(derived.iter().map(|(k, v)| (k.clone(), *v)));
            state.buckets.ingest(name, timestamp, &bucketed);

            let history = state.history.entry(name.clone()).or_default();
            history.push_back(ProcessedPoint {
                timestamp,
                metrics: bucketed,
            });
            while history.len() > self.config.processing.history_size.max(1) {
                history.pop_front();
            }

            insights.extend(source_insights(name, &cleaned, &derived));
            sources.insert(
                name.clone(),
                ProcessedSource {
                    success: true,
                    error: None,
                    metrics: cleaned.metrics,
                    derived,
                    quality: Some(cleaned.quality),
                    dropped_fields: cleaned.dropped,
                },
            );
        }

        for anomaly in &anomalies {
            state.recent_anomalies.push_back(anomaly.clone());
        }
        while state.recent_anomalies.len() > self.config.anomaly.recent_limit.max(1) {
            state.recent_anomalies.pop_front();
        }
        drop(state);

        if !anomalies.is_empty() {
            insights.push(Insight {
                category: "anomaly".to_string(),
                severity: anomalies
                    .iter()
                    .map(|a| a.severity)
                    .max()
                    .unwrap_or(Severity::Medium),
                source: None,
                message: format!("{} anomalous value(s) detected this cycle", anomalies.len()),
            });
        }
        for anomaly in &anomalies {
            self.events
                .publish(MonitorEvent::AnomalyDetected(anomaly.clone()));
        }

        ProcessedResult {
            timestamp,
            sources,
            aggregated: collection.aggregated.clone(),
            anomalies,
            insights,
        }
    }

    /// Bucketed statistics for a time range at one granularity
    pub async fn get_aggregated_data(&self, query: &AggregationQuery) -> Result<Vec<AggregationBucket>> {
        let range = TimeRange::new(query.start_time, query.end_time);
        if !range.is_valid() {
            return Err(MonitorError::InvalidTimeRange {
                start: query.start_time,
                end: query.end_time,
            });
        }
        let state = self.state.read().await;
        Ok(state.buckets.query(
            &range,
            query.interval,
            query.sources.as_deref(),
            query.metrics.as_deref(),
        ))
    }

    /// Trend and spike findings over the processed history.
    /// Seasonal and cyclical detection always return nothing.
    pub async fn detect_patterns(&self, query: &PatternQuery) -> Result<Vec<PatternFinding>> {
        if !query.time_range.is_valid() {
            return Err(MonitorError::InvalidTimeRange {
                start: query.time_range.start,
                end: query.time_range.end,
            });
        }
        let types: Vec<PatternType> = if query.pattern_types.is_empty() {
            PatternType::ALL.to_vec()
        } else {
            query.pattern_types.clone()
        };

        let series = self.metric_points(query.sources.as_deref(), &query.time_range).await;
        let mut findings = Vec::new();
        for ((source, metric), points) in &series {
            for pattern in &types {
                let finding = match pattern {
                    PatternType::Trend => detect_trend(source, metric, points, &self.config.trend),
                    PatternType::Spike => detect_spikes(source, metric, points, &self.config.anomaly),
                    PatternType::Seasonal | PatternType::Cyclical => None,
                };
                findings.extend(finding);
            }
        }
        Ok(findings)
    }

    /// Per (source, metric) points of the processed history within `range`
    pub async fn metric_points(
        &self,
        sources: Option<&[String]>,
        range: &TimeRange,
    ) -> BTreeMap<(String, String), Vec<(i64, f64)>> {
        let state = self.state.read().await;
        let mut series: BTreeMap<(String, String), Vec<(i64, f64)>> = BTreeMap::new();
        for (source, history) in &state.history {
            if sources.map_or(false, |s| !s.contains(source)) {
                continue;
            }
            for point in history.iter().filter(|p| range.contains(p.timestamp)) {
                for (metric, value) in &point.metrics {
                    series
                        .entry((source.clone(), metric.clone()))
                        .or_default()
                        .push((point.timestamp, *value));
                }
            }
        }
        series
    }

    /// Most recent anomalies, newest first
    pub async fn recent_anomalies(&self, limit: usize) -> Vec<Anomaly> {
        let state = self.state.read().await;
        state.recent_anomalies.iter().rev().take(limit).cloned().collect()
    }

    /// Drop expired buckets; returns how many were removed
    pub async fn cleanup(&self, now: i64) -> usize {
        let removed = self.state.write().await.buckets.cleanup(now);
        if removed > 0 {
            debug!(removed = removed, "Expired aggregation buckets removed");
        }
        removed
    }
}

fn source_insights(
    source: &str,
    cleaned: &CleanedValues,
    derived: &BTreeMap<String, f64>,
) -> Vec<Insight> {
    let mut insights = Vec::new();
    let quality_severity = match cleaned.quality.grade {
        QualityGrade::Poor => Some(Severity::Medium),
        QualityGrade::Fair => Some(Severity::Low),
        QualityGrade::Good | QualityGrade::Excellent => None,
    };
    if let Some(severity) = quality_severity {
        insights.push(Insight {
            category: "data_quality".to_string(),
            severity,
            source: Some(source.to_string()),
            message: format!(
                "Only {} of {} fields from {} were usable",
                cleaned.quality.valid_fields, cleaned.quality.total_fields, source
            ),
        });
    }
    if let Some(utilization) = derived.get("resource_utilization") {
        if *utilization >= HIGH_UTILIZATION {
            insights.push(Insight {
                category: "utilization".to_string(),
                severity: Severity::High,
                source: Some(source.to_string()),
                message: format!("Resource utilization of {} is {:.1}%", source, utilization),
            });
        }
    }
    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SourceOutcome;
    use crate::models::{HealthReport, MetricValue, MetricValues};

    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 3_600_000;

    fn collection(timestamp: i64, sources: &[(&str, Option<f64>)]) -> CollectionResult {
        let per_source = sources
            .iter()
            .map(|(name, cpu)| {
                let outcome = match cpu {
                    Some(cpu) => {
                        let mut values = MetricValues::new();
                        values.insert("cpu_usage".to_string(), MetricValue::Number(*cpu));
                        values.insert("memory_usage".to_string(), MetricValue::Number(50.0));
                        SourceOutcome {
                            success: true,
                            values: Some(values),
                            error: None,
                            duration_ms: 1,
                        }
                    }
                    None => SourceOutcome {
                        success: false,
                        values: None,
                        error: Some("endpoint unavailable".to_string()),
                        duration_ms: 1,
                    },
                };
                (name.to_string(), outcome)
            })
            .collect();
        CollectionResult {
            timestamp,
            per_source,
            aggregated: AggregatedMetrics::new(),
            health: HealthReport::default(),
            newly_disabled: Vec::new(),
        }
    }

    fn processor() -> DataProcessor {
        DataProcessor::new(MonitorConfig::default(), EventBus::new(256))
    }

    #[tokio::test]
    async fn test_process_carries_failures_and_cleans() {
        let processor = processor();
        let result = processor
            .process(&collection(0, &[("system", Some(150.0)), ("broken", None)]))
            .await;

        let system = &result.sources["system"];
        assert!(system.success);
        assert_eq!(system.metrics["cpu_usage"], 100.0);
        assert!((system.derived["resource_utilization"] - 75.0).abs() < 1e-9);
        assert_eq!(system.quality.unwrap().grade, QualityGrade::Excellent);

        let broken = &result.sources["broken"];
        assert!(!broken.success);
        assert_eq!(broken.error.as_deref(), Some("endpoint unavailable"));
        assert!(result
            .insights
            .iter()
            .any(|i| i.category == "collection" && i.source.as_deref() == Some("broken")));
    }

    #[tokio::test]
    async fn test_hourly_aggregation_query() {
        let processor = processor();
        let base = 10 * HOUR;
        for i in 0..120 {
            processor
                .process(&collection(base + i * MINUTE, &[("system", Some(i as f64 % 60.0))]))
                .await;
        }

        let buckets = processor
            .get_aggregated_data(&AggregationQuery {
                start_time: base,
                end_time: base + 2 * HOUR - 1,
                interval: Granularity::Hour,
                sources: None,
                metrics: Some(vec!["cpu_usage".to_string()]),
            })
            .await
            .unwrap();
        assert_eq!(buckets.len(), 2);
        for bucket in &buckets {
            let stats = bucket.metrics["cpu_usage"];
            assert_eq!(stats.count, 60);
            assert!((stats.avg - 29.5).abs() < 1e-9);
        }

        let invalid = processor
            .get_aggregated_data(&AggregationQuery {
                start_time: 10,
                end_time: 0,
                interval: Granularity::Hour,
                sources: None,
                metrics: None,
            })
            .await;
        assert!(matches!(invalid, Err(MonitorError::InvalidTimeRange { .. })));
    }

    #[tokio::test]
    async fn test_anomalies_are_published_and_retained() {
        let events = EventBus::new(256);
        let mut rx = events.subscribe();
        let processor = DataProcessor::new(MonitorConfig::default(), events);

        for i in 0..30 {
            let cpu = 40.0 + (i % 5) as f64;
            processor.process(&collection(i * 1_000, &[("system", Some(cpu))])).await;
        }
        let result = processor
            .process(&collection(30_000, &[("system", Some(99.0))]))
            .await;

        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].metric, "cpu_usage");
        assert!(result.insights.iter().any(|i| i.category == "anomaly"));
        assert_eq!(processor.recent_anomalies(10).await.len(), 1);

        let mut published = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, MonitorEvent::AnomalyDetected(_)) {
                published += 1;
            }
        }
        assert_eq!(published, 1);
    }

    #[tokio::test]
    async fn test_detect_patterns() {
        let processor = processor();
        for i in 0..30 {
            processor
                .process(&collection(i * MINUTE, &[("system", Some(10.0 + 2.0 * i as f64))]))
                .await;
        }

        let findings = processor
            .detect_patterns(&PatternQuery {
                time_range: TimeRange::new(0, 30 * MINUTE),
                sources: Some(vec!["system".to_string()]),
                pattern_types: vec![PatternType::Trend, PatternType::Seasonal],
            })
            .await
            .unwrap();

        let cpu_trend = findings
            .iter()
            .find(|f| f.metric == "cpu_usage")
            .unwrap();
        assert_eq!(cpu_trend.pattern, PatternType::Trend);
        assert_eq!(cpu_trend.direction, Some(crate::models::TrendDirection::Increasing));
        assert!(findings.iter().all(|f| f.pattern == PatternType::Trend));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let processor = Arc::new(processor());
        processor.start().unwrap();
        assert!(matches!(processor.start(), Err(MonitorError::AlreadyRunning)));
        processor.stop().unwrap();
        assert!(matches!(processor.stop(), Err(MonitorError::NotRunning)));
        processor.start().unwrap();
        processor.stop().unwrap();
    }
}
