//! Observability infrastructure for the monitoring pipeline
//!
//! Provides:
//! - Prometheus metrics (collection latency, source counts, detections, health)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{Anomaly, Bottleneck, Severity};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    collection_latency_seconds: Histogram,
    sources_registered: IntGauge,
    sources_disabled: IntGauge,
    collection_errors: IntCounter,
    anomalies_detected: IntCounter,
    bottlenecks_detected: IntCounter,
    ticks_skipped: IntCounter,
    health_score: Gauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "perf_monitor_collection_latency_seconds",
                "Time spent on one full collection tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            sources_registered: register_int_gauge!(
                "perf_monitor_sources_registered",
                "Number of registered metric sources"
            )
            .expect("Failed to register sources_registered"),

            sources_disabled: register_int_gauge!(
                "perf_monitor_sources_disabled",
                "Number of metric sources currently disabled"
            )
            .expect("Failed to register sources_disabled"),

            collection_errors: register_int_counter!(
                "perf_monitor_collection_errors_total",
                "Total number of failed source collections"
            )
            .expect("Failed to register collection_errors"),

            anomalies_detected: register_int_counter!(
                "perf_monitor_anomalies_detected_total",
                "Total number of anomalies detected"
            )
            .expect("Failed to register anomalies_detected"),

            bottlenecks_detected: register_int_counter!(
                "perf_monitor_bottlenecks_detected_total",
                "Total number of sustained bottlenecks detected"
            )
            .expect("Failed to register bottlenecks_detected"),

            ticks_skipped: register_int_counter!(
                "perf_monitor_ticks_skipped_total",
                "Collection ticks skipped because the previous tick was still running"
            )
            .expect("Failed to register ticks_skipped"),

            health_score: register_gauge!(
                "perf_monitor_health_score",
                "Overall health score (0-100) of the last collection"
            )
            .expect("Failed to register health_score"),
        }
    }
}

/// Lightweight handle to the global Prometheus metrics.
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn set_sources(&self, registered: usize, disabled: usize) {
        self.inner().sources_registered.set(registered as i64);
        self.inner().sources_disabled.set(disabled as i64);
    }

    pub fn add_collection_errors(&self, count: usize) {
        self.inner().collection_errors.inc_by(count as u64);
    }

    pub fn add_anomalies(&self, count: usize) {
        self.inner().anomalies_detected.inc_by(count as u64);
    }

    pub fn add_bottlenecks(&self, count: usize) {
        self.inner().bottlenecks_detected.inc_by(count as u64);
    }

    pub fn inc_ticks_skipped(&self) {
        self.inner().ticks_skipped.inc();
    }

    pub fn set_health_score(&self, score: f64) {
        self.inner().health_score.set(score);
    }
}

/// Structured logger for pipeline events
///
/// Emits one consistently shaped log line per significant event so log
/// pipelines can key on the `event` field.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, sources: usize, interval_ms: u64) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            version = %version,
            sources = sources,
            interval_ms = interval_ms,
            "Performance monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Performance monitor shutting down"
        );
    }

    pub fn log_source_disabled(&self, source: &str, consecutive_failures: u32, last_error: &str) {
        warn!(
            event = "source_disabled",
            instance = %self.instance,
            source = %source,
            consecutive_failures = consecutive_failures,
            last_error = %last_error,
            "Metric source disabled after repeated failures"
        );
    }

    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        match anomaly.severity {
            Severity::High | Severity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    source = %anomaly.source,
                    metric = %anomaly.metric,
                    value = anomaly.value,
                    deviation = anomaly.deviation_score,
                    algorithm = %anomaly.algorithm,
                    severity = %anomaly.severity,
                    "High severity anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    source = %anomaly.source,
                    metric = %anomaly.metric,
                    value = anomaly.value,
                    deviation = anomaly.deviation_score,
                    algorithm = %anomaly.algorithm,
                    severity = %anomaly.severity,
                    "Anomaly detected"
                );
            }
        }
    }

    pub fn log_bottleneck(&self, bottleneck: &Bottleneck) {
        warn!(
            event = "bottleneck_detected",
            instance = %self.instance,
            source = %bottleneck.source,
            metric = %bottleneck.kind,
            severity = %bottleneck.severity,
            duration_ms = bottleneck.duration_ms,
            max_value = bottleneck.max_value,
            avg_value = bottleneck.avg_value,
            "Sustained bottleneck detected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_handles_share_registry() {
        let metrics = MonitorMetrics::new();
        let other = metrics.clone();

        metrics.observe_collection_latency(0.002);
        metrics.set_sources(3, 1);
        other.add_collection_errors(2);
        other.add_anomalies(1);
        other.inc_ticks_skipped();
        other.set_health_score(87.5);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "perf_monitor_sources_registered"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance, "test-instance");
    }
}
