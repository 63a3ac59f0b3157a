//! Monitoring orchestrator
//!
//! Wires the collector, processor and analyzer together, owns the periodic
//! collection loop and exposes the read-only query surface used by the HTTP
//! API and dashboards.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertManager};
use crate::analyzer::{
    Analysis, AnalysisOptions, AnalyzerState, Forecast, PerformanceAnalyzer, PredictionRequest,
    Suggestion,
};
use crate::collector::{CollectionResult, CollectorRegistration, MetricSource, TelemetryCollector};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::events::{CollectionSummary, EventBus, MonitorEvent};
use crate::models::{
    now_millis, AggregatedMetrics, Anomaly, Bottleneck, Granularity, HealthReport, HealthScore,
    MetricSnapshot, TimeRange,
};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::processor::{
    AggregationBucket, AggregationQuery, DataProcessor, Insight, ProcessedResult,
};
use crate::schedule::Ticker;
use crate::storage::{MemoryStore, SnapshotStore};

/// Everything one collection tick produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub collection: CollectionResult,
    pub processed: ProcessedResult,
    pub bottlenecks: Vec<Bottleneck>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentMetrics {
    /// Timestamp of the last completed tick
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Latest snapshot per source
    pub snapshots: BTreeMap<String, MetricSnapshot>,
    pub aggregated: AggregatedMetrics,
    pub health: HealthReport,
    pub anomalies: Vec<Anomaly>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalQuery {
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collectors: Option<Vec<String>>,
    /// When set, bucketed statistics are returned alongside the raw series
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Granularity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMetrics {
    pub time_range: TimeRange,
    pub snapshots: BTreeMap<String, Vec<MetricSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<AggregationBucket>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    pub uptime_ms: i64,
    pub analyzer_state: AnalyzerState,
    pub processor_running: bool,
    pub sources_registered: usize,
    pub sources_disabled: usize,
    pub ticks_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_collection: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    pub status: MonitorStatus,
    pub current: CurrentMetrics,
    pub collectors: Vec<CollectorRegistration>,
    pub recent_anomalies: Vec<Anomaly>,
    pub active_alerts: Vec<Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_analysis: Option<Analysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub analysis: Analysis,
    /// Active alerts after the analysis was evaluated
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<Suggestion>,
}

/// Anomalies shown on the dashboard
const DASHBOARD_ANOMALIES: usize = 20;

struct LastTick {
    collection: CollectionResult,
    processed: ProcessedResult,
}

pub struct MonitoringOrchestrator {
    config: MonitorConfig,
    collector: Arc<TelemetryCollector>,
    processor: Arc<DataProcessor>,
    analyzer: Arc<PerformanceAnalyzer>,
    alerts: AlertManager,
    events: EventBus,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    running: AtomicBool,
    started_at: Mutex<Option<i64>>,
    /// Serializes ticks: manual calls wait, scheduled ticks skip
    tick_lock: tokio::sync::Mutex<()>,
    ticks_completed: AtomicU64,
    last_tick: RwLock<Option<LastTick>>,
    collection_loop: Ticker,
}

impl MonitoringOrchestrator {
    pub fn new(config: MonitorConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let events = EventBus::new(config.events.capacity);
        Self {
            collector: Arc::new(TelemetryCollector::new(
                config.clone(),
                store.clone(),
                events.clone(),
            )),
            processor: Arc::new(DataProcessor::new(config.clone(), events.clone())),
            analyzer: Arc::new(PerformanceAnalyzer::new(config.clone(), store, events.clone())),
            alerts: AlertManager::new(&config.alerts),
            events,
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("perf-monitor"),
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            tick_lock: tokio::sync::Mutex::new(()),
            ticks_completed: AtomicU64::new(0),
            last_tick: RwLock::new(None),
            collection_loop: Ticker::new(),
            config,
        }
    }

    /// Orchestrator backed by a bounded in-memory store
    pub fn in_memory(config: MonitorConfig) -> Self {
        let store = Arc::new(MemoryStore::new(config.retention.max_snapshots.max(1) * 16));
        Self::new(config, store)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start collector, processor, analyzer and then the collection loop
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }

        self.collector.start();
        self.processor.start()?;
        self.analyzer.start().await?;

        let orchestrator = Arc::downgrade(self);
        self.collection_loop
            .spawn(self.config.collection.interval(), "collection", move || {
                let orchestrator = orchestrator.clone();
                async move {
                    if let Some(orchestrator) = orchestrator.upgrade() {
                        orchestrator.scheduled_tick().await;
                    }
                }
            });

        let now = now_millis();
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
        self.refresh_source_gauges();
        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            self.collector.source_count(),
            self.config.collection.interval_ms,
        );
        self.events.publish(MonitorEvent::Started { timestamp: now });
        Ok(())
    }

    /// Stop in reverse order. In-flight ticks finish but their results are
    /// discarded.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(MonitorError::NotRunning);
        }

        self.collection_loop.cancel();
        // Tear everything down even if one component refuses; report the first error
        let analyzer = self.analyzer.stop().await;
        let processor = self.processor.stop();
        self.collector.stop();
        if let Err(e) = &analyzer {
            warn!(error = %e, "Analyzer did not stop cleanly");
        }
        if let Err(e) = &processor {
            warn!(error = %e, "Processor did not stop cleanly");
        }

        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.logger.log_shutdown("stop requested");
        self.events.publish(MonitorEvent::Stopped {
            timestamp: now_millis(),
        });
        analyzer.and(processor)
    }

    pub fn register_source(&self, name: &str, source: Arc<dyn MetricSource>) -> bool {
        let replaced = self.collector.register(name, source);
        self.refresh_source_gauges();
        replaced
    }

    /// Run one full tick now, waiting for an in-flight tick to finish first
    pub async fn collect_metrics(&self) -> Result<TickReport> {
        let _guard = self.tick_lock.lock().await;
        self.run_tick().await
    }

    async fn scheduled_tick(&self) {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            self.metrics.inc_ticks_skipped();
            debug!("Previous collection tick still running, skipping");
            return;
        };
        match self.run_tick().await {
            Ok(report) => debug!(
                sources = report.collection.per_source.len(),
                anomalies = report.processed.anomalies.len(),
                alerts = report.alerts.len(),
                "Collection tick complete"
            ),
            Err(MonitorError::NotRunning) => debug!("Collection tick discarded, monitor stopped"),
            Err(e) => warn!(error = %e, "Collection tick failed"),
        }
    }

    async fn run_tick(&self) -> Result<TickReport> {
        if !self.is_running() {
            return Err(MonitorError::NotRunning);
        }
        let started = Instant::now();

        let collection = self.collector.collect_all().await?;
        let processed = self.processor.process(&collection).await;
        let bottlenecks = self.analyzer.update_metrics(&processed).await;

        if !self.is_running() {
            return Err(MonitorError::NotRunning);
        }

        let timestamp = collection.timestamp;
        let mut raised = Vec::new();
        for anomaly in &processed.anomalies {
            self.logger.log_anomaly(anomaly);
            raised.extend(self.alerts.on_anomaly(anomaly));
        }
        for bottleneck in &bottlenecks {
            self.logger.log_bottleneck(bottleneck);
            raised.extend(self.alerts.on_bottleneck(bottleneck));
        }
        raised.extend(self.alerts.on_health(&collection.health, timestamp));
        for name in &collection.newly_disabled {
            let registration = self.collector.registration(name);
            self.logger.log_source_disabled(
                name,
                registration
                    .as_ref()
                    .map(|r| r.consecutive_failures)
                    .unwrap_or_default(),
                registration
                    .as_ref()
                    .and_then(|r| r.last_error.as_deref())
                    .unwrap_or("unknown"),
            );
            raised.extend(self.alerts.on_source_disabled(name, timestamp));
        }
        for alert in &raised {
            self.events.publish(MonitorEvent::AlertRaised(alert.clone()));
        }

        self.metrics
            .observe_collection_latency(started.elapsed().as_secs_f64());
        self.metrics.add_collection_errors(collection.failed());
        self.metrics.add_anomalies(processed.anomalies.len());
        self.metrics.add_bottlenecks(bottlenecks.len());
        self.metrics
            .set_health_score(collection.health.overall.value);
        self.refresh_source_gauges();

        self.events
            .publish(MonitorEvent::MetricsCollected(CollectionSummary {
                timestamp,
                sources_total: collection.per_source.len(),
                sources_succeeded: collection.succeeded(),
                sources_failed: collection.failed(),
                health: collection.health.overall,
                anomalies: processed.anomalies.len(),
            }));

        *self.last_tick.write().await = Some(LastTick {
            collection: collection.clone(),
            processed: processed.clone(),
        });
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);

        Ok(TickReport {
            collection,
            processed,
            bottlenecks,
            alerts: raised,
        })
    }

    fn refresh_source_gauges(&self) {
        self.metrics.set_sources(
            self.collector.source_count(),
            self.collector.disabled_count(),
        );
    }

    pub async fn get_current_metrics(&self) -> CurrentMetrics {
        let last = self.last_tick.read().await;
        let snapshots = self.collector.latest_snapshots();
        match last.as_ref() {
            Some(tick) => CurrentMetrics {
                timestamp: Some(tick.collection.timestamp),
                snapshots,
                aggregated: tick.collection.aggregated.clone(),
                health: tick.collection.health.clone(),
                anomalies: tick.processed.anomalies.clone(),
                insights: tick.processed.insights.clone(),
            },
            None => CurrentMetrics {
                timestamp: None,
                snapshots,
                aggregated: AggregatedMetrics::new(),
                health: HealthReport::default(),
                anomalies: Vec::new(),
                insights: Vec::new(),
            },
        }
    }

    pub async fn get_historical_metrics(&self, query: &HistoricalQuery) -> Result<HistoricalMetrics> {
        let range = TimeRange::new(query.start_time, query.end_time);
        if !range.is_valid() {
            return Err(MonitorError::InvalidTimeRange {
                start: query.start_time,
                end: query.end_time,
            });
        }

        let snapshots = self
            .stored_snapshots(query.collectors.as_deref(), &range)
            .await;
        let buckets = match query.aggregation {
            Some(interval) => Some(
                self.processor
                    .get_aggregated_data(&AggregationQuery {
                        start_time: query.start_time,
                        end_time: query.end_time,
                        interval,
                        sources: query.collectors.clone(),
                        metrics: None,
                    })
                    .await?,
            ),
            None => None,
        };

        Ok(HistoricalMetrics {
            time_range: range,
            snapshots,
            buckets,
        })
    }

    /// Durable history from the snapshot store, falling back to the
    /// in-memory series when the store cannot be read
    async fn stored_snapshots(
        &self,
        sources: Option<&[String]>,
        range: &TimeRange,
    ) -> BTreeMap<String, Vec<MetricSnapshot>> {
        match self.collector.store().query(None, *range).await {
            Ok(stored) => {
                let mut grouped: BTreeMap<String, Vec<MetricSnapshot>> = BTreeMap::new();
                for snapshot in stored
                    .into_iter()
                    .filter(|s| sources.map_or(true, |wanted| wanted.contains(&s.source)))
                {
                    grouped.entry(snapshot.source.clone()).or_default().push(snapshot);
                }
                grouped
            }
            Err(e) => {
                warn!(error = %e, "Snapshot store query failed, using retained series");
                self.collector.snapshots_in_range(sources, range)
            }
        }
    }

    pub async fn get_dashboard_data(&self) -> DashboardData {
        DashboardData {
            status: self.status().await,
            current: self.get_current_metrics().await,
            collectors: self.collector.registrations(),
            recent_anomalies: self.processor.recent_anomalies(DASHBOARD_ANOMALIES).await,
            active_alerts: self.alerts.active(now_millis()),
            last_analysis: self.analyzer.last_analysis().await,
        }
    }

    /// Run an analysis and raise alerts for the bottlenecks it found
    pub async fn analyze_performance(&self, options: AnalysisOptions) -> PerformanceReport {
        let analysis = self.analyzer.analyze_all(options).await;
        if let Some(error) = &analysis.error {
            warn!(error = %error, "Performance analysis failed");
        }

        for bottleneck in &analysis.bottlenecks {
            if let Some(alert) = self.alerts.on_bottleneck(bottleneck) {
                self.events.publish(MonitorEvent::AlertRaised(alert));
            }
        }

        let recommendations = analysis
            .optimization
            .as_ref()
            .map(|plan| plan.suggestions.clone())
            .unwrap_or_default();
        info!(
            bottlenecks = analysis.summary.bottlenecks,
            trends = analysis.summary.trends,
            recommendations = recommendations.len(),
            "Performance analysis complete"
        );

        PerformanceReport {
            alerts: self.alerts.active(now_millis()),
            analysis,
            recommendations,
        }
    }

    pub async fn predict_performance(&self, request: &PredictionRequest) -> Vec<Forecast> {
        self.analyzer.predict_performance(request).await
    }

    pub fn collectors(&self) -> Vec<CollectorRegistration> {
        self.collector.registrations()
    }

    /// Re-enable a source, resetting its failure streak
    pub fn enable_collector(&self, name: &str) -> Result<CollectorRegistration> {
        let registration = self.collector.enable_source(name)?;
        info!(source = %name, "Metric source re-enabled");
        self.refresh_source_gauges();
        Ok(registration)
    }

    pub fn disable_collector(&self, name: &str) -> Result<CollectorRegistration> {
        let registration = self.collector.disable_source(name)?;
        info!(source = %name, "Metric source disabled by operator");
        self.refresh_source_gauges();
        Ok(registration)
    }

    pub async fn status(&self) -> MonitorStatus {
        let started_at = *self.started_at.lock().unwrap_or_else(PoisonError::into_inner);
        let last = self.last_tick.read().await;
        MonitorStatus {
            running: self.is_running(),
            started_at,
            uptime_ms: started_at.map_or(0, |t| (now_millis() - t).max(0)),
            analyzer_state: self.analyzer.state(),
            processor_running: self.processor.is_running(),
            sources_registered: self.collector.source_count(),
            sources_disabled: self.collector.disabled_count(),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            last_collection: last.as_ref().map(|t| t.collection.timestamp),
            health: last.as_ref().map(|t| t.collection.health.overall),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.history()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKind;
    use crate::models::{MetricValue, MetricValues, Severity, Threshold};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SystemSource {
        cpu: f64,
    }

    #[async_trait::async_trait]
    impl MetricSource for SystemSource {
        async fn collect(&self) -> anyhow::Result<MetricValues> {
            let mut values = MetricValues::new();
            values.insert("cpu_usage".to_string(), MetricValue::Number(self.cpu));
            values.insert("memory_usage".to_string(), MetricValue::Number(40.0));
            Ok(values)
        }
    }

    struct BrokenSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetricSource for BrokenSource {
        async fn collect(&self) -> anyhow::Result<MetricValues> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
    }

    struct HungSource;

    #[async_trait::async_trait]
    impl MetricSource for HungSource {
        async fn collect(&self) -> anyhow::Result<MetricValues> {
            std::future::pending::<anyhow::Result<MetricValues>>().await
        }
    }

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.collection.interval_ms = 1_000;
        config
            .thresholds
            .insert("cpu_usage".to_string(), Threshold::new(80.0, 90.0));
        config
    }

    fn orchestrator(config: MonitorConfig) -> Arc<MonitoringOrchestrator> {
        Arc::new(MonitoringOrchestrator::in_memory(config))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let monitor = orchestrator(config());
        assert!(matches!(monitor.stop().await, Err(MonitorError::NotRunning)));

        monitor.start().await.unwrap();
        assert!(matches!(monitor.start().await, Err(MonitorError::AlreadyRunning)));
        let status = monitor.status().await;
        assert!(status.running);
        assert_eq!(status.analyzer_state, AnalyzerState::Running);

        monitor.stop().await.unwrap();
        assert!(matches!(monitor.stop().await, Err(MonitorError::NotRunning)));
        let status = monitor.status().await;
        assert!(!status.running);
        assert!(!status.processor_running);
        assert_eq!(status.analyzer_state, AnalyzerState::Stopped);

        monitor.register_source("system", Arc::new(SystemSource { cpu: 20.0 }));
        monitor.start().await.unwrap();
        let report = monitor.collect_metrics().await.unwrap();
        assert_eq!(report.collection.succeeded(), 1);
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_requires_running() {
        let monitor = orchestrator(config());
        monitor.register_source("system", Arc::new(SystemSource { cpu: 20.0 }));
        assert!(matches!(
            monitor.collect_metrics().await,
            Err(MonitorError::NotRunning)
        ));
        assert_eq!(monitor.status().await.ticks_completed, 0);
    }

    #[tokio::test]
    async fn test_tick_populates_current_metrics_and_events() {
        let monitor = orchestrator(config());
        monitor.register_source("system", Arc::new(SystemSource { cpu: 50.0 }));
        let mut rx = monitor.subscribe();
        monitor.start().await.unwrap();

        monitor.collect_metrics().await.unwrap();
        let current = monitor.get_current_metrics().await;
        assert!(current.timestamp.is_some());
        assert!(current.snapshots.contains_key("system"));
        assert_eq!(current.aggregated["system"]["cpu_usage"], 50.0);
        assert_eq!(current.health.overall.value, 100.0);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&"started"));
        assert!(names.contains(&"metrics-collected"));
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_source_disabled_and_alerted() {
        let monitor = orchestrator(config());
        let broken = Arc::new(BrokenSource {
            calls: AtomicUsize::new(0),
        });
        monitor.register_source("broken", broken.clone());
        monitor.start().await.unwrap();

        for _ in 0..6 {
            monitor.collect_metrics().await.unwrap();
        }
        assert!(!monitor.collectors()[0].enabled);
        let alerts = monitor.alerts();
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::SourceDisabled && a.source == "broken"));

        monitor.collect_metrics().await.unwrap();
        assert_eq!(broken.calls.load(Ordering::SeqCst), 6);

        let registration = monitor.enable_collector("broken").unwrap();
        assert!(registration.enabled);
        assert_eq!(registration.consecutive_failures, 0);
        assert!(matches!(
            monitor.enable_collector("missing"),
            Err(MonitorError::UnknownSource(_))
        ));
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sustained_breach_raises_bottleneck_alert() {
        let mut config = config();
        config.bottleneck.sustained_duration_secs = 0;
        let monitor = orchestrator(config);
        monitor.register_source("system", Arc::new(SystemSource { cpu: 95.0 }));
        monitor.start().await.unwrap();

        let report = monitor.collect_metrics().await.unwrap();
        assert_eq!(report.bottlenecks.len(), 1);
        assert_eq!(report.bottlenecks[0].severity, Severity::Critical);
        assert!(report.alerts.iter().any(|a| a.kind == AlertKind::Bottleneck));

        let performance = monitor.analyze_performance(AnalysisOptions::default()).await;
        assert!(performance.analysis.error.is_none());
        assert!(!performance.analysis.bottlenecks.is_empty());
        assert!(performance
            .recommendations
            .iter()
            .any(|s| s.category == "bottleneck"));
        // Already alerted during the tick
        assert_eq!(
            performance
                .alerts
                .iter()
                .filter(|a| a.kind == AlertKind::Bottleneck)
                .count(),
            1
        );
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_historical_query() {
        let monitor = orchestrator(config());
        monitor.register_source("system", Arc::new(SystemSource { cpu: 30.0 }));
        monitor.start().await.unwrap();
        for _ in 0..3 {
            monitor.collect_metrics().await.unwrap();
        }

        let now = now_millis();
        let history = monitor
            .get_historical_metrics(&HistoricalQuery {
                start_time: now - 60_000,
                end_time: now + 1_000,
                collectors: Some(vec!["system".to_string()]),
                aggregation: Some(Granularity::Minute),
            })
            .await
            .unwrap();
        assert_eq!(history.snapshots["system"].len(), 3);
        let buckets = history.buckets.unwrap();
        let samples: u64 = buckets.iter().map(|b| b.metrics["cpu_usage"].count).sum();
        assert_eq!(samples, 3);

        let invalid = monitor
            .get_historical_metrics(&HistoricalQuery {
                start_time: now,
                end_time: now - 1,
                collectors: None,
                aggregation: None,
            })
            .await;
        assert!(matches!(invalid, Err(MonitorError::InvalidTimeRange { .. })));
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_dashboard_data() {
        let monitor = orchestrator(config());
        monitor.register_source("system", Arc::new(SystemSource { cpu: 30.0 }));
        monitor.start().await.unwrap();
        monitor.collect_metrics().await.unwrap();

        let dashboard = monitor.get_dashboard_data().await;
        assert!(dashboard.status.running);
        assert_eq!(dashboard.status.ticks_completed, 1);
        assert_eq!(dashboard.collectors.len(), 1);
        assert!(dashboard.active_alerts.is_empty());
        assert!(serde_json::to_value(&dashboard).is_ok());
        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_collection_loop_runs_on_interval() {
        let monitor = orchestrator(config());
        monitor.register_source("system", Arc::new(SystemSource { cpu: 30.0 }));
        monitor.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(monitor.status().await.ticks_completed >= 2);

        monitor.stop().await.unwrap();
        let after_stop = monitor.status().await.ticks_completed;
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(monitor.status().await.ticks_completed, after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_source_does_not_stall_ticks() {
        let monitor = orchestrator(config());
        monitor.register_source("hung", Arc::new(HungSource));
        monitor.register_source("system", Arc::new(SystemSource { cpu: 30.0 }));
        monitor.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert!(monitor.status().await.ticks_completed >= 3);

        let report = tokio::time::timeout(Duration::from_secs(2), monitor.collect_metrics())
            .await
            .expect("manual tick should not hang")
            .unwrap();
        assert!(report.collection.per_source["system"].success);

        let hung = monitor
            .collectors()
            .into_iter()
            .find(|r| r.name == "hung")
            .unwrap();
        assert!(hung.error_count >= 3);
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_tears_down_despite_analyzer_error() {
        let monitor = orchestrator(config());
        monitor.register_source("system", Arc::new(SystemSource { cpu: 30.0 }));
        monitor.start().await.unwrap();
        // Leave the analyzer in a state its own stop rejects
        monitor.analyzer.stop().await.unwrap();

        assert!(matches!(
            monitor.stop().await,
            Err(MonitorError::InvalidState { .. })
        ));
        let status = monitor.status().await;
        assert!(!status.running);
        assert!(!status.processor_running);
        assert!(!monitor.collector.is_running());
        assert!(matches!(monitor.stop().await, Err(MonitorError::NotRunning)));

        // A clean restart is still possible
        monitor.start().await.unwrap();
        monitor.collect_metrics().await.unwrap();
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_history_read_from_store_after_restart() {
        let store = Arc::new(MemoryStore::default());
        let first = Arc::new(MonitoringOrchestrator::new(config(), store.clone()));
        first.register_source("system", Arc::new(SystemSource { cpu: 30.0 }));
        first.start().await.unwrap();
        for _ in 0..3 {
            first.collect_metrics().await.unwrap();
        }
        first.stop().await.unwrap();

        let second = Arc::new(MonitoringOrchestrator::new(config(), store));
        let now = now_millis();
        let history = second
            .get_historical_metrics(&HistoricalQuery {
                start_time: now - 60_000,
                end_time: now + 1_000,
                collectors: Some(vec!["system".to_string()]),
                aggregation: None,
            })
            .await
            .unwrap();
        assert_eq!(history.snapshots["system"].len(), 3);
        assert!(second.get_current_metrics().await.snapshots.is_empty());
    }
}
