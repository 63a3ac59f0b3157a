//! Telemetry collector: fans out to every enabled source once per tick,
//! isolates their failures and turns the results into weighted aggregates
//! and a health report.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::{CollectorRegistration, SourceRegistry};
use super::scoring::HealthScorer;
use super::series::MetricSeries;
use super::MetricSource;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::events::{EventBus, MonitorEvent};
use crate::models::{
    now_millis, AggregatedMetrics, HealthReport, MetricSnapshot, MetricValues, TimeRange,
};
use crate::storage::SnapshotStore;

/// Result of `start()`; starting twice is reported, not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// What one source produced during a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<MetricValues>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Output of one `collect_all()` tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResult {
    pub timestamp: i64,
    pub per_source: BTreeMap<String, SourceOutcome>,
    pub aggregated: AggregatedMetrics,
    pub health: HealthReport,
    /// Sources disabled by this tick
    pub newly_disabled: Vec<String>,
}

impl CollectionResult {
    pub fn succeeded(&self) -> usize {
        self.per_source.values().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.per_source.values().filter(|o| !o.success).count()
    }
}

/// Coarse category used to group fields in the aggregates
pub fn infer_category(source: &str) -> String {
    let name = source.to_ascii_lowercase();
    let category = if ["system", "process", "cpu", "memory", "disk"]
        .iter()
        .any(|hint| name.contains(hint))
    {
        "system"
    } else if name.contains("network") || name.contains("net") {
        "network"
    } else {
        "performance"
    };
    category.to_string()
}

/// Weighted average per category and field.
///
/// Each field is divided by the total weight of the sources that actually
/// reported it, so a field missing from one source does not drag the
/// average towards zero.
pub fn weighted_aggregate<'a, I>(inputs: I) -> AggregatedMetrics
where
    I: IntoIterator<Item = (&'a str, f64, &'a MetricValues)>,
{
    let mut accumulators: BTreeMap<String, BTreeMap<String, (f64, f64)>> = BTreeMap::new();
    for (category, weight, values) in inputs {
        if !weight.is_finite() || weight <= 0.0 {
            continue;
        }
        let fields = accumulators.entry(category.to_string()).or_default();
        for (field, value) in values {
            let Some(number) = value.as_number().filter(|v| v.is_finite()) else {
                continue;
            };
            let acc = fields.entry(field.clone()).or_insert((0.0, 0.0));
            acc.0 += number * weight;
            acc.1 += weight;
        }
    }

    accumulators
        .into_iter()
        .filter(|(_, fields)| !fields.is_empty())
        .map(|(category, fields)| {
            let averaged = fields
                .into_iter()
                .map(|(field, (sum, weight))| (field, sum / weight))
                .collect();
            (category, averaged)
        })
        .collect()
}

pub struct TelemetryCollector {
    config: MonitorConfig,
    registry: SourceRegistry,
    series: DashMap<String, MetricSeries>,
    scorer: HealthScorer,
    store: Arc<dyn SnapshotStore>,
    events: EventBus,
    running: AtomicBool,
}

impl TelemetryCollector {
    pub fn new(config: MonitorConfig, store: Arc<dyn SnapshotStore>, events: EventBus) -> Self {
        Self {
            registry: SourceRegistry::new(config.collection.max_consecutive_failures),
            scorer: HealthScorer::new(config.thresholds.clone()),
            series: DashMap::new(),
            store,
            events,
            running: AtomicBool::new(false),
            config,
        }
    }

    /// Register a source under `name`. A duplicate name replaces the old
    /// adapter with a warning; returns true in that case.
    pub fn register(&self, name: &str, source: Arc<dyn MetricSource>) -> bool {
        let options = self.config.source_options(name);
        let category = options
            .category
            .clone()
            .unwrap_or_else(|| infer_category(name));
        let replaced = self
            .registry
            .register(name, source, options.weight, category.clone());
        if replaced {
            warn!(source = %name, "Metric source already registered, overwriting");
        } else {
            info!(source = %name, category = %category, weight = options.weight, "Registered metric source");
        }

        self.events.publish(MonitorEvent::CollectorRegistered {
            name: name.to_string(),
            timestamp: now_millis(),
        });
        replaced
    }

    pub fn start(&self) -> StartOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Telemetry collector already active");
            return StartOutcome::AlreadyActive;
        }
        info!(sources = self.registry.len(), "Telemetry collector started");
        StartOutcome::Started
    }

    pub fn stop(&self) -> StopOutcome {
        if !self.running.swap(false, Ordering::SeqCst) {
            return StopOutcome::AlreadyStopped;
        }
        info!("Telemetry collector stopped");
        StopOutcome::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Collect once from every enabled source.
    ///
    /// Fails only when the collector is not running (or was stopped while
    /// the tick was in flight, in which case the late results are dropped).
    /// Individual source failures are reported per source.
    pub async fn collect_all(&self) -> Result<CollectionResult> {
        if !self.is_running() {
            return Err(MonitorError::NotRunning);
        }

        let timestamp = now_millis();
        let sources = self.registry.enabled_sources();

        let mut handles = Vec::with_capacity(sources.len());
        for (registration, source) in sources {
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result = source.collect().await;
                (result, started.elapsed())
            });
            handles.push((registration, handle));
        }

        // One deadline for the whole fan-out so hung sources cannot stack up
        let timeout = self.config.collection.source_timeout();
        let deadline = Instant::now() + timeout;
        let mut completed = Vec::with_capacity(handles.len());
        for (registration, mut handle) in handles {
            let (result, elapsed) = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => (
                    Err(anyhow::anyhow!("collection task failed: {}", e)),
                    Duration::ZERO,
                ),
                Err(_) => {
                    handle.abort();
                    (
                        Err(anyhow::anyhow!(
                            "collection timed out after {}ms",
                            timeout.as_millis()
                        )),
                        timeout,
                    )
                }
            };
            completed.push((registration, result, elapsed));
        }

        if !self.is_running() {
            debug!("Collector stopped during tick, discarding results");
            return Err(MonitorError::NotRunning);
        }

        let mut per_source = BTreeMap::new();
        let mut newly_disabled = Vec::new();
        let mut successful: Vec<(CollectorRegistration, MetricValues)> = Vec::new();

        for (registration, result, elapsed) in completed {
            let duration_ms = elapsed.as_millis() as u64;
            match result {
                Ok(values) => {
                    self.store_snapshot(MetricSnapshot {
                        source: registration.name.clone(),
                        timestamp,
                        values: values.clone(),
                        duration_ms,
                    })
                    .await;
                    self.registry.record_success(&registration.name, timestamp);
                    per_source.insert(
                        registration.name.clone(),
                        SourceOutcome {
                            success: true,
                            values: Some(values.clone()),
                            error: None,
                            duration_ms,
                        },
                    );
                    successful.push((registration, values));
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(source = %registration.name, error = %error, "Metric source collection failed");
                    if self
                        .registry
                        .record_failure(&registration.name, timestamp, &error)
                    {
                        let consecutive_failures = self
                            .registry
                            .get(&registration.name)
                            .map(|r| r.consecutive_failures)
                            .unwrap_or_default();
                        self.events.publish(MonitorEvent::CollectorDisabled {
                            name: registration.name.clone(),
                            consecutive_failures,
                            timestamp,
                        });
                        newly_disabled.push(registration.name.clone());
                    }
                    per_source.insert(
                        registration.name,
                        SourceOutcome {
                            success: false,
                            values: None,
                            error: Some(error),
                            duration_ms,
                        },
                    );
                }
            }
        }

        let aggregated = weighted_aggregate(
            successful
                .iter()
                .map(|(r, values)| (r.category.as_str(), r.weight, values)),
        );
        let health = self.scorer.score_aggregated(&aggregated);

        debug!(
            sources = per_source.len(),
            failed = per_source.values().filter(|o| !o.success).count(),
            health = health.overall.value,
            "Collection tick complete"
        );

        Ok(CollectionResult {
            timestamp,
            per_source,
            aggregated,
            health,
            newly_disabled,
        })
    }

    async fn store_snapshot(&self, snapshot: MetricSnapshot) {
        if let Err(e) = self.store.append(&snapshot).await {
            warn!(source = %snapshot.source, error = %e, "Failed to persist snapshot");
        }

        let cutoff = snapshot.timestamp - self.config.retention.max_age_ms();
        let mut series = self
            .series
            .entry(snapshot.source.clone())
            .or_insert_with(|| MetricSeries::new(self.config.retention.max_snapshots));
        if !series.push(snapshot) {
            debug!("Dropped out-of-order snapshot");
        }
        series.prune_before(cutoff);
    }

    pub fn enable_source(&self, name: &str) -> Result<CollectorRegistration> {
        self.registry.set_enabled(name, true)
    }

    pub fn disable_source(&self, name: &str) -> Result<CollectorRegistration> {
        self.registry.set_enabled(name, false)
    }

    pub fn registrations(&self) -> Vec<CollectorRegistration> {
        self.registry.list()
    }

    pub fn registration(&self, name: &str) -> Option<CollectorRegistration> {
        self.registry.get(name)
    }

    pub fn source_count(&self) -> usize {
        self.registry.len()
    }

    pub fn disabled_count(&self) -> usize {
        self.registry.disabled_count()
    }

    /// Copy of the retained snapshots for `source`
    pub fn series(&self, source: &str) -> Vec<MetricSnapshot> {
        self.series
            .get(source)
            .map(|series| series.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Retained snapshots within `range`, optionally restricted to some sources
    pub fn snapshots_in_range(
        &self,
        sources: Option<&[String]>,
        range: &TimeRange,
    ) -> BTreeMap<String, Vec<MetricSnapshot>> {
        self.series
            .iter()
            .filter(|entry| sources.map_or(true, |s| s.contains(entry.key())))
            .map(|entry| (entry.key().clone(), entry.value().in_range(range)))
            .filter(|(_, snapshots)| !snapshots.is_empty())
            .collect()
    }

    pub fn latest_snapshot(&self, source: &str) -> Option<MetricSnapshot> {
        self.series
            .get(source)
            .and_then(|series| series.latest().cloned())
    }

    pub fn latest_snapshots(&self) -> BTreeMap<String, MetricSnapshot> {
        self.series
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .latest()
                    .map(|snapshot| (entry.key().clone(), snapshot.clone()))
            })
            .collect()
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.store.clone()
    }
}
