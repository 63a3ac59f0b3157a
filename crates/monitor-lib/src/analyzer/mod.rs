//! Performance analysis over processed history
//!
//! Handles:
//! - Sustained bottleneck detection against configured thresholds
//! - Per-metric linear trend models and forecasts
//! - Anomaly replay over a requested window
//! - A prioritized, costed optimization plan
//!
//! Lifecycle: stopped -> starting -> running -> stopping -> stopped.

mod bottleneck;
mod optimization;
mod trend;

pub use bottleneck::{breach_severity, detect_sustained};
pub use optimization::{
    build_plan, from_anomalies, from_bottlenecks, from_trends, CostLevel, ImplementationPlan,
    OptimizationPlan, Priority, Suggestion,
};
pub use trend::{analyze_trend, ForecastPoint, TrendAnalysis, TrendModel};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::events::{EventBus, MonitorEvent};
use crate::models::{metric_key, now_millis, Anomaly, Bottleneck, Severity, TimeRange, TrendDirection};
use crate::processor::{AnomalyDetector, ProcessedResult};
use crate::schedule::Ticker;
use crate::storage::SnapshotStore;

/// Key under which the analyzer persists its state on stop
pub const STATE_KEY: &str = "analyzer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for AnalyzerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerState::Stopped => write!(f, "stopped"),
            AnalyzerState::Starting => write!(f, "starting"),
            AnalyzerState::Running => write!(f, "running"),
            AnalyzerState::Stopping => write!(f, "stopping"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Which analyses to run over which window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Defaults to the configured lookback ending now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default = "default_true")]
    pub include_anomaly: bool,
    #[serde(default = "default_true")]
    pub include_bottleneck: bool,
    #[serde(default = "default_true")]
    pub include_trend: bool,
    #[serde(default = "default_true")]
    pub include_optimization: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            time_range: None,
            include_anomaly: true,
            include_bottleneck: true,
            include_trend: true,
            include_optimization: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub metrics_analyzed: usize,
    pub bottlenecks: usize,
    pub trends: usize,
    pub anomalies: usize,
    /// Critical bottlenecks plus high-severity anomalies
    pub critical_issues: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub time_range: TimeRange,
    pub generated_at: i64,
    pub bottlenecks: Vec<Bottleneck>,
    pub trends: Vec<TrendAnalysis>,
    pub anomalies: Vec<Anomaly>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationPlan>,
    pub summary: AnalysisSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Analysis {
    fn failed(time_range: TimeRange, error: impl fmt::Display) -> Self {
        Self {
            time_range,
            generated_at: now_millis(),
            bottlenecks: Vec::new(),
            trends: Vec::new(),
            anomalies: Vec::new(),
            optimization: None,
            summary: AnalysisSummary::default(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Steps to forecast; 0 uses the configured default
    #[serde(default)]
    pub forecast_horizon: usize,
    /// `source.metric` keys; all trained models when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<String>>,
    /// Minimum r² a model needs to be used
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub metric: String,
    pub direction: TrendDirection,
    pub slope: f64,
    /// r² of the underlying fit
    pub confidence: f64,
    pub points: Vec<ForecastPoint>,
}

/// Time-ordered points of one `source.metric`
#[derive(Debug, Clone)]
struct MetricHistory {
    source: String,
    metric: String,
    points: VecDeque<(i64, f64)>,
}

impl MetricHistory {
    fn in_range(&self, range: &TimeRange) -> Vec<(i64, f64)> {
        self.points
            .iter()
            .filter(|(t, _)| range.contains(*t))
            .copied()
            .collect()
    }

    fn all(&self) -> Vec<(i64, f64)> {
        self.points.iter().copied().collect()
    }
}

/// What the analyzer persists on stop and restores on start
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    stopped_at: i64,
    #[serde(default)]
    models: BTreeMap<String, TrendModel>,
    #[serde(default)]
    last_analysis: Option<Analysis>,
}

#[derive(Default)]
struct AnalyzerInner {
    history: HashMap<String, MetricHistory>,
    models: BTreeMap<String, TrendModel>,
    /// Start of the announced breach still open per key
    open_breaches: HashMap<String, i64>,
    last_analysis: Option<Analysis>,
}

pub struct PerformanceAnalyzer {
    config: MonitorConfig,
    inner: RwLock<AnalyzerInner>,
    state: Mutex<AnalyzerState>,
    events: EventBus,
    store: Arc<dyn SnapshotStore>,
    ticker: Ticker,
}

impl PerformanceAnalyzer {
    pub fn new(config: MonitorConfig, store: Arc<dyn SnapshotStore>, events: EventBus) -> Self {
        Self {
            config,
            inner: RwLock::new(AnalyzerInner::default()),
            state: Mutex::new(AnalyzerState::Stopped),
            events,
            store,
            ticker: Ticker::new(),
        }
    }

    pub fn state(&self) -> AnalyzerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, from: AnalyzerState, to: AnalyzerState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(MonitorError::InvalidState {
                component: "analyzer",
                state: state.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    /// Create untrained models for the tracked metrics and begin the
    /// periodic self-analysis.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.transition(AnalyzerState::Stopped, AnalyzerState::Starting)?;
        let restored = self.load_state().await;

        {
            let mut inner = self.inner.write().await;
            if let Some(restored) = restored {
                let count = restored.models.len();
                for (key, model) in restored.models {
                    inner.models.entry(key).or_insert(model);
                }
                if inner.last_analysis.is_none() {
                    inner.last_analysis = restored.last_analysis;
                }
                info!(models = count, stopped_at = restored.stopped_at, "Restored analyzer state");
            }
            let mut keys: Vec<String> = inner.history.keys().cloned().collect();
            keys.extend(self.config.analysis.tracked_metrics.iter().cloned());
            for key in keys {
                inner
                    .models
                    .entry(key.clone())
                    .or_insert_with(|| TrendModel::untrained(key));
            }
        }

        let period = Duration::from_secs(self.config.analysis.interval_secs.max(1));
        let analyzer = Arc::downgrade(self);
        self.ticker.spawn(period, "analyzer", move || {
            let analyzer = analyzer.clone();
            async move {
                if let Some(analyzer) = analyzer.upgrade() {
                    let analysis = analyzer.analyze_all(AnalysisOptions::default()).await;
                    debug!(
                        bottlenecks = analysis.summary.bottlenecks,
                        trends = analysis.summary.trends,
                        "Periodic analysis complete"
                    );
                }
            }
        });

        self.transition(AnalyzerState::Starting, AnalyzerState::Running)?;
        info!(
            tracked_metrics = self.config.analysis.tracked_metrics.len(),
            "Performance analyzer started"
        );
        Ok(())
    }

    /// Cancel the periodic analysis and persist the final state
    pub async fn stop(&self) -> Result<()> {
        self.transition(AnalyzerState::Running, AnalyzerState::Stopping)?;
        self.ticker.cancel();

        let state = {
            let inner = self.inner.read().await;
            serde_json::to_value(PersistedState {
                stopped_at: now_millis(),
                models: inner.models.clone(),
                last_analysis: inner.last_analysis.clone(),
            })
        };
        match state {
            Ok(state) => {
                if let Err(e) = self.store.persist_state(STATE_KEY, &state).await {
                    warn!(error = %e, "Failed to persist analyzer state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode analyzer state"),
        }

        self.transition(AnalyzerState::Stopping, AnalyzerState::Stopped)?;
        info!("Performance analyzer stopped");
        Ok(())
    }

    /// State left by a previous stop; unreadable state is logged and ignored
    async fn load_state(&self) -> Option<PersistedState> {
        let value = match self.store.load_state(STATE_KEY).await {
            Ok(value) => value?,
            Err(e) => {
                warn!(error = %e, "Failed to load analyzer state");
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "Discarding undecodable analyzer state");
                None
            }
        }
    }

    /// Feed one processed tick into the history, retrain the models and
    /// return bottlenecks that became sustained with this tick.
    pub async fn update_metrics(&self, processed: &ProcessedResult) -> Vec<Bottleneck> {
        let now = processed.timestamp;
        let sustained_ms = self.config.bottleneck.sustained_duration_ms();
        let mut inner = self.inner.write().await;
        let mut touched = Vec::new();

        for (source, result) in &processed.sources {
            if !result.success {
                continue;
            }
            for (metric, value) in result.metrics.iter().chain(result.derived.iter()) {
                let key = metric_key(source, metric);
                let history = inner
                    .history
                    .entry(key.clone())
                    .or_insert_with(|| MetricHistory {
                        source: source.clone(),
                        metric: metric.clone(),
                        points: VecDeque::new(),
                    });
                if history.points.back().map_or(false, |(t, _)| *t > now) {
                    continue;
                }
                history.points.push_back((now, *value));
                while history.points.len() > self.config.analysis.history_size.max(1) {
                    history.points.pop_front();
                }
                touched.push(key);
            }
        }

        let mut new_bottlenecks = Vec::new();
        for key in touched {
            let Some(history) = inner.history.get(&key) else {
                continue;
            };
            let points = history.all();
            let (source, metric) = (history.source.clone(), history.metric.clone());

            inner
                .models
                .entry(key.clone())
                .or_insert_with(|| TrendModel::untrained(key.clone()))
                .train(&points, &self.config.trend, now);

            let Some(threshold) = self.config.thresholds.get(&metric) else {
                continue;
            };
            let Some(&(latest, value)) = points.last() else {
                continue;
            };
            if value < threshold.warning {
                inner.open_breaches.remove(&key);
                continue;
            }
            if inner.open_breaches.contains_key(&key) {
                continue;
            }
            // Only the period reaching the newest sample can have just become sustained
            if let Some(bottleneck) = detect_sustained(&source, &metric, &points, threshold, sustained_ms)
                .into_iter()
                .find(|b| b.end_time == latest)
            {
                inner.open_breaches.insert(key.clone(), bottleneck.start_time);
                new_bottlenecks.push(bottleneck);
            }
        }
        drop(inner);

        for bottleneck in &new_bottlenecks {
            self.events
                .publish(MonitorEvent::BottleneckDetected(bottleneck.clone()));
        }
        new_bottlenecks
    }

    /// Run the requested analyses. Never fails: problems are reported in
    /// `Analysis::error`.
    pub async fn analyze_all(&self, options: AnalysisOptions) -> Analysis {
        let now = now_millis();
        let range = options.time_range.unwrap_or_else(|| {
            TimeRange::ending_at(now, (self.config.analysis.lookback_secs as i64).saturating_mul(1_000))
        });
        if !range.is_valid() {
            return Analysis::failed(
                range,
                MonitorError::InvalidTimeRange {
                    start: range.start,
                    end: range.end,
                },
            );
        }

        let series: Vec<(String, String, Vec<(i64, f64)>)> = {
            let inner = self.inner.read().await;
            let mut series: Vec<_> = inner
                .history
                .values()
                .map(|h| (h.source.clone(), h.metric.clone(), h.in_range(&range)))
                .filter(|(_, _, points)| !points.is_empty())
                .collect();
            series.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
            series
        };

        let mut bottlenecks = Vec::new();
        let mut trends = Vec::new();
        let mut anomalies = Vec::new();
        let sustained_ms = self.config.bottleneck.sustained_duration_ms();

        for (source, metric, points) in &series {
            if options.include_bottleneck {
                if let Some(threshold) = self.config.thresholds.get(metric) {
                    bottlenecks.extend(detect_sustained(source, metric, points, threshold, sustained_ms));
                }
            }
            if options.include_trend {
                trends.extend(analyze_trend(source, metric, points, &self.config.trend, now));
            }
            if options.include_anomaly {
                anomalies.extend(AnomalyDetector::scan(&self.config.anomaly, source, metric, points));
            }
        }

        let optimization = options.include_optimization.then(|| {
            let mut suggestions = from_bottlenecks(&bottlenecks);
            suggestions.extend(from_trends(&trends, &self.config.thresholds));
            suggestions.extend(from_anomalies(&anomalies));
            build_plan(suggestions)
        });

        let critical_issues = bottlenecks
            .iter()
            .filter(|b| b.severity == Severity::Critical)
            .count()
            + anomalies
                .iter()
                .filter(|a| a.severity >= Severity::High)
                .count();
        let summary = AnalysisSummary {
            metrics_analyzed: series.len(),
            bottlenecks: bottlenecks.len(),
            trends: trends.len(),
            anomalies: anomalies.len(),
            critical_issues,
        };

        let analysis = Analysis {
            time_range: range,
            generated_at: now,
            bottlenecks,
            trends,
            anomalies,
            optimization,
            summary,
            error: None,
        };
        self.inner.write().await.last_analysis = Some(analysis.clone());
        analysis
    }

    /// Forecasts from trained models only
    pub async fn predict_performance(&self, request: &PredictionRequest) -> Vec<Forecast> {
        let steps = if request.forecast_horizon == 0 {
            self.config.trend.forecast_steps
        } else {
            request.forecast_horizon
        };
        let inner = self.inner.read().await;
        inner
            .models
            .values()
            .filter(|model| model.trained && model.r_squared >= request.confidence)
            .filter(|model| {
                request
                    .metrics
                    .as_ref()
                    .map_or(true, |wanted| wanted.contains(&model.metric))
            })
            .map(|model| Forecast {
                metric: model.metric.clone(),
                direction: model.direction,
                slope: model.slope,
                confidence: model.r_squared,
                points: model.forecast(steps),
            })
            .collect()
    }

    pub async fn trend_models(&self) -> Vec<TrendModel> {
        self.inner.read().await.models.values().cloned().collect()
    }

    pub async fn last_analysis(&self) -> Option<Analysis> {
        self.inner.read().await.last_analysis.clone()
    }
}
