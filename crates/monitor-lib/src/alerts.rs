//! Structured alert generation with deduplication
//!
//! Handles:
//! - Turning anomalies, bottlenecks and health degradations into alerts
//! - Suppressing repeats of the same alert within a configurable window
//! - Keeping a bounded list of recently raised alerts
//!
//! Delivery (webhooks, chat, paging) is left to event subscribers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;
use crate::models::{Anomaly, Bottleneck, HealthReport, HealthStatus, Severity};

/// Alert type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Anomaly,
    Bottleneck,
    HealthDegraded,
    SourceDisabled,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Anomaly => write!(f, "anomaly"),
            AlertKind::Bottleneck => write!(f, "bottleneck"),
            AlertKind::HealthDegraded => write!(f, "health_degraded"),
            AlertKind::SourceDisabled => write!(f, "source_disabled"),
        }
    }
}

/// A structured alert ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    pub message: String,
    pub timestamp: i64,
}

/// Key for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    kind: AlertKind,
    source: String,
    metric: Option<String>,
}

/// Alert factory with deduplication and a bounded history
pub struct AlertManager {
    dedup_window_ms: i64,
    max_active: usize,
    /// key -> last emission time (epoch ms)
    recent: RwLock<HashMap<DedupKey, i64>>,
    raised: RwLock<VecDeque<Alert>>,
    sequence: AtomicU64,
}

impl AlertManager {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            dedup_window_ms: (config.dedup_window_secs as i64).saturating_mul(1_000),
            max_active: config.max_active.max(1),
            recent: RwLock::new(HashMap::new()),
            raised: RwLock::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Raise an alert for a high-severity anomaly
    pub fn on_anomaly(&self, anomaly: &Anomaly) -> Option<Alert> {
        if anomaly.severity < Severity::High {
            return None;
        }
        let message = format!(
            "{} on {} = {:.2}, expected {:.2}..{:.2} ({} deviation {:.2})",
            anomaly.metric,
            anomaly.source,
            anomaly.value,
            anomaly.expected_range.low,
            anomaly.expected_range.high,
            anomaly.algorithm,
            anomaly.deviation_score
        );
        self.raise(
            AlertKind::Anomaly,
            anomaly.severity,
            &anomaly.source,
            Some(&anomaly.metric),
            message,
            anomaly.timestamp,
        )
    }

    /// Raise an alert for a sustained bottleneck
    pub fn on_bottleneck(&self, bottleneck: &Bottleneck) -> Option<Alert> {
        let message = format!(
            "{} on {} above {:.1} for {}s (max {:.2}, avg {:.2})",
            bottleneck.kind,
            bottleneck.source,
            bottleneck.threshold.warning,
            bottleneck.duration_ms / 1_000,
            bottleneck.max_value,
            bottleneck.avg_value
        );
        self.raise(
            AlertKind::Bottleneck,
            bottleneck.severity,
            &bottleneck.source,
            Some(&bottleneck.kind),
            message,
            bottleneck.end_time,
        )
    }

    /// Raise an alert when overall health is critical
    pub fn on_health(&self, report: &HealthReport, timestamp: i64) -> Option<Alert> {
        if report.overall.status != HealthStatus::Critical {
            return None;
        }
        let degraded: Vec<&str> = report
            .components
            .iter()
            .filter(|(_, score)| score.status != HealthStatus::Healthy)
            .map(|(name, _)| name.as_str())
            .collect();
        let message = format!(
            "Overall health score {:.1} is critical (degraded: {})",
            report.overall.value,
            if degraded.is_empty() {
                "none".to_string()
            } else {
                degraded.join(", ")
            }
        );
        self.raise(
            AlertKind::HealthDegraded,
            Severity::Critical,
            "overall",
            None,
            message,
            timestamp,
        )
    }

    /// Raise an alert when a source was automatically disabled
    pub fn on_source_disabled(&self, source: &str, timestamp: i64) -> Option<Alert> {
        let message = format!(
            "Metric source {} was disabled after repeated collection failures",
            source
        );
        self.raise(
            AlertKind::SourceDisabled,
            Severity::High,
            source,
            None,
            message,
            timestamp,
        )
    }

    /// Alerts raised within the dedup window ending at `now`, newest first
    pub fn active(&self, now: i64) -> Vec<Alert> {
        let raised = self.raised.read().unwrap_or_else(PoisonError::into_inner);
        raised
            .iter()
            .rev()
            .filter(|alert| now - alert.timestamp < self.dedup_window_ms)
            .cloned()
            .collect()
    }

    /// All retained alerts, newest first
    pub fn history(&self) -> Vec<Alert> {
        let raised = self.raised.read().unwrap_or_else(PoisonError::into_inner);
        raised.iter().rev().cloned().collect()
    }

    fn should_suppress(&self, key: &DedupKey, now: i64) -> bool {
        let recent = self.recent.read().unwrap_or_else(PoisonError::into_inner);
        recent
            .get(key)
            .map(|last| now - last < self.dedup_window_ms)
            .unwrap_or(false)
    }

    fn raise(
        &self,
        kind: AlertKind,
        severity: Severity,
        source: &str,
        metric: Option<&str>,
        message: String,
        timestamp: i64,
    ) -> Option<Alert> {
        let key = DedupKey {
            kind,
            source: source.to_string(),
            metric: metric.map(str::to_string),
        };
        if self.should_suppress(&key, timestamp) {
            return None;
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let alert = Alert {
            id: format!("{}-{}-{}", kind, timestamp, seq),
            kind,
            severity,
            source: source.to_string(),
            metric: metric.map(str::to_string),
            message,
            timestamp,
        };

        {
            let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
            recent.insert(key, timestamp);
            // Clean up old entries
            let window = self.dedup_window_ms;
            recent.retain(|_, last| timestamp - *last < window);
        }

        let mut raised = self.raised.write().unwrap_or_else(PoisonError::into_inner);
        raised.push_back(alert.clone());
        while raised.len() > self.max_active {
            raised.pop_front();
        }

        Some(alert)
    }
}
