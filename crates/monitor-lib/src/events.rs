//! Typed publish/subscribe channel for pipeline events
//!
//! Events are delivered over a bounded broadcast channel. Publishing never
//! blocks: a subscriber that falls behind loses its oldest events instead of
//! slowing the pipeline down.

use crate::alerts::Alert;
use crate::models::{Anomaly, Bottleneck, HealthScore};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::trace;

/// Summary of one full collection tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub timestamp: i64,
    pub sources_total: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub health: HealthScore,
    pub anomalies: usize,
}

/// Events observable by external subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MonitorEvent {
    Started {
        timestamp: i64,
    },
    Stopped {
        timestamp: i64,
    },
    MetricsCollected(CollectionSummary),
    AnomalyDetected(Anomaly),
    BottleneckDetected(Bottleneck),
    CollectorRegistered {
        name: String,
        timestamp: i64,
    },
    CollectorDisabled {
        name: String,
        consecutive_failures: u32,
        timestamp: i64,
    },
    AlertRaised(Alert),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Started { .. } => "started",
            MonitorEvent::Stopped { .. } => "stopped",
            MonitorEvent::MetricsCollected(_) => "metrics-collected",
            MonitorEvent::AnomalyDetected(_) => "anomaly-detected",
            MonitorEvent::BottleneckDetected(_) => "bottleneck-detected",
            MonitorEvent::CollectorRegistered { .. } => "collector-registered",
            MonitorEvent::CollectorDisabled { .. } => "collector-disabled",
            MonitorEvent::AlertRaised(_) => "alert-raised",
        }
    }
}

/// Cloneable handle to the shared event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; returns the number of subscribers that received it
    pub fn publish(&self, event: MonitorEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!(event = name, "No subscribers for event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream, silently skipping events lost to lag
    pub fn stream(&self) -> impl Stream<Item = MonitorEvent> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|event| event.ok())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}
