//! Telemetry collection from pluggable metric sources
//!
//! Sources implement [`MetricSource`] and are registered by name. The
//! [`TelemetryCollector`] calls every enabled source once per tick, keeps a
//! bounded series per source, and self-disables sources that keep failing.

mod registry;
mod scoring;
mod series;
mod telemetry;


pub use registry::{CollectorRegistration, SourceRegistry};
pub use scoring::HealthScorer;
pub use series::MetricSeries;
pub use telemetry::{
    infer_category, weighted_aggregate, CollectionResult, SourceOutcome, StartOutcome,
    StopOutcome, TelemetryCollector,
};

use crate::models::MetricValues;
use anyhow::Result;

pub use async_trait::async_trait;

/// A named producer of flat metric snapshots
///
/// Implementations should be cheap and must not mutate system state. Errors
/// are isolated per source and counted towards its failure streak.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Read one snapshot of named values
    async fn collect(&self) -> Result<MetricValues>;
}
