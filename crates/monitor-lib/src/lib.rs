//! Core library for performance monitoring and analytics
//!
//! This crate provides the core functionality for:
//! - Telemetry collection from pluggable metric sources
//! - Cleaning, time bucketing and streaming anomaly detection
//! - Sustained bottleneck detection, trend models and forecasts
//! - Orchestration, alerting and observability

pub mod alerts;
pub mod analyzer;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod processor;
pub mod stats;
pub mod storage;

mod schedule;

pub use alerts::{Alert, AlertKind, AlertManager};
pub use analyzer::{
    Analysis, AnalysisOptions, AnalyzerState, Forecast, PerformanceAnalyzer, PredictionRequest,
};
pub use collector::{async_trait, CollectorRegistration, MetricSource, TelemetryCollector};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use events::{CollectionSummary, EventBus, MonitorEvent};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use orchestrator::{
    CurrentMetrics, DashboardData, HistoricalMetrics, HistoricalQuery, MonitorStatus,
    MonitoringOrchestrator, PerformanceReport, TickReport,
};
pub use processor::{AggregationQuery, DataProcessor, PatternQuery, ProcessedResult};
pub use storage::{JsonLinesStore, MemoryStore, SnapshotStore};
