//! Error types for the monitoring core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitor is not running")]
    NotRunning,
    #[error("Monitor is already running")]
    AlreadyRunning,
    #[error("Invalid state for {component}: {state}")]
    InvalidState {
        component: &'static str,
        state: String,
    },
    #[error("Unknown metric source: {0}")]
    UnknownSource(String),
    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: i64, end: i64 },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
