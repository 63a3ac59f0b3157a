//! Registry of named metric sources and their health bookkeeping

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::MetricSource;
use crate::error::{MonitorError, Result};
use crate::models::now_millis;

/// Registration record for one metric source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRegistration {
    pub name: String,
    pub enabled: bool,
    pub weight: f64,
    pub category: String,
    /// Total failures since registration
    pub error_count: u64,
    /// Failures since the last success or re-enable
    pub consecutive_failures: u32,
    pub last_collection_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub registered_at: i64,
}

struct SourceEntry {
    registration: CollectorRegistration,
    source: Arc<dyn MetricSource>,
}

/// Concurrent map of source name -> adapter plus registration.
///
/// Only the collection tick and explicit operator actions write to it;
/// readers always receive owned copies.
pub struct SourceRegistry {
    sources: DashMap<String, SourceEntry>,
    max_consecutive_failures: u32,
}

impl SourceRegistry {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            sources: DashMap::new(),
            max_consecutive_failures,
        }
    }

    /// Register a source; returns true when an existing entry was replaced
    pub fn register(
        &self,
        name: &str,
        source: Arc<dyn MetricSource>,
        weight: f64,
        category: String,
    ) -> bool {
        debug!(source = %name, weight = weight, category = %category, "Registering metric source");
        let registration = CollectorRegistration {
            name: name.to_string(),
            enabled: true,
            weight,
            category,
            error_count: 0,
            consecutive_failures: 0,
            last_collection_time: None,
            last_error: None,
            registered_at: now_millis(),
        };
        self.sources
            .insert(
                name.to_string(),
                SourceEntry {
                    registration,
                    source,
                },
            )
            .is_some()
    }

    /// Enabled sources with their adapters, sorted by name
    pub fn enabled_sources(&self) -> Vec<(CollectorRegistration, Arc<dyn MetricSource>)> {
        let mut enabled: Vec<_> = self
            .sources
            .iter()
            .filter(|entry| entry.registration.enabled)
            .map(|entry| (entry.registration.clone(), entry.source.clone()))
            .collect();
        enabled.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        enabled
    }

    pub fn record_success(&self, name: &str, timestamp: i64) {
        if let Some(mut entry) = self.sources.get_mut(name) {
            entry.registration.consecutive_failures = 0;
            entry.registration.last_collection_time = Some(timestamp);
        }
    }

    /// Record a failure; returns true if this failure disabled the source
    pub fn record_failure(&self, name: &str, timestamp: i64, error: &str) -> bool {
        let Some(mut entry) = self.sources.get_mut(name) else {
            return false;
        };
        let registration = &mut entry.registration;
        registration.error_count += 1;
        registration.consecutive_failures += 1;
        registration.last_collection_time = Some(timestamp);
        registration.last_error = Some(error.to_string());

        if registration.enabled && registration.consecutive_failures > self.max_consecutive_failures
        {
            registration.enabled = false;
            return true;
        }
        false
    }

    /// Explicitly enable or disable a source. Enabling resets the failure streak.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<CollectorRegistration> {
        let mut entry = self
            .sources
            .get_mut(name)
            .ok_or_else(|| MonitorError::UnknownSource(name.to_string()))?;
        entry.registration.enabled = enabled;
        if enabled {
            entry.registration.consecutive_failures = 0;
            entry.registration.last_error = None;
        }
        info!(source = %name, enabled = enabled, "Metric source toggled");
        Ok(entry.registration.clone())
    }

    pub fn get(&self, name: &str) -> Option<CollectorRegistration> {
        self.sources.get(name).map(|entry| entry.registration.clone())
    }

    /// All registrations, sorted by name
    pub fn list(&self) -> Vec<CollectorRegistration> {
        let mut all: Vec<_> = self
            .sources
            .iter()
            .map(|entry| entry.registration.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn disabled_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|entry| !entry.registration.enabled)
            .count()
    }
}
