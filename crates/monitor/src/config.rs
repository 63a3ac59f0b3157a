//! Daemon configuration

use anyhow::{Context, Result};
use monitor_lib::MonitorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "PERFMON_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "perf-monitor.toml";

/// Daemon configuration: process settings plus the pipeline sections
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port of the HTTP API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory for the JSON-lines store; in-memory when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// procfs mount used by the default source
    #[serde(default = "default_proc_path")]
    pub proc_path: PathBuf,

    /// Register the default procfs source at startup
    #[serde(default = "default_true")]
    pub enable_proc_source: bool,

    #[serde(flatten)]
    pub monitor: MonitorConfig,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_proc_path() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_true() -> bool {
    true
}

impl DaemonConfig {
    /// Load from the optional config file, overridden by `PERFMON_*`
    /// environment variables (`__` separates nested keys).
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("PERFMON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_lib::AnomalyAlgorithm;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.api_port, 8080);
        assert!(config.data_dir.is_none());
        assert_eq!(config.monitor.collection.interval_ms, 5_000);
        assert!(config.monitor.thresholds.contains_key("cpu_usage"));
    }

    #[test]
    fn test_file_sections_are_layered_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perf-monitor.toml");
        std::fs::write(
            &path,
            r#"
api_port = 9100
data_dir = "/var/lib/perf-monitor"

[collection]
interval_ms = 2000

[anomaly]
algorithm = "isolation"

[sources.system]
weight = 2.0
category = "system"
"#,
        )
        .unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/perf-monitor")));
        assert_eq!(config.monitor.collection.interval_ms, 2000);
        assert_eq!(config.monitor.collection.max_consecutive_failures, 5);
        assert_eq!(config.monitor.anomaly.algorithm, AnomalyAlgorithm::Isolation);
        assert_eq!(config.monitor.source_options("system").weight, 2.0);
    }
}
