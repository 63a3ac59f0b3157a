//! Default Linux metric source
//!
//! Reads host-wide metrics from procfs:
//! - /proc/stat for CPU usage (jiffy deltas between calls)
//! - /proc/meminfo for memory usage
//! - /proc/loadavg for the 1-minute load average

use anyhow::{Context, Result};
use async_trait::async_trait;
use monitor_lib::{MetricSource, MetricValue, MetricValues};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// Aggregate CPU jiffies from the first line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

pub struct ProcSource {
    proc_path: PathBuf,
    previous: Mutex<Option<CpuTimes>>,
}

impl ProcSource {
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            previous: Mutex::new(None),
        }
    }

    /// Parse the `cpu` line of /proc/stat.
    /// Idle time includes iowait.
    pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|line| line.starts_with("cpu "))
            .context("No aggregate cpu line in stat")?;

        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|field| field.parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .context("Malformed cpu line in stat")?;
        if fields.len() < 4 {
            anyhow::bail!("Expected at least 4 cpu fields, got {}", fields.len());
        }

        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        // guest time is already included in user/nice
        let total = fields.iter().take(8).sum();
        Ok(CpuTimes { total, idle })
    }

    /// Parse /proc/meminfo into kB values
    pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
        let mut stats = HashMap::new();

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                if let Ok(value) = value.parse::<u64>() {
                    stats.insert(key.trim_end_matches(':').to_string(), value);
                }
            }
        }

        stats
    }

    pub fn parse_loadavg(content: &str) -> Result<f64> {
        content
            .split_whitespace()
            .next()
            .context("Empty loadavg")?
            .parse()
            .context("Failed to parse 1-minute load average")
    }

    /// Busy share of the jiffies elapsed between two reads, in percent
    pub fn cpu_usage(previous: Option<CpuTimes>, current: CpuTimes) -> f64 {
        let (total, idle) = match previous {
            Some(prev) if current.total > prev.total => (
                current.total - prev.total,
                current.idle.saturating_sub(prev.idle),
            ),
            _ => (current.total, current.idle),
        };
        if total == 0 {
            return 0.0;
        }
        (1.0 - idle as f64 / total as f64) * 100.0
    }

    async fn read(&self, file: &str) -> Result<String> {
        let path = self.proc_path.join(file);
        read_file(&path).await
    }
}

async fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

#[async_trait]
impl MetricSource for ProcSource {
    async fn collect(&self) -> Result<MetricValues> {
        let mut values = MetricValues::new();

        let current = Self::parse_cpu_times(&self.read("stat").await?)?;
        let previous = {
            let mut previous = self
                .previous
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            previous.replace(current)
        };
        values.insert(
            "cpu_usage".to_string(),
            MetricValue::Number(Self::cpu_usage(previous, current)),
        );

        let meminfo = Self::parse_meminfo(&self.read("meminfo").await?);
        let total = meminfo
            .get("MemTotal")
            .copied()
            .context("MemTotal missing from meminfo")?;
        let available = meminfo
            .get("MemAvailable")
            .or_else(|| meminfo.get("MemFree"))
            .copied()
            .unwrap_or(0);
        if total > 0 {
            let used = total.saturating_sub(available);
            values.insert(
                "memory_usage".to_string(),
                MetricValue::Number(used as f64 / total as f64 * 100.0),
            );
            values.insert("memory_used_kb".to_string(), MetricValue::from(used));
        }

        let load = Self::parse_loadavg(&self.read("loadavg").await?)?;
        values.insert("load_average_1m".to_string(), MetricValue::Number(load));

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\nintr 12345\n";
    const MEMINFO: &str = "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    250 kB\n";
    const LOADAVG: &str = "0.75 0.50 0.25 1/123 4567\n";

    fn write_proc(dir: &Path, stat: &str) {
        std::fs::write(dir.join("stat"), stat).unwrap();
        std::fs::write(dir.join("meminfo"), MEMINFO).unwrap();
        std::fs::write(dir.join("loadavg"), LOADAVG).unwrap();
    }

    #[test]
    fn test_parse_cpu_times() {
        let times = ProcSource::parse_cpu_times(STAT).unwrap();
        assert_eq!(times, CpuTimes { total: 1000, idle: 800 });
        assert!(ProcSource::parse_cpu_times("intr 1\n").is_err());
        assert!(ProcSource::parse_cpu_times("cpu  1 2\n").is_err());
    }

    #[test]
    fn test_cpu_usage_from_deltas() {
        let previous = CpuTimes { total: 1000, idle: 800 };
        let current = CpuTimes { total: 1200, idle: 850 };
        assert!((ProcSource::cpu_usage(Some(previous), current) - 75.0).abs() < 1e-9);
        // First read falls back to the since-boot average
        assert!((ProcSource::cpu_usage(None, previous) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_meminfo_and_loadavg() {
        let meminfo = ProcSource::parse_meminfo(MEMINFO);
        assert_eq!(meminfo["MemTotal"], 1000);
        assert_eq!(meminfo["MemAvailable"], 250);
        assert_eq!(ProcSource::parse_loadavg(LOADAVG).unwrap(), 0.75);
        assert!(ProcSource::parse_loadavg("").is_err());
    }

    #[tokio::test]
    async fn test_collect_from_fake_proc() {
        let dir = TempDir::new().unwrap();
        write_proc(dir.path(), STAT);
        let source = ProcSource::with_proc_path(dir.path());

        let first = source.collect().await.unwrap();
        assert!((first["cpu_usage"].as_number().unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(first["memory_usage"], MetricValue::Number(75.0));
        assert_eq!(first["load_average_1m"], MetricValue::Number(0.75));

        write_proc(dir.path(), "cpu  250 0 100 750 100 0 0 0 0 0\n");
        let second = source.collect().await.unwrap();
        assert_eq!(second["cpu_usage"], MetricValue::Number(75.0));
    }

    #[tokio::test]
    async fn test_missing_files_fail() {
        let dir = TempDir::new().unwrap();
        let source = ProcSource::with_proc_path(dir.path());
        let err = source.collect().await.unwrap_err();
        assert!(format!("{:#}", err).contains("stat"));
    }
}
