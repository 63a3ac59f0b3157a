//! Multi-granularity time bucketing

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BucketLimits;
use crate::models::{Granularity, TimeRange};

/// Running statistics of one metric inside one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl BucketStats {
    pub fn new(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
            avg: value,
        }
    }

    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.avg = self.sum / self.count as f64;
    }
}

/// Aggregated statistics of one source over one aligned time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    pub source: String,
    pub granularity: Granularity,
    pub bucket_start: i64,
    pub metrics: BTreeMap<String, BucketStats>,
}

impl AggregationBucket {
    pub fn bucket_end(&self) -> i64 {
        self.bucket_start + self.granularity.window_ms()
    }
}

/// Start of the aligned window containing `timestamp`
pub fn bucket_start(timestamp: i64, granularity: Granularity) -> i64 {
    let window = granularity.window_ms();
    timestamp.div_euclid(window) * window
}

/// Buckets per (source, granularity), time-sorted and capped
pub struct BucketStore {
    granularities: Vec<Granularity>,
    limits: BucketLimits,
    buckets: HashMap<(String, Granularity), VecDeque<AggregationBucket>>,
}

impl BucketStore {
    pub fn new(granularities: Vec<Granularity>, limits: BucketLimits) -> Self {
        Self {
            granularities,
            limits,
            buckets: HashMap::new(),
        }
    }

    pub fn granularities(&self) -> &[Granularity] {
        &self.granularities
    }

    /// Fold one set of values into the current bucket of every granularity.
    ///
    /// Windows older than the newest bucket are closed: late values for them
    /// are dropped. Returns the number of granularities that dropped the values.
    pub fn ingest(&mut self, source: &str, timestamp: i64, metrics: &BTreeMap<String, f64>) -> usize {
        let mut late = 0;
        for granularity in self.granularities.clone() {
            let start = bucket_start(timestamp, granularity);
            let limit = self.limits.limit(granularity).max(1);
            let buckets = self
                .buckets
                .entry((source.to_string(), granularity))
                .or_default();

            match buckets.back().map(|b| b.bucket_start) {
                Some(current_start) if current_start == start => {
                    if let Some(current) = buckets.back_mut() {
                        for (name, value) in metrics {
                            current
                                .metrics
                                .entry(name.clone())
                                .and_modify(|stats| stats.update(*value))
                                .or_insert_with(|| BucketStats::new(*value));
                        }
                    }
                }
                Some(current_start) if current_start > start => {
                    debug!(
                        source = %source,
                        granularity = %granularity,
                        bucket_start = start,
                        "Dropping values for closed bucket"
                    );
                    late += 1;
                }
                _ => {
                    buckets.push_back(AggregationBucket {
                        source: source.to_string(),
                        granularity,
                        bucket_start: start,
                        metrics: metrics
                            .iter()
                            .map(|(name, value)| (name.clone(), BucketStats::new(*value)))
                            .collect(),
                    });
                    while buckets.len() > limit {
                        buckets.pop_front();
                    }
                }
            }
        }
        late
    }

    /// Buckets overlapping `range`, ordered by start time then source
    pub fn query(
        &self,
        range: &TimeRange,
        granularity: Granularity,
        sources: Option<&[String]>,
        metrics: Option<&[String]>,
    ) -> Vec<AggregationBucket> {
        let mut result: Vec<AggregationBucket> = self
            .buckets
            .iter()
            .filter(|((source, g), _)| {
                *g == granularity && sources.map_or(true, |s| s.contains(source))
            })
            .flat_map(|(_, buckets)| buckets.iter())
            .filter(|bucket| bucket.bucket_end() > range.start && bucket.bucket_start <= range.end)
            .map(|bucket| {
                let mut bucket = bucket.clone();
                if let Some(wanted) = metrics {
                    bucket.metrics.retain(|name, _| wanted.contains(name));
                }
                bucket
            })
            .filter(|bucket| !bucket.metrics.is_empty())
            .collect();
        result.sort_by(|a, b| {
            a.bucket_start
                .cmp(&b.bucket_start)
                .then_with(|| a.source.cmp(&b.source))
        });
        result
    }

    /// Drop buckets that fell out of each granularity's retention horizon
    pub fn cleanup(&mut self, now: i64) -> usize {
        let mut removed = 0;
        for ((_, granularity), buckets) in self.buckets.iter_mut() {
            let horizon = granularity
                .window_ms()
                .saturating_mul(self.limits.limit(*granularity) as i64);
            let cutoff = now.saturating_sub(horizon);
            while buckets
                .front()
                .map(|b| b.bucket_end() <= cutoff)
                .unwrap_or(false)
            {
                buckets.pop_front();
                removed += 1;
            }
        }
        self.buckets.retain(|_, buckets| !buckets.is_empty());
        removed
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }
}
