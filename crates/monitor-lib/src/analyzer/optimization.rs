//! Optimization suggestions and implementation plan

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::trend::TrendAnalysis;
use crate::models::{Anomaly, Bottleneck, Severity, Threshold, TrendDirection};
use crate::processor::is_percentage_metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical | Severity::High => Priority::High,
            Severity::Medium => Priority::Medium,
            Severity::Low => Priority::Low,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostLevel {
    Low,
    Medium,
    High,
}

impl CostLevel {
    pub fn points(&self) -> u32 {
        match self {
            CostLevel::Low => 1,
            CostLevel::Medium => 3,
            CostLevel::High => 5,
        }
    }

    /// Rough effort of addressing pressure on a metric
    pub fn for_metric(metric: &str) -> Self {
        let metric = metric.to_ascii_lowercase();
        if metric.contains("disk") || metric.contains("network") {
            CostLevel::High
        } else if metric.contains("cpu") || metric.contains("memory") {
            CostLevel::Medium
        } else {
            CostLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    /// What produced it: bottleneck, trend or anomaly
    pub category: String,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub source: String,
    pub metric: String,
    pub cost: CostLevel,
    pub cost_points: u32,
    /// Estimated benefit in [0, 100]
    pub expected_impact: f64,
}

/// Suggestion ids grouped by when to act on them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImplementationPlan {
    pub immediate: Vec<String>,
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    /// Sorted by priority, then expected impact
    pub suggestions: Vec<Suggestion>,
    pub plan: ImplementationPlan,
    pub total_cost_points: u32,
}

fn severity_impact(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 90.0,
        Severity::High => 70.0,
        Severity::Medium => 50.0,
        Severity::Low => 30.0,
    }
}

fn is_resource_metric(metric: &str) -> bool {
    is_percentage_metric(metric)
        || ["cpu", "memory", "disk", "load", "utilization"]
            .iter()
            .any(|hint| metric.contains(hint))
}

fn suggestion(
    category: &str,
    priority: Priority,
    source: &str,
    metric: &str,
    title: String,
    description: String,
    expected_impact: f64,
) -> Suggestion {
    let cost = if category == "anomaly" {
        CostLevel::Low
    } else {
        CostLevel::for_metric(metric)
    };
    Suggestion {
        id: String::new(),
        category: category.to_string(),
        priority,
        title,
        description,
        source: source.to_string(),
        metric: metric.to_string(),
        cost,
        cost_points: cost.points(),
        expected_impact: expected_impact.clamp(0.0, 100.0),
    }
}

pub fn from_bottlenecks(bottlenecks: &[Bottleneck]) -> Vec<Suggestion> {
    bottlenecks
        .iter()
        .map(|b| {
            suggestion(
                "bottleneck",
                b.severity.into(),
                &b.source,
                &b.kind,
                format!("Relieve sustained {} pressure on {}", b.kind, b.source),
                format!(
                    "{} stayed above {:.1} for {}s (peak {:.1}, avg {:.1}); add capacity or reduce load",
                    b.kind,
                    b.threshold.warning,
                    b.duration_ms / 1_000,
                    b.max_value,
                    b.avg_value
                ),
                severity_impact(b.severity),
            )
        })
        .collect()
}

/// One suggestion per significant increasing trend on a resource metric.
/// High priority when the forecast reaches the metric's warning threshold.
pub fn from_trends(trends: &[TrendAnalysis], thresholds: &BTreeMap<String, Threshold>) -> Vec<Suggestion> {
    trends
        .iter()
        .filter(|t| t.direction == TrendDirection::Increasing && is_resource_metric(&t.metric))
        .map(|t| {
            let reaches_warning = thresholds
                .get(&t.metric)
                .zip(t.forecast.last())
                .map(|(threshold, last)| last.value >= threshold.warning)
                .unwrap_or(false);
            let priority = if reaches_warning {
                Priority::High
            } else {
                Priority::Medium
            };
            suggestion(
                "trend",
                priority,
                &t.source,
                &t.metric,
                format!("Plan capacity for growing {} on {}", t.metric, t.source),
                format!(
                    "{} grows by {:.3} per sample (r² {:.2}); projected {:.1} at the end of the forecast",
                    t.metric,
                    t.slope,
                    t.significance,
                    t.forecast.last().map(|p| p.value).unwrap_or_default()
                ),
                60.0 * t.significance,
            )
        })
        .collect()
}

/// Anomalies grouped by metric; priority is raised if any was high severity
pub fn from_anomalies(anomalies: &[Anomaly]) -> Vec<Suggestion> {
    let mut grouped: BTreeMap<(String, String), Vec<&Anomaly>> = BTreeMap::new();
    for anomaly in anomalies {
        grouped
            .entry((anomaly.source.clone(), anomaly.metric.clone()))
            .or_default()
            .push(anomaly);
    }

    grouped
        .into_iter()
        .map(|((source, metric), group)| {
            let any_high = group.iter().any(|a| a.severity >= Severity::High);
            let priority = if any_high {
                Priority::High
            } else {
                Priority::Medium
            };
            suggestion(
                "anomaly",
                priority,
                &source,
                &metric,
                format!("Investigate irregular {} on {}", metric, source),
                format!(
                    "{} anomalous value(s) of {} on {}; check for bursts or misbehaving clients",
                    group.len(),
                    metric,
                    source
                ),
                40.0 + 10.0 * group.len().min(5) as f64,
            )
        })
        .collect()
}

/// Merge, sort and phase suggestions
pub fn build_plan(mut suggestions: Vec<Suggestion>) -> OptimizationPlan {
    suggestions.sort_by(|a, b| {
        b.priority.cmp(&a.priority).then_with(|| {
            b.expected_impact
                .partial_cmp(&a.expected_impact)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });

    let mut plan = ImplementationPlan::default();
    for (index, suggestion) in suggestions.iter_mut().enumerate() {
        suggestion.id = format!("opt-{}", index + 1);
        match suggestion.priority {
            Priority::High => plan.immediate.push(suggestion.id.clone()),
            Priority::Medium => plan.short_term.push(suggestion.id.clone()),
            Priority::Low => plan.long_term.push(suggestion.id.clone()),
        }
    }
    let total_cost_points = suggestions.iter().map(|s| s.cost_points).sum();

    OptimizationPlan {
        suggestions,
        plan,
        total_cost_points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::trend::ForecastPoint;
    use crate::models::{AnomalyAlgorithm, ExpectedRange};

    fn bottleneck(severity: Severity) -> Bottleneck {
        Bottleneck {
            kind: "disk_usage".to_string(),
            source: "system".to_string(),
            severity,
            start_time: 0,
            end_time: 400_000,
            duration_ms: 400_000,
            max_value: 92.0,
            avg_value: 90.0,
            threshold: Threshold::new(85.0, 95.0),
        }
    }

    fn anomaly(metric: &str, severity: Severity) -> Anomaly {
        Anomaly {
            timestamp: 0,
            source: "api".to_string(),
            metric: metric.to_string(),
            value: 10.0,
            expected_range: ExpectedRange { low: 0.0, high: 5.0 },
            deviation_score: 3.0,
            severity,
            algorithm: AnomalyAlgorithm::ZScore,
        }
    }

    fn trend(metric: &str, last_value: f64) -> TrendAnalysis {
        TrendAnalysis {
            source: "system".to_string(),
            metric: metric.to_string(),
            direction: TrendDirection::Increasing,
            slope: 1.0,
            significance: 0.95,
            samples: 30,
            forecast: vec![ForecastPoint {
                timestamp: 1,
                value: last_value,
            }],
        }
    }

    #[test]
    fn test_bottleneck_priority_and_cost() {
        let suggestions = from_bottlenecks(&[bottleneck(Severity::Critical)]);
        assert_eq!(suggestions[0].priority, Priority::High);
        assert_eq!(suggestions[0].cost, CostLevel::High);
        assert_eq!(suggestions[0].cost_points, 5);
    }

    #[test]
    fn test_trend_suggestions_only_for_increasing_resources() {
        let mut thresholds = BTreeMap::new();
        thresholds.insert("memory_usage".to_string(), Threshold::new(80.0, 95.0));

        let mut decreasing = trend("memory_usage", 10.0);
        decreasing.direction = TrendDirection::Decreasing;
        let trends = vec![
            trend("memory_usage", 85.0),
            trend("cpu_usage", 40.0),
            trend("request_count", 1e6),
            decreasing,
        ];
        let suggestions = from_trends(&trends, &thresholds);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].priority, Priority::High);
        assert_eq!(suggestions[1].priority, Priority::Medium);
    }

    #[test]
    fn test_anomalies_grouped_by_metric() {
        let anomalies = vec![
            anomaly("latency", Severity::Medium),
            anomaly("latency", Severity::High),
            anomaly("errors", Severity::Medium),
        ];
        let suggestions = from_anomalies(&anomalies);
        assert_eq!(suggestions.len(), 2);
        let latency = suggestions.iter().find(|s| s.metric == "latency").unwrap();
        assert_eq!(latency.priority, Priority::High);
        let errors = suggestions.iter().find(|s| s.metric == "errors").unwrap();
        assert_eq!(errors.priority, Priority::Medium);
        assert_eq!(errors.cost, CostLevel::Low);
    }

    #[test]
    fn test_plan_sorted_and_phased() {
        let mut suggestions = from_anomalies(&[anomaly("errors", Severity::Medium)]);
        suggestions.extend(from_bottlenecks(&[
            bottleneck(Severity::Medium),
            bottleneck(Severity::Critical),
        ]));
        let mut low = from_bottlenecks(&[bottleneck(Severity::Low)]);
        suggestions.append(&mut low);

        let plan = build_plan(suggestions);
        let priorities: Vec<Priority> = plan.suggestions.iter().map(|s| s.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::High, Priority::Medium, Priority::Medium, Priority::Low]
        );
        assert_eq!(plan.plan.immediate, vec!["opt-1".to_string()]);
        assert_eq!(plan.plan.short_term.len(), 2);
        assert_eq!(plan.plan.long_term, vec!["opt-4".to_string()]);
        assert_eq!(plan.total_cost_points, 5 + 1 + 5 + 5);
    }
}
