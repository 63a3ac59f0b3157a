//! Current and historical metric commands

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use monitor_lib::{CurrentMetrics, Granularity, HistoricalMetrics, MetricValue};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    format_timestamp, parse_period, print_header, print_info, print_json, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct ValueRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Count")]
    count: u64,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Avg")]
    avg: String,
    #[tabled(rename = "Max")]
    max: String,
}

fn format_value(value: &MetricValue) -> String {
    match value {
        MetricValue::Number(v) => format!("{:.2}", v),
        MetricValue::Bool(b) => b.to_string(),
        MetricValue::Text(s) => s.clone(),
    }
}

/// Show the latest snapshot of every source
pub async fn show_current(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let current: CurrentMetrics = client.get("api/v1/metrics/current").await?;

    if let OutputFormat::Json = format {
        return print_json(&current);
    }

    print_header("Current Metrics");
    if let Some(timestamp) = current.timestamp {
        println!("Collected: {}", format_timestamp(timestamp));
    }
    println!();

    let rows: Vec<ValueRow> = current
        .snapshots
        .iter()
        .flat_map(|(source, snapshot)| {
            snapshot.values.iter().map(move |(metric, value)| ValueRow {
                source: source.clone(),
                metric: metric.clone(),
                value: format_value(value),
            })
        })
        .collect();
    print_table(rows, "No metrics collected yet");

    if !current.insights.is_empty() {
        println!();
        println!("{}", "Insights".bold());
        for insight in &current.insights {
            print_info(&insight.message);
        }
    }

    Ok(())
}

/// Show raw series counts and bucketed statistics over a relative period
pub async fn show_history(
    client: &ApiClient,
    since: &str,
    collectors: Option<String>,
    aggregation: Granularity,
    format: OutputFormat,
) -> Result<()> {
    let end_time = Utc::now().timestamp_millis();
    let start_time = end_time - parse_period(since)?;

    let mut query = vec![
        ("start_time", start_time.to_string()),
        ("end_time", end_time.to_string()),
        ("aggregation", aggregation.to_string()),
    ];
    if let Some(collectors) = collectors {
        query.push(("collectors", collectors));
    }
    let history: HistoricalMetrics = client
        .get_with_query("api/v1/metrics/history", &query)
        .await?;

    if let OutputFormat::Json = format {
        return print_json(&history);
    }

    print_header(&format!("Metric History (last {})", since));
    for (source, snapshots) in &history.snapshots {
        println!("{:<20} {} snapshots", source.cyan(), snapshots.len());
    }
    println!();

    let rows: Vec<BucketRow> = history
        .buckets
        .unwrap_or_default()
        .iter()
        .flat_map(|bucket| {
            bucket.metrics.iter().map(move |(metric, stats)| BucketRow {
                bucket: format_timestamp(bucket.bucket_start),
                source: bucket.source.clone(),
                metric: metric.clone(),
                count: stats.count,
                min: format!("{:.2}", stats.min),
                avg: format!("{:.2}", stats.avg),
                max: format!("{:.2}", stats.max),
            })
        })
        .collect();
    print_table(rows, "No aggregated data in this period");

    Ok(())
}
