//! Performance analysis and forecast commands

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use monitor_lib::{AnalysisOptions, Forecast, PerformanceReport, PredictionRequest, TimeRange};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_confidence, format_duration, format_timestamp, parse_period,
    print_header, print_json, print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct BottleneckRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Max")]
    max: String,
}

#[derive(Tabled)]
struct TrendRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Slope")]
    slope: String,
    #[tabled(rename = "r²")]
    significance: String,
}

#[derive(Tabled)]
struct SuggestionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Cost")]
    cost: u32,
    #[tabled(rename = "Impact")]
    impact: String,
}

#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Horizon")]
    horizon: String,
    #[tabled(rename = "Final Value")]
    final_value: String,
}

/// Run an analysis over the last `since` and print findings and suggestions
pub async fn analyze(
    client: &ApiClient,
    since: &str,
    include_trend: bool,
    include_anomaly: bool,
    format: OutputFormat,
) -> Result<()> {
    let end = Utc::now().timestamp_millis();
    let options = AnalysisOptions {
        time_range: Some(TimeRange::ending_at(end, parse_period(since)?)),
        include_trend,
        include_anomaly,
        ..AnalysisOptions::default()
    };
    let report: PerformanceReport = client.post("api/v1/analysis", &options).await?;

    if let OutputFormat::Json = format {
        return print_json(&report);
    }

    let analysis = &report.analysis;
    print_header(&format!("Performance Analysis (last {})", since));
    if let Some(error) = &analysis.error {
        print_warning(&format!("Analysis failed: {}", error));
        return Ok(());
    }
    println!(
        "Metrics analyzed: {}   Critical issues: {}",
        analysis.summary.metrics_analyzed,
        if analysis.summary.critical_issues > 0 {
            analysis.summary.critical_issues.to_string().red().to_string()
        } else {
            "0".green().to_string()
        }
    );
    println!();

    println!("{}", "Bottlenecks".bold());
    let bottlenecks: Vec<BottleneckRow> = analysis
        .bottlenecks
        .iter()
        .map(|b| BottleneckRow {
            source: b.source.clone(),
            metric: b.kind.clone(),
            severity: color_status(&b.severity.to_string()),
            since: format_timestamp(b.start_time),
            duration: format_duration(b.duration_ms),
            max: format!("{:.2}", b.max_value),
        })
        .collect();
    print_table(bottlenecks, "No sustained bottlenecks");
    println!();

    if include_trend {
        println!("{}", "Trends".bold());
        let trends: Vec<TrendRow> = analysis
            .trends
            .iter()
            .map(|t| TrendRow {
                source: t.source.clone(),
                metric: t.metric.clone(),
                direction: t.direction.to_string(),
                slope: format!("{:+.3}", t.slope),
                significance: format!("{:.2}", t.significance),
            })
            .collect();
        print_table(trends, "No significant trends");
        println!();
    }

    println!("{}", "Recommendations".bold());
    let suggestions: Vec<SuggestionRow> = report
        .recommendations
        .iter()
        .map(|s| SuggestionRow {
            id: s.id.clone(),
            priority: color_status(&s.priority.to_string()),
            title: s.title.clone(),
            cost: s.cost_points,
            impact: format!("{:.0}", s.expected_impact),
        })
        .collect();
    print_table(suggestions, "Nothing to recommend");

    if !report.alerts.is_empty() {
        println!();
        print_warning(&format!("{} active alert(s)", report.alerts.len()));
    }

    Ok(())
}

/// Forecast metrics from the trained trend models
pub async fn predict(
    client: &ApiClient,
    horizon: usize,
    metrics: Vec<String>,
    confidence: f64,
    format: OutputFormat,
) -> Result<()> {
    let request = PredictionRequest {
        forecast_horizon: horizon,
        metrics: if metrics.is_empty() { None } else { Some(metrics) },
        confidence,
    };
    let forecasts: Vec<Forecast> = client.post("api/v1/predictions", &request).await?;

    if let OutputFormat::Json = format {
        return print_json(&forecasts);
    }

    print_header("Forecasts");
    let rows: Vec<ForecastRow> = forecasts
        .iter()
        .map(|f| ForecastRow {
            metric: f.metric.clone(),
            direction: f.direction.to_string(),
            confidence: format_confidence(f.confidence),
            horizon: f
                .points
                .last()
                .map(|p| format_timestamp(p.timestamp))
                .unwrap_or_default(),
            final_value: f
                .points
                .last()
                .map(|p| format!("{:.2}", p.value))
                .unwrap_or_default(),
        })
        .collect();
    print_table(rows, "No trained models meet the requested confidence");

    Ok(())
}
