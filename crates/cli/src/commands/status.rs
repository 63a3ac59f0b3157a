//! Status and dashboard commands

use anyhow::Result;
use colored::Colorize;
use monitor_lib::{DashboardData, MonitorStatus};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_score, color_status, format_duration, format_timestamp, print_header, print_json,
    print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Severity")]
    severity: String,
}

fn print_status(status: &MonitorStatus) {
    let state = if status.running { "running" } else { "stopped" };
    println!("State:              {}", color_status(state));
    println!("Analyzer:           {}", color_status(&status.analyzer_state.to_string()));
    if let Some(started_at) = status.started_at {
        println!("Started:            {}", format_timestamp(started_at));
        println!("Uptime:             {}", format_duration(status.uptime_ms));
    }
    println!(
        "Sources:            {} registered, {} disabled",
        status.sources_registered, status.sources_disabled
    );
    println!("Ticks completed:    {}", status.ticks_completed);
    if let Some(last) = status.last_collection {
        println!("Last collection:    {}", format_timestamp(last));
    }
    if let Some(health) = status.health {
        println!(
            "Health:             {} ({})",
            color_score(health.value),
            color_status(&health.status.to_string())
        );
    }
}

/// Show daemon status
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let dashboard: DashboardData = client.get("api/v1/dashboard").await?;
    let status = dashboard.status;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_header("Monitor Status");
            print_status(&status);
        }
    }

    Ok(())
}

/// Show the dashboard: status, health components, alerts and anomalies
pub async fn show_dashboard(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let dashboard: DashboardData = client.get("api/v1/dashboard").await?;

    if let OutputFormat::Json = format {
        return print_json(&dashboard);
    }

    print_header("Performance Dashboard");
    print_status(&dashboard.status);
    println!();

    println!("{}", "Health".bold());
    let components: Vec<ComponentRow> = dashboard
        .current
        .health
        .components
        .iter()
        .map(|(name, score)| ComponentRow {
            name: name.clone(),
            score: color_score(score.value),
            status: color_status(&score.status.to_string()),
        })
        .collect();
    print_table(components, "No thresholded metrics reported yet");
    println!();

    println!("{}", "Active Alerts".bold());
    let alerts: Vec<AlertRow> = dashboard
        .active_alerts
        .iter()
        .map(|alert| AlertRow {
            time: format_timestamp(alert.timestamp),
            kind: alert.kind.to_string(),
            severity: color_status(&alert.severity.to_string()),
            message: alert.message.clone(),
        })
        .collect();
    print_table(alerts, "No active alerts");
    println!();

    println!("{}", "Recent Anomalies".bold());
    let anomalies: Vec<AnomalyRow> = dashboard
        .recent_anomalies
        .iter()
        .map(|anomaly| AnomalyRow {
            time: format_timestamp(anomaly.timestamp),
            source: anomaly.source.clone(),
            metric: anomaly.metric.clone(),
            value: format!("{:.2}", anomaly.value),
            expected: format!(
                "{:.2}..{:.2}",
                anomaly.expected_range.low, anomaly.expected_range.high
            ),
            severity: color_status(&anomaly.severity.to_string()),
        })
        .collect();
    print_table(anomalies, "No anomalies detected");

    if dashboard.status.sources_disabled > 0 {
        println!();
        print_warning(&format!(
            "{} source(s) disabled; re-enable with `perfmon collectors enable <name>`",
            dashboard.status.sources_disabled
        ));
    }

    Ok(())
}
