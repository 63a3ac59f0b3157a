//! Metric source management commands

use anyhow::Result;
use monitor_lib::{CollectorRegistration, TickReport};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_score, color_status, format_timestamp, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct CollectorRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Weight")]
    weight: String,
    #[tabled(rename = "Errors")]
    errors: u64,
    #[tabled(rename = "Last Collection")]
    last_collection: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

/// List registered sources
pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let collectors: Vec<CollectorRegistration> = client.get("api/v1/collectors").await?;

    if let OutputFormat::Json = format {
        return print_json(&collectors);
    }

    let rows: Vec<CollectorRow> = collectors
        .iter()
        .map(|c| CollectorRow {
            name: c.name.clone(),
            status: color_status(if c.enabled { "enabled" } else { "disabled" }),
            category: c.category.clone(),
            weight: format!("{:.2}", c.weight),
            errors: c.error_count,
            last_collection: c
                .last_collection_time
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
            last_error: c.last_error.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    print_table(rows, "No metric sources registered");

    Ok(())
}

/// Re-enable a disabled source
pub async fn enable(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/collectors/{}/enable", name);
    let registration: CollectorRegistration = client.post(&path, &serde_json::json!({})).await?;

    match format {
        OutputFormat::Json => print_json(&registration)?,
        OutputFormat::Table => print_success(&format!("Metric source {} enabled", registration.name)),
    }

    Ok(())
}

/// Trigger one collection tick
pub async fn collect(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: TickReport = client.post("api/v1/collect", &serde_json::json!({})).await?;

    if let OutputFormat::Json = format {
        return print_json(&report);
    }

    let collection = &report.collection;
    print_success(&format!(
        "Collected {} source(s) at {}: {} succeeded, {} failed",
        collection.per_source.len(),
        format_timestamp(collection.timestamp),
        collection.succeeded(),
        collection.failed()
    ));
    println!("Health: {}", color_score(collection.health.overall.value));
    for name in &collection.newly_disabled {
        print_warning(&format!("Metric source {} was disabled", name));
    }
    for alert in &report.alerts {
        print_warning(&alert.message);
    }

    Ok(())
}
