//! Performance Monitor CLI
//!
//! A command-line tool for viewing live metrics, running analyses
//! and managing metric sources of a running perf-monitor daemon.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{analysis, collectors, metrics, status};
use monitor_lib::Granularity;

/// Performance Monitor CLI
#[derive(Parser)]
#[command(name = "perfmon")]
#[command(author, version, about = "CLI for the Performance Monitor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via PERFMON_API_URL env var)
    #[arg(long, env = "PERFMON_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show daemon status
    Status,

    /// Show health, active alerts and recent anomalies
    Dashboard,

    /// Show the latest collected metrics
    Current,

    /// Show historical metrics
    History {
        /// Time period (e.g., 30m, 1h, 7d)
        #[arg(long, default_value = "1h")]
        since: String,

        /// Comma-separated list of sources to include
        #[arg(long)]
        collectors: Option<String>,

        /// Bucket width (minute, hour, day)
        #[arg(long, default_value = "minute")]
        aggregation: Granularity,
    },

    /// Run a performance analysis
    Analyze {
        /// Time period to analyze (e.g., 30m, 1h, 7d)
        #[arg(long, default_value = "1h")]
        since: String,

        /// Skip trend analysis
        #[arg(long)]
        skip_trends: bool,

        /// Skip anomaly analysis
        #[arg(long)]
        skip_anomalies: bool,
    },

    /// Forecast metrics from trained trend models
    Predict {
        /// Number of forecast steps (uses the daemon default if 0)
        #[arg(long, default_value_t = 0)]
        horizon: usize,

        /// Restrict to these metrics (repeatable)
        #[arg(long = "metric")]
        metrics: Vec<String>,

        /// Minimum model fit required (0.0 - 1.0)
        #[arg(long, default_value_t = 0.5)]
        confidence: f64,
    },

    /// Manage metric sources
    #[command(subcommand)]
    Collectors(CollectorCommands),

    /// Trigger a collection immediately
    Collect,
}

#[derive(Subcommand)]
pub enum CollectorCommands {
    /// List registered sources
    List,

    /// Re-enable a disabled source
    Enable {
        /// Source name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Dashboard => status::show_dashboard(&client, cli.format).await?,
        Commands::Current => metrics::show_current(&client, cli.format).await?,
        Commands::History {
            since,
            collectors,
            aggregation,
        } => {
            metrics::show_history(&client, &since, collectors, aggregation, cli.format).await?;
        }
        Commands::Analyze {
            since,
            skip_trends,
            skip_anomalies,
        } => {
            analysis::analyze(&client, &since, !skip_trends, !skip_anomalies, cli.format).await?;
        }
        Commands::Predict {
            horizon,
            metrics,
            confidence,
        } => {
            analysis::predict(&client, horizon, metrics, confidence, cli.format).await?;
        }
        Commands::Collectors(cmd) => match cmd {
            CollectorCommands::List => collectors::list(&client, cli.format).await?,
            CollectorCommands::Enable { name } => {
                collectors::enable(&client, &name, cli.format).await?;
            }
        },
        Commands::Collect => collectors::collect(&client, cli.format).await?,
    }

    Ok(())
}
