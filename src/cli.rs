use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ingestbox")]
#[command(about = "Batch ingestion: plan work units, fetch pages, land them in the lake", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to $INGESTBOX_CONFIG, then config/ingestbox.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enqueue one work unit per endpoint and page for a run date
    Plan(PlanArgs),
    /// Drain the endpoint queues once and exit
    Work(WorkArgs),
    /// Run queue consumers plus the health/metrics server until shutdown
    Serve(ServeArgs),
    /// Inspect or redrive dead-lettered units
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    /// Run date (YYYY-MM-DD); defaults to today in UTC
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[derive(clap::Args, Debug)]
pub struct WorkArgs {
    /// Only drain this endpoint's queue
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// Show parked messages for an endpoint
    List {
        #[arg(long)]
        endpoint: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Move parked messages back onto the endpoint queue
    Redrive {
        #[arg(long)]
        endpoint: String,
    },
}
