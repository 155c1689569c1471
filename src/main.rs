mod cli;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use cli::{Cli, Commands, DlqCommand};
use ingestbox::config::Config;
use ingestbox::ingest::WorkUnit;
use ingestbox::observability::{self, Metrics};
use ingestbox::planner::Planner;
use ingestbox::queue::{FjallQueue, QueueOptions, QueueRouter, WorkQueue};
use ingestbox::server::{self, AppState};
use ingestbox::storage::StorageClient;
use ingestbox::worker::{self, DrainSummary, Worker, WorkerSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();
    let config = Config::load_with(cli.config)?;
    observability::init_tracing(&config.telemetry);

    match cli.command {
        Commands::Plan(args) => {
            let run_date = args.date.unwrap_or_else(|| Utc::now().date_naive());
            plan(&config, run_date).await?
        }
        Commands::Work(args) => work(&config, args.endpoint.as_deref()).await?,
        Commands::Serve(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            serve(&config, address).await?
        }
        Commands::Dlq { command } => dlq(&config, command)?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn open_queues(config: &Config) -> Result<QueueRouter, AnyError> {
    Ok(QueueRouter::open(
        &config.queue.path,
        &config.planner.endpoints,
        QueueOptions::from(&config.queue),
    )?)
}

fn build_worker(config: &Config, metrics: Arc<Metrics>) -> Result<Arc<Worker>, AnyError> {
    let source = worker::source::from_config(&config.fetch, metrics.clone())?;
    let storage = StorageClient::from_config(&config.storage)?;
    Ok(Arc::new(Worker::new(
        WorkerSettings::from(config),
        source,
        storage,
        metrics,
    )))
}

async fn plan(config: &Config, run_date: NaiveDate) -> Result<(), AnyError> {
    let metrics = Arc::new(Metrics::new());
    let planner = Planner::new(config.planner.clone(), open_queues(config)?, metrics);

    let summary = planner.plan(run_date).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn work(config: &Config, only: Option<&str>) -> Result<(), AnyError> {
    let queues = open_queues(config)?;
    let worker = build_worker(config, Arc::new(Metrics::new()))?;

    let selected = match only {
        Some(endpoint) => vec![(endpoint.to_string(), queues.route(endpoint)?)],
        None => queues
            .iter()
            .map(|(endpoint, queue)| (endpoint.to_string(), queue.clone()))
            .collect(),
    };

    let mut total = DrainSummary::default();
    for (endpoint, queue) in selected {
        let summary = worker::drain(worker.clone(), queue, config.queue.concurrency).await?;
        info!(endpoint, received = summary.received, "Endpoint drained");
        total.merge(&summary);
    }

    println!("{}", serde_json::to_string_pretty(&total)?);
    Ok(())
}

async fn serve(config: &Config, address: SocketAddr) -> Result<(), AnyError> {
    let queues = open_queues(config)?;
    let metrics = Arc::new(Metrics::new());
    let worker = build_worker(config, metrics.clone())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumers = Vec::new();
    for (_, queue) in queues.iter() {
        consumers.push(tokio::spawn(worker::run(
            worker.clone(),
            queue.clone(),
            config.queue.concurrency,
            config.queue.poll_interval.as_duration(),
            shutdown_rx.clone(),
        )));
    }

    let state = AppState { queues, metrics };
    server::run(address, state, server::shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    for consumer in consumers {
        consumer.await?;
    }
    Ok(())
}

fn dlq(config: &Config, command: DlqCommand) -> Result<(), AnyError> {
    let keyspace = FjallQueue::open_keyspace(&config.queue.path)?;
    let options = QueueOptions::from(&config.queue);

    match command {
        DlqCommand::List { endpoint, limit } => {
            let queue = FjallQueue::open_in(&keyspace, &endpoint, options)?;
            for letter in queue.list_dead_letters(limit)? {
                let unit = WorkUnit::from_body(&letter.body)
                    .map(|unit| format!("{}/{}/{}", unit.endpoint, unit.date, unit.page))
                    .unwrap_or_else(|_| String::from_utf8_lossy(&letter.body).into_owned());
                println!(
                    "{}\t{}\treceives={}\t{}",
                    letter.id, unit, letter.receive_count, letter.reason
                );
            }
        }
        DlqCommand::Redrive { endpoint } => {
            let queue = FjallQueue::open_in(&keyspace, &endpoint, options)?;
            let moved = queue.redrive_dead_letters()?;
            queue.flush()?;
            println!("redrove {moved} message(s) on {}", queue.name());
        }
    }
    Ok(())
}
