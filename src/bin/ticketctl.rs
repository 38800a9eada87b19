//! Ticket service controller
//!
//! Headless counterpart to the dashboard for scripts and quick checks.
//!
//! Usage:
//!   cargo run --bin ticketctl -- status
//!   cargo run --bin ticketctl -- configure --total-tickets 1000 --release-rate 1500 \
//!       --retrieval-rate 2000 --max-capacity 500
//!   cargo run --bin ticketctl -- start
//!   cargo run --bin ticketctl -- watch
//!
//! There is no session here, so start/stop go straight to the service and its
//! own checks decide; a rejection exits non-zero.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use ticket_dashboard::domain::RemoteStatus;
use ticket_dashboard::infra::logging::{init_tracing, LogSink};
use ticket_dashboard::infra::{Config, Metrics};
use ticket_dashboard::io::{
    transport_from_config, EventStream, HttpTicketApi, StreamSettings, TicketApi,
};
use ticket_dashboard::services::{validate, LogDeduplicator, LogOutcome, MetricReconciler};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "ticketctl", version)]
#[command(about = "Control and observe the ticket release simulation")]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override `service.base_url`
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the service status
    Status,
    /// Validate and persist a simulation configuration
    Configure {
        #[arg(long)]
        total_tickets: String,
        /// Ticket release rate in ms (must be > 1000)
        #[arg(long)]
        release_rate: String,
        /// Customer retrieval rate in ms (must be > 1000)
        #[arg(long)]
        retrieval_rate: String,
        #[arg(long)]
        max_capacity: String,
    },
    /// Start the simulation
    Start,
    /// Stop the simulation
    Stop,
    /// Print deduplicated log lines and availability changes until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_tracing(LogSink::Stderr) {
        eprintln!("warning: logging disabled: {e:#}");
    }

    let mut config = Config::load(args.config.as_deref());
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url);
    }

    match run(args.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    let api = HttpTicketApi::from_config(config).context("Failed to build HTTP client")?;

    match command {
        Command::Status => {
            let body = api.status().await?;
            println!("{} [{}]", body.trim(), RemoteStatus::classify(&body));
        }
        Command::Configure { total_tickets, release_rate, retrieval_rate, max_capacity } => {
            let raw = [
                total_tickets.as_str(),
                release_rate.as_str(),
                retrieval_rate.as_str(),
                max_capacity.as_str(),
            ];
            let configuration = validate(raw)
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.field().label()))?;
            let body = api.configure(&configuration).await?;
            println!("{}", body.trim());
        }
        Command::Start => {
            let body = api.start().await.context("Error starting system")?;
            println!("{}", body.trim());
        }
        Command::Stop => {
            let body = api.stop().await.context("Error stopping system")?;
            println!("{}", body.trim());
        }
        Command::Watch => watch(config).await?,
    }

    Ok(())
}

async fn watch(config: &Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new());
    let stream = EventStream::connect(
        transport_from_config(config),
        StreamSettings::from_config(config),
        metrics.clone(),
    );
    let mut logs = stream.subscribe(config.log_topic());
    let mut availability = stream.subscribe(config.availability_topic());

    let mut log = LogDeduplicator::new(config.max_log_entries());
    let snapshot = MetricReconciler::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = logs.recv() => {
                let Some(message) = message else { break };
                let outcome = log.ingest(&message.body);
                outcome.record(&metrics);
                if let LogOutcome::Appended { .. } = outcome {
                    if let Some(entry) = log.tail(1).next() {
                        println!("{}", entry.text);
                    }
                }
            }
            message = availability.recv() => {
                let Some(message) = message else { break };
                match snapshot.ingest(&message.topic, &message.body) {
                    Ok(changed) => {
                        metrics.record_metric(changed);
                        if changed {
                            let current = snapshot.snapshot();
                            println!(
                                "available {}/{} ({}%)",
                                current.available_tickets,
                                current.total_tickets,
                                current.progress_percent()
                            );
                        }
                    }
                    Err(e) => {
                        metrics.record_protocol_error();
                        warn!(error = %e, "availability_payload_dropped");
                    }
                }
            }
        }
    }

    drop(logs);
    drop(availability);
    stream.disconnect().await;
    metrics.report().log();
    Ok(())
}
