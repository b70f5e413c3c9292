//! Centrix CI Relay: webhook-driven build trigger and outcome relay.
//!
//! Runs as an HTTP service by default. Each subcommand processes a single
//! activation (one event, one report, one rebuild) and prints the result
//! as JSON.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use ci_relay::config::RelayConfig;
use ci_relay::models::build::BuildId;
use ci_relay::models::event::SourceEvent;
use ci_relay::services::{dispatcher, rebuild, reporter, Relay};
use ci_relay::{metrics, routes};

#[derive(Parser)]
#[command(name = "ci-relay", about = "Centrix CI build relay")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_RELAY_PORT", default_value = "9090")]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the webhook, callback and rebuild endpoints (default)
    Serve,
    /// Dispatch one source event read from a file
    Dispatch {
        /// Event name as sent in X-GitHub-Event
        #[arg(long, value_parser = ["push", "pull_request"])]
        event: String,
        /// Path to the JSON payload
        #[arg(long)]
        payload: PathBuf,
    },
    /// Wait for a build to finish and relay its outcome
    Report { build_id: String },
    /// Resubmit a failed build
    Rebuild {
        build_id: String,
        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    let relay = Relay::from_config(config).context("failed to build relay clients")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(relay, cli.port).await,
        Command::Dispatch { event, payload } => {
            let body = tokio::fs::read(&payload)
                .await
                .with_context(|| format!("reading {}", payload.display()))?;
            let event = SourceEvent::parse(&event, &body)?
                .with_context(|| format!("unsupported event type {event}"))?;
            print_json(&dispatcher::dispatch(&relay, &event).await?)
        }
        Command::Report { build_id } => {
            print_json(&reporter::report(&relay, &BuildId::new(build_id)).await?)
        }
        Command::Rebuild { build_id, key } => print_json(
            &rebuild::rebuild(&relay, key.as_deref(), &BuildId::new(build_id)).await?,
        ),
    }
}

async fn serve(relay: Relay, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting Centrix CI Relay...");

    metrics::init_metrics();

    let app = routes::relay_router(relay);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Centrix CI Relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
