use std::{process::ExitCode, time::Duration};

use anyhow::Result;
use clap::Parser;
use client_core::{http_coordinator, ActivityLog, ClientConfig, WaitConfig};
use shared::domain::{Category, CreateLocation};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Submits a new location and waits for the backend to confirm it.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://localhost:3001")]
    server_url: String,
    #[arg(long)]
    name: String,
    /// One of Town, City, County/Region, Country, Continent.
    #[arg(long)]
    category: Category,
    #[arg(long, default_value = "")]
    description: String,
    /// Ask the backend to hold the response until the notification exists.
    #[arg(long)]
    await_on_server: bool,
    /// Skip listening and report a timeout once the wait elapses.
    #[arg(long)]
    simulate_timeout: bool,
    #[arg(long, default_value_t = 1)]
    timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    request_timeout_secs: u64,
}

impl Args {
    fn command(&self) -> CreateLocation {
        CreateLocation {
            name: self.name.clone(),
            category: self.category,
            description: self.description.clone(),
        }
    }

    fn wait(&self) -> WaitConfig {
        WaitConfig {
            await_on_server: self.await_on_server,
            notification_timeout_secs: self.timeout_secs,
            simulate_timeout: self.simulate_timeout,
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_url: self.server_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let coordinator = http_coordinator(&args.client_config())?;
    let log = ActivityLog::new();
    let outcome = coordinator.submit(args.command(), &args.wait(), &log).await;
    info!(?outcome, "submission finished");

    for entry in log.snapshot() {
        println!("{entry}");
    }
    println!();
    println!("{}", outcome.summary());

    Ok(if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
