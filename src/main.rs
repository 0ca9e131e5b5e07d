mod bundle;
mod cli;
mod config;
mod db;
mod hub;
mod observer;
mod operation;
mod provider;
mod snapshot;
mod source;
mod task;
mod update;
mod version;
mod view_model;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.output.log_filter().into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Starting Freshen {}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
