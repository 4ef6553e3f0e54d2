//! tunedl - Download songs, albums and playlists from QQ Music links

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod config;
mod download;
mod error;
mod pipeline;
mod quality;
mod resolver;
mod tag;
mod utils;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tunedl=debug,reqwest=debug"
    } else {
        "tunedl=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    cli.log_parameters();

    let settings = cli.to_settings();
    let client = Arc::new(api::MusicClient::new(settings.basic.timeout)?);

    let mut ctx = pipeline::RunContext::new(settings, client, cli.urls.clone());
    let stages = pipeline::default_stages();
    pipeline::run(&mut ctx, &stages).await
}
