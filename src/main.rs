use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use headlines::config::{Config, DEFAULT_CONFIG_PATH};
use headlines::run::{run, RunOptions};

#[derive(Parser, Debug)]
#[command(
    name = "headlines",
    about = "Fetches configured feeds and delivers the articles not published before"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print what would be delivered without delivering or marking anything
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            on_signal.cancel();
        }
    });

    let options = RunOptions {
        dry_run: args.dry_run,
        ..RunOptions::default()
    };
    let summary = run(&config, options, &cancel).await?;

    tracing::info!(
        feeds = summary.feeds,
        failed_feeds = summary.failed_feeds,
        new_articles = summary.new_articles,
        "Finished"
    );
    Ok(())
}
