//! wikicounts - Wikimedia pagecounts ETL and query service.

mod cli;

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Per-run log file in `dir`, named after the start time.
fn open_log_file(dir: &Path) -> anyhow::Result<File> {
    std::fs::create_dir_all(dir)?;
    let name = format!(
        "wikidumps_{}.log",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    Ok(File::create(dir.join(name))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let args = cli::Cli::parse();

    // Initialize logging based on verbosity
    let default_filter = if args.verbose {
        "wikicounts=info"
    } else {
        "wikicounts=warn"
    };

    let file_layer = match args.log_dir {
        Some(ref dir) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(dir)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    // Run CLI
    cli::run(args).await
}
