//! CLI parser and command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use console::style;
use tokio::sync::mpsc;

use wikicounts::config::{load_config, LoadOptions, ResolvedConfig};
use wikicounts::error::QueryError;
use wikicounts::models::Selection;
use wikicounts::pipeline::Pipeline;
use wikicounts::query::QueryService;
use wikicounts::storage::create_store;
use wikicounts::utils::redact::redact_url_password;
use wikicounts::warehouse::{self, Warehouse};

use super::icons::{dim_arrow, error, success, warn};
use super::menu;
use super::progress::RunProgress;

/// Shown for any failed read query.
pub const QUERY_FAILED_MESSAGE: &str =
    "Something went wrong. Please execute END and COMMIT statements in the warehouse and then try again.";

#[derive(Parser)]
#[command(name = "wikicounts")]
#[command(about = "Wikimedia pagecounts ETL and query service")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the credential documents (overrides the config file)
    #[arg(long, global = true)]
    credentials_dir: Option<PathBuf>,

    /// Also write logs to a timestamped file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, clean, stage, upload and load the configured hours
    Run,

    /// Top N pages per language by total views
    Top {
        /// Number of ranks to keep per language
        n: u32,
        /// Language code, or "all"
        #[arg(short, long, default_value = "all")]
        language: Selection<String>,
    },

    /// Total views per language
    ByLanguage {
        /// Language code, or "all"
        #[arg(default_value = "all")]
        language: Selection<String>,
    },

    /// Total views per day
    ByDate {
        /// Day as YYYY-MM-DD, or "all"
        #[arg(default_value = "all")]
        date: Selection<NaiveDate>,
    },

    /// Interactive query menu
    Menu,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration with secrets redacted
    Show,
}

/// Run the CLI.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let options = LoadOptions {
        config_path: cli.config,
        credentials_dir: cli.credentials_dir,
    };
    let resolved = load_config(options).await?;

    match cli.command {
        Commands::Run => cmd_run(&resolved).await,
        Commands::Top { n, language } => {
            let service = query_service(&resolved)?;
            report_query(service.top_n(n, &language).await)
        }
        Commands::ByLanguage { language } => {
            let service = query_service(&resolved)?;
            report_query(service.total_by_language(&language).await)
        }
        Commands::ByDate { date } => {
            let service = query_service(&resolved)?;
            report_query(service.total_by_date(&date).await)
        }
        Commands::Menu => menu::cmd_menu(&query_service(&resolved)?).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => cmd_config_show(&resolved),
        },
    }
}

fn connect_warehouse(resolved: &ResolvedConfig) -> anyhow::Result<Arc<dyn Warehouse>> {
    let store = create_store(&resolved.object_store, &resolved.settings)?;
    Ok(warehouse::connect(resolved, store)?)
}

fn query_service(resolved: &ResolvedConfig) -> anyhow::Result<QueryService> {
    Ok(QueryService::new(
        connect_warehouse(resolved)?,
        &resolved.settings.output_dir,
    ))
}

/// Print where a query result went, or the generic failure message.
fn report_query(result: Result<PathBuf, QueryError>) -> anyhow::Result<()> {
    match result {
        Ok(path) => {
            print_written(&path);
            Ok(())
        }
        Err(_) => anyhow::bail!(QUERY_FAILED_MESSAGE),
    }
}

pub(super) fn print_written(path: &Path) {
    println!("{} Results written to {}", success(), style(path.display()).cyan());
}

async fn cmd_run(resolved: &ResolvedConfig) -> anyhow::Result<()> {
    resolved.settings.ensure_directories()?;

    let store = create_store(&resolved.object_store, &resolved.settings)?;
    let wh = warehouse::connect(resolved, store.clone())?;

    let (tx, rx) = mpsc::channel(64);
    let progress = RunProgress::new(resolved.run.hours.len() as u64).spawn(rx);

    let pipeline = Pipeline::new(resolved, store, wh)?.with_events(tx);
    let result = pipeline.run().await;
    drop(pipeline);
    let _ = progress.await;

    match result {
        Ok(summary) => {
            let icon = if summary.is_clean() { success() } else { warn() };
            println!(
                "{} Finished {} for {} hour(s)",
                icon,
                resolved.run.date,
                resolved.run.hours.len()
            );
            for line in summary.to_string().lines() {
                println!("  {} {}", dim_arrow(), line);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", error(), e);
            Err(e.into())
        }
    }
}

fn cmd_config_show(resolved: &ResolvedConfig) -> anyhow::Result<()> {
    let hours: Vec<String> = resolved.run.hours.iter().map(|h| h.to_string()).collect();
    println!("{}", style("Run").bold());
    println!("  {} date:        {}", dim_arrow(), resolved.run.date);
    println!("  {} hours:       {}", dim_arrow(), hours.join(", "));
    println!(
        "  {} base_url:    {}",
        dim_arrow(),
        redact_url_password(&resolved.run.base_url)
    );
    println!("  {} warehouse:   {}", dim_arrow(), resolved.run.warehouse);

    println!("{}", style("Settings").bold());
    println!("{:#?}", resolved.settings);

    println!("{}", style("Object store").bold());
    println!("{:#?}", resolved.object_store);

    println!("{}", style("Warehouse").bold());
    println!("{:#?}", resolved.warehouse);
    Ok(())
}
