mod client;
mod config;
mod error;
mod models;
mod pipeline;
mod storage;
mod transform;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "twelvedata-etl", about = "TwelveData hourly market data ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch hourly bars + indicators for the configured tickers and load them
    Run,

    /// Show database statistics
    Stats,

    /// List all stored ticker symbols
    Symbols,

    /// Create the schema without fetching anything
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "twelvedata_etl=info,warn",
        1 => "twelvedata_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let _t = utils::Timer::start("ETL run");
            let stats = Pipeline::new(config).run().await?;
            info!(
                "Done: {} tickers, {} bars, {} errors",
                stats.tickers_processed, stats.bars_upserted, stats.errors
            );
            if stats.errors > 0 {
                anyhow::bail!("{} ticker(s) failed; see log above", stats.errors);
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let bars = repo.bar_count()?;
            let tickers = repo.ticker_count()?;
            let (min, max) = repo.ts_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  TwelveData ETL — Store Stats");
            println!("─────────────────────────────────");
            println!("  Tickers     : {}", utils::fmt_number(tickers));
            println!("  Hourly bars : {}", utils::fmt_number(bars));
            println!("  From        : {}", min.map(|t| t.to_string()).unwrap_or("—".into()));
            println!("  To          : {}", max.map(|t| t.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Symbols => {
            let repo = Repository::open(&config.storage.db_path)?;
            let syms = repo.list_symbols()?;
            if syms.is_empty() {
                println!("No symbols — run `twelvedata-etl run` first.");
            } else {
                println!("{} symbols:", syms.len());
                for s in &syms {
                    println!("  {}", s);
                }
            }
        }

        Command::InitDb => {
            Repository::open(&config.storage.db_path)?.ensure_schema()?;
            println!("Schema ready.");
        }
    }

    Ok(())
}
