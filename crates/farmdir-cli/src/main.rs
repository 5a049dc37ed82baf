use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "farmdir")]
#[command(about = "Indoor farms directory: refresh sheets, load the database, serve search")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download the directory sheets into the data directory.
    Refresh {
        /// Only refresh this sheet; repeatable.
        #[arg(long = "sheet", value_name = "NAME")]
        sheets: Vec<String>,
        /// Overwrite the current CSVs without keeping a backup copy.
        #[arg(long)]
        no_backup: bool,
    },
    /// Drop and recreate the tables, then load every sheet in one commit.
    Initdb {
        /// Load into memory only and print the report.
        #[arg(long)]
        dry_run: bool,
    },
    /// Geocode facility addresses into the locations sheet.
    Geocode {
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Serve the search front end.
    Serve,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

/// A bare `farmdir` runs a dry-run load; resetting the database needs an explicit `initdb`.
fn command_or_default(command: Option<Commands>) -> Commands {
    command.unwrap_or(Commands::Initdb { dry_run: true })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();

    match command_or_default(cli.command) {
        Commands::Refresh { sheets, no_backup } => {
            let stored = farmdir_load::refresh_sheets_from_env(&sheets, !no_backup).await?;
            for sheet in stored {
                println!(
                    "refreshed {}: {} bytes sha256={} path={}{}",
                    sheet.sheet_name,
                    sheet.byte_size,
                    sheet.content_hash,
                    sheet.path.display(),
                    sheet
                        .backup_path
                        .map(|p| format!(" backup={}", p.display()))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Initdb { dry_run } => {
            let report = farmdir_load::run_load_once_from_env(dry_run).await;
            let json = serde_json::to_string_pretty(&report).context("serializing load report")?;
            println!("{json}");
            if !report.success {
                bail!(
                    "load run {} failed: {}",
                    report.run_id,
                    report.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Geocode { output } => {
            let (path, located) = farmdir_load::write_locations_from_env(output).await?;
            println!("geocoded {located} facilities into {}", path.display());
        }
        Commands::Serve => {
            farmdir_web::serve_from_env().await?;
        }
    }

    Ok(())
}
