//! Follow-up Importer - Loads order spreadsheets into the follow-up tracker
//!
//! Responsibilities:
//! - Decode the export (UTF-8 or Latin-1), find its header and detect the layout
//! - Normalize rows into orders and initial follow-up requests
//! - Upsert orders by `pv_code` and report created/updated counts
//! - Promote orders with a missed forecast to ATRASADO
//! - Delete an order with its requests and comments
//!
//! CRITICAL: parsing is DETERMINISTIC
//! Same file + same "today" = same rows

mod columns;
mod config;
mod decode;
mod error;
mod header;
mod import;
mod lines;
mod model;
mod normalize;
mod overdue;
mod reconcile;
mod report;
mod store;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ImportError;
use crate::import::{import_bytes, outcome_of, read_input, ImportOptions, ImportSummary};
use crate::store::{MemoryStore, OrderStore, PgStore};

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports order spreadsheets into the follow-up tracker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a `;`-delimited order export
    Import {
        /// Path to the CSV file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Dry run - parse and reconcile in memory, don't touch the database
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Print the result as JSON instead of the human message
        #[arg(long, default_value = "false")]
        json: bool,

        /// Write per-row diagnostics to this CSV file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Mark orders whose latest forecast has passed as ATRASADO
    MarkOverdue {
        /// Repeat every N seconds instead of running once
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Delete an order together with its requests and comments
    DeleteOrder {
        #[arg(long)]
        pv_code: String,
    },
    /// Apply database migrations
    Migrate,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("importer=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

async fn connect(config: &Config) -> Result<PgStore> {
    let store = PgStore::connect(config).await?;
    store.migrate().await?;
    Ok(store)
}

fn print_summary(summary: &ImportSummary) {
    println!("Encoding: {}", summary.encoding);
    println!("Schema: {} (header at line {})", summary.schema, summary.header_line);
    println!("Created: {}", summary.created);
    println!("Updated: {}", summary.updated);
    println!("Skipped: {}", summary.skipped);
    println!("Failed: {}", summary.failed);
    for diagnostic in summary.diagnostics.iter().take(5) {
        println!(
            "  [line {}] {} {} {}",
            diagnostic.line,
            diagnostic.kind,
            diagnostic.pv_code.as_deref().unwrap_or("-"),
            diagnostic.detail
        );
    }
    if summary.diagnostics.len() > 5 {
        println!("  ... {} more", summary.diagnostics.len() - 5);
    }
}

async fn run_import(
    config: &Config,
    file: Option<PathBuf>,
    dry_run: bool,
    json: bool,
    report: Option<PathBuf>,
) -> Result<()> {
    if !json {
        println!("=== Follow-Up Importer ===");
        if let Some(path) = &file {
            println!("File: {}", path.display());
        }
        println!("Mode: {}", if dry_run { "dry-run" } else { "live" });
    }

    let result = async {
        let bytes = read_input(file.as_deref()).await?;

        // Live stores are only opened once there is something to import
        let (store, requester_id): (Box<dyn OrderStore>, Uuid) = if dry_run {
            (Box::new(MemoryStore::new()) as Box<dyn OrderStore>, Uuid::new_v4())
        } else {
            let store = connect(config).await.map_err(ImportError::persistence)?;
            let requester_id = store
                .ensure_default_requester()
                .await
                .map_err(ImportError::persistence)?;
            (Box::new(store) as Box<dyn OrderStore>, requester_id)
        };

        let options = ImportOptions {
            today: today(),
            max_key_len: config.max_key_len,
            batch_size: config.batch_size,
            requester_id,
        };
        import_bytes(store.as_ref(), &bytes, &options).await
    }
    .await;

    let outcome = outcome_of(&result);

    if let (Some(path), Ok(summary)) = (&report, &result) {
        crate::report::write_report(path, &summary.diagnostics)?;
        if !json {
            println!("Report: {}", path.display());
        }
    }

    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        if let Ok(summary) = &result {
            print_summary(summary);
        }
        println!("\n{}", outcome.message());
    }

    result?;
    Ok(())
}

async fn run_mark_overdue(config: &Config, interval_secs: Option<u64>) -> Result<()> {
    println!("=== Overdue Check ===");
    let store = connect(config).await?;

    match interval_secs.filter(|s| *s > 0) {
        Some(secs) => {
            println!("Interval: {}s", secs);
            overdue::run_periodically(&store, Duration::from_secs(secs), today).await
        }
        None => {
            let promoted = overdue::mark_overdue(&store, today()).await?;
            println!("Updated {} orders to ATRASADO.", promoted);
            Ok(())
        }
    }
}

async fn run_delete(config: &Config, pv_code: &str) -> Result<()> {
    println!("=== Delete Order ===");
    println!("PV: {}", pv_code);
    let store = connect(config).await?;

    if store
        .delete_order_cascade(pv_code)
        .await
        .with_context(|| format!("Failed to delete order {}", pv_code))?
    {
        println!("Order deleted.");
    } else {
        println!("Order not found.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env();
    init_tracing(config.log_json);

    match args.command {
        Command::Import {
            file,
            dry_run,
            json,
            report,
        } => run_import(&config, file, dry_run, json, report).await,
        Command::MarkOverdue { interval_secs } => run_mark_overdue(&config, interval_secs).await,
        Command::DeleteOrder { pv_code } => run_delete(&config, &pv_code).await,
        Command::Migrate => {
            println!("=== Migrate ===");
            connect(&config).await?;
            println!("Migrations applied.");
            Ok(())
        }
    }
}
