mod config;
mod dedup;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::SnapshotStore;

#[derive(Parser)]
#[command(name = "kfcc-rates", about = "KFCC branch directory and deposit-rate crawler", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Discover branches, collect today's rates and write a snapshot (default)
    Crawl {
        /// Afterwards remove rate snapshots older than DAYS days
        #[arg(long, value_name = "DAYS")]
        cleanup: Option<i64>,
    },

    /// Show snapshot store statistics
    Stats,

    /// Collect management-evaluation grades for the stored branch list
    Grades {
        /// Ignore the collection-month gate (same as FORCE_GRADE_COLLECTION=true)
        #[arg(long)]
        force: bool,
    },

    /// Show the stored grade of one branch for the configured evaluation period
    Grade {
        /// 5-digit branch code
        code: String,
    },

    /// Remove rate snapshots older than DAYS days
    Cleanup {
        #[arg(value_name = "DAYS")]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "kfcc_rates=info,warn",
        1 => "kfcc_rates=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    match run(cli.command.unwrap_or(Command::Crawl { cleanup: None })).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("💥 {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let mut config = AppConfig::load()?;

    match command {
        Command::Crawl { cleanup } => {
            let stats = Pipeline::new(config)?.run(cleanup).await?;
            info!(
                "🎉 Crawl complete: {} branches, {} rate records",
                utils::fmt_number(stats.branches_fetched),
                utils::fmt_number(stats.rate_records)
            );
            if stats.cleaned_files > 0 {
                info!("Removed {} old snapshot(s)", stats.cleaned_files);
            }
        }

        Command::Stats => {
            let stats = SnapshotStore::open(&config.storage)?.stats()?;
            let yes_no = |b: bool| if b { "yes" } else { "no" };
            println!("─────────────────────────────────");
            println!("  KFCC rates — Snapshot Store");
            println!("─────────────────────────────────");
            println!("  Data dir     : {}", stats.data_dir.display());
            println!("  Branch list  : {}", yes_no(stats.branch_list_exists));
            println!("  Rates dir    : {}", yes_no(stats.rates_dir_exists));
            println!("  Backups dir  : {}", yes_no(stats.backup_dir_exists));
            println!("  Rate files   : {}", utils::fmt_number(stats.total_rate_files));
            println!("  Backups      : {}", utils::fmt_number(stats.total_backup_files));
            println!(
                "  Latest date  : {}",
                stats.latest_date.map(|d| d.to_string()).unwrap_or("—".into())
            );
            println!("  Size on disk : {}", utils::fmt_bytes(stats.total_size_bytes));
            println!("─────────────────────────────────");
            for date in stats.available_dates.iter().take(10) {
                println!("  {}", date);
            }
            if stats.available_dates.len() > 10 {
                println!("  … and {} more", stats.available_dates.len() - 10);
            }
        }

        Command::Grades { force } => {
            config.grades.force |= force;
            let saved = Pipeline::new(config)?.collect_grades().await?;
            info!("Grade collection finished: {} grades saved", saved);
        }

        Command::Grade { code } => {
            let (year, month) = (config.grades.evaluation_year, config.grades.evaluation_month);
            match SnapshotStore::open(&config.storage)?.grade_for_branch(&code, year, month)? {
                Some(g) => println!(
                    "{} {} ({} {}): {} - {} [{} {}]",
                    g.branch_code,
                    g.branch_name,
                    g.region,
                    g.sub_region,
                    g.grade_name,
                    g.grade_description,
                    g.evaluation_agency,
                    g.evaluation_date
                ),
                None => println!("No {}-{:02} grade stored for {}.", year, month, code),
            }
        }

        Command::Cleanup { days } => {
            let removed = SnapshotStore::open(&config.storage)?.cleanup_older_than(days)?;
            println!("Removed {} snapshot file(s) older than {} days.", removed, days);
        }
    }

    Ok(())
}
