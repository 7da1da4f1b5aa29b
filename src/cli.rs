use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::harvest::config::PolicyMode;
use crate::harvest::paths::resolve_paths;
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "yb-harvest",
    version,
    about = "Incremental, versioned downloader for statistics yearbook data files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover period pages and download new or changed files
    Crawl {
        /// Download policy: `safe` keeps prior versions, `overwrite` replaces them
        #[arg(long)]
        mode: Option<String>,
        /// Override the data directory files are saved under
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Earliest period (year) to crawl, inclusive
        #[arg(long, value_name = "YEAR")]
        from: Option<i32>,
        /// Latest period (year) to crawl, inclusive
        #[arg(long, value_name = "YEAR")]
        to: Option<i32>,
        /// Override the root listing URL
        #[arg(long, value_name = "URL")]
        root_url: Option<String>,
    },
    /// Drop ledger rows whose files are gone and follow expanded archives
    Reconcile,
    /// Show configuration, paths, and ledger summary
    Status,
    /// Import a legacy JSON download manifest into the ledger
    Migrate {
        /// Path to the legacy JSON manifest
        #[arg(long, value_name = "FILE")]
        from: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = resolve_paths()?;
    logging::init(&paths.logs_dir);

    let report = match cli.command {
        Commands::Crawl {
            mode,
            out,
            from,
            to,
            root_url,
        } => {
            let mode = mode.as_deref().map(str::parse::<PolicyMode>).transpose()?;
            commands::crawl::run(&commands::crawl::CrawlOptions {
                mode,
                out,
                from,
                to,
                root_url,
            })?
        }
        Commands::Reconcile => commands::reconcile::run()?,
        Commands::Status => commands::status::run()?,
        Commands::Migrate { from } => {
            commands::migrate::run(&commands::migrate::MigrateOptions { from })?
        }
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &CommandReport) {
    println!("{}: {}", report.command, if report.ok { "ok" } else { "issues" });
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
}
