//! update_daily_usage_statistics - daily rollup batch job
//!
//! Aggregates the previous day's (or, with `--today`, the current
//! day's) usage statistics into the daily result tables. Intended to
//! run from a scheduler shortly after midnight.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use opalstats_core::{AggregationWindow, Config, Database, UpdateRunner};

#[derive(Parser, Debug)]
#[command(name = "update_daily_usage_statistics")]
#[command(about = "Populate the daily usage statistics tables")]
#[command(version)]
struct Args {
    /// Aggregate today's (still open) window instead of yesterday's
    #[arg(long)]
    today: bool,

    /// Delete all existing statistics data before running
    #[arg(long)]
    force_delete: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = opalstats_core::logging::init(&config.logging).ok();

    let db_path = config.database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    // Force-delete handling comes first; its refusal and cancellation
    // paths return before any today announcement.
    if args.force_delete {
        if config.environment.production {
            println!("Existing usage statistics data cannot be deleted in production environment");
            return Ok(());
        }
        println!("Deleting existing usage statistics data");
        if !confirm()? {
            println!("Usage statistics update is cancelled");
            return Ok(());
        }
        db.clear_all_statistics()
            .context("failed to delete existing statistics data")?;
        tracing::info!("Cleared all statistics tables and watermarks");
    }

    if args.today {
        println!("Calculating usage statistics for today");
    }

    let window = if args.today {
        AggregationWindow::today()
    } else {
        AggregationWindow::yesterday()
    };

    let outcome = UpdateRunner::new(&db)
        .run(&window, !args.today)
        .context("failed to populate daily statistics")?;
    tracing::info!(?outcome, "Aggregation run finished");

    println!("Successfully populated daily statistics data");
    Ok(())
}

/// Ask the operator to confirm the force-delete on stdin
fn confirm() -> Result<bool> {
    print!("Are you sure you want to do this?\n\nType 'yes' to continue, or 'no' to cancel: ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(answer.trim() == "yes")
}
