use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use spaced_sync::database::Database;
use spaced_sync::export::json::{export_json_to_path, import_json_from_path};
use spaced_sync::progress::{metrics, ProgressMetrics, StreakTracker};
use spaced_sync::{Config, ReviewEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spaced-sync", about = "Spaced-repetition reviews with offline sync", version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, default_value = "spaced-sync.toml")]
    config: PathBuf,

    /// Override the database path from the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a review of an item
    Review {
        item_id: String,
        /// Recall quality, 0 (blackout) to 5 (perfect)
        quality: i32,
    },

    /// List items due for review
    Due {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the current and longest streak
    Streak,

    /// Spend a streak freeze on a missed day
    Freeze {
        /// Add freezes to the inventory instead of spending one
        #[arg(long)]
        grant: Option<u32>,
    },

    /// Show queue counts, progress metrics and achievements
    Status,

    /// Export all review records to a JSON snapshot
    Export {
        path: PathBuf,
        /// Include pending sync entries in the snapshot
        #[arg(long)]
        with_pending: bool,
    },

    /// Replace all review records with a JSON snapshot
    Import { path: PathBuf },

    /// Delete all review records
    Purge {
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> spaced_sync::Result<()> {
    let mut config = Config::load(&cli.config)?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    let db = Database::open(&config.database_path)?;
    let engine = ReviewEngine::new(&db, config.scheduler.clone());
    let streaks = StreakTracker::new(db.records(), db.state());
    let now = Utc::now();

    match cli.command {
        Command::Review { item_id, quality } => {
            let record = engine.record_review(&item_id, quality)?;
            println!(
                "{}: {} (interval {} days, ease {:.2}), next review {}",
                record.item_id,
                record.status,
                record.interval_days,
                record.ease_factor,
                record.next_review_at.format("%Y-%m-%d %H:%M UTC"),
            );
        }
        Command::Due { limit } => {
            let due = engine.due_items(now, limit)?;
            if due.is_empty() {
                println!("Nothing due.");
            }
            for record in due {
                println!(
                    "{}  {}  due {}",
                    record.item_id,
                    record.status,
                    record.next_review_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Command::Streak => {
            println!("Current streak: {} days", streaks.current_streak(now)?);
            println!("Longest streak: {} days", streaks.longest_streak()?);
            println!("Freezes available: {}", streaks.freeze_inventory()?);
        }
        Command::Freeze { grant: Some(count) } => {
            let total = streaks.grant_freezes(count)?;
            println!("Freezes available: {total}");
        }
        Command::Freeze { grant: None } => {
            if streaks.try_use_freeze(now)? {
                println!("Freeze used. Current streak: {} days", streaks.current_streak(now)?);
            } else {
                println!("No freeze applied.");
            }
        }
        Command::Status => {
            let queue = db.queue();
            println!("Records: {}", db.records().count()?);
            println!("Pending sync entries: {}", queue.pending_count()?);
            println!("Dead-lettered entries: {}", queue.dead_letter_count()?);

            let progress = ProgressMetrics::collect(&db.records(), &streaks, now)?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
            for achievement in metrics::unlocked(&progress) {
                println!("  * {}", achievement.title());
            }
        }
        Command::Export { path, with_pending } => {
            export_json_to_path(&db, &path, with_pending)?;
            println!("Exported to {}", path.display());
        }
        Command::Import { path } => {
            let summary = import_json_from_path(&db, &path)?;
            println!(
                "Imported {} records ({} pending entries restored)",
                summary.records, summary.restored_entries
            );
        }
        Command::Purge { yes: false } => {
            println!("Refusing to delete all records without --yes.");
        }
        Command::Purge { yes: true } => {
            db.records().clear_all()?;
            println!("All review records deleted.");
        }
    }
    Ok(())
}
