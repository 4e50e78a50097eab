use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use booking_data::CatalogLoader;
use booking_db_sqlite::SqliteRepository;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Load catalog items (celebrity bookings and events) from a CSV file into
/// the database.
///
/// The CSV file has one row per variant with the following columns:
/// - item_id, kind (`celebrity` | `event`), name, unit_price
/// - available_quantity (empty when unknown)
/// - variant_id, variant_name (empty for the standard variant)
/// - price_multiplier (empty means 1)
#[derive(Parser, Debug)]
#[command(name = "booking-catalog-loader")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the CSV file containing catalog data
    #[arg(short, long)]
    file: PathBuf,

    /// SQLite database URL (e.g., sqlite:bookings.db?mode=rwc to create if missing)
    #[arg(short, long, default_value = "sqlite:bookings.db?mode=rwc")]
    database: String,

    /// Run database migrations before loading data
    #[arg(short, long, default_value_t = false)]
    migrate: bool,

    /// Run seed files from the specified directory after migrations
    #[arg(short, long)]
    seeds: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::from("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();

    let args = Args::parse();

    let repo = SqliteRepository::new(&args.database)
        .await
        .with_context(|| format!("Failed to connect to database: {}", args.database))?;

    if args.migrate {
        println!("Running migrations...");
        repo.run_migrations()
            .await
            .context("Failed to run migrations")?;
        println!("Migrations complete.");
    }

    if let Some(seeds_dir) = &args.seeds {
        println!("Running seeds from: {}", seeds_dir.display());
        repo.run_seeds(seeds_dir)
            .await
            .with_context(|| format!("Failed to run seeds from: {}", seeds_dir.display()))?;
        println!("Seeds complete.");
    }

    println!("Loading catalog from: {}", args.file.display());

    let file = File::open(&args.file)
        .with_context(|| format!("Failed to open: {}", args.file.display()))?;

    let records = CatalogLoader::parse(file)
        .with_context(|| format!("Failed to parse CSV: {}", args.file.display()))?;

    println!("Parsed {} rows from CSV", records.len());

    let loaded = CatalogLoader::load(&repo, &records)
        .await
        .context("Failed to load catalog into database")?;

    println!("Successfully loaded {} catalog items into the database.", loaded);

    Ok(())
}
