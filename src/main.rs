use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use weblytics::config::Config;
use weblytics::reports::{self, Ranking};
use weblytics::storage::SqliteStore;
use weblytics::{geo, ingest};

#[derive(Parser)]
#[command(name = "weblytics")]
#[command(about = "Web access log analytics", long_about = None)]
struct Cli {
    /// Override WEBLYTICS_DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest an access log file
    Ingest {
        /// Path to the access log
        #[arg(long)]
        log: PathBuf,
    },
    /// Rebuild the GeoIP range tables from a city CSV and relocate visitors
    GeoipImport {
        /// Path to the GeoIP city CSV
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print ranked reports and per-period counts
    Report {
        /// Entries per ranking
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Only count visitors classified as human
        #[arg(long)]
        human_only: bool,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let store = SqliteStore::connect(&config.database_url, 1).await?;
    store.init().await?;

    match cli.command {
        Commands::Ingest { log } => {
            let mut conn = store.pool().acquire().await?;
            weblytics::storage::sqlite::apply_route_groups(&mut conn, &config.route_groups).await?;
            drop(conn);

            let summary = ingest::ingest_file(&store, &config, &log).await?;
            println!(
                "Collection summary: added {} new visitors and {} new requests \
                 ({} duplicates, {} filtered, {} unparseable lines).",
                summary.visitors_created,
                summary.requests_added,
                summary.duplicate_requests,
                summary.filtered_requests,
                summary.skipped_lines,
            );
        }
        Commands::GeoipImport { csv } => {
            info!("rebuilding GeoIP tables, this may take a while");
            let imported = geo::import_csv(&store, &csv, &config.geo).await?;
            let relocated = geo::relocate_visitors(&store).await?;
            println!(
                "GeoIP refresh: {} CSV rows compacted into {} ranges; \
                 {} of {} visitors located ({} unresolved).",
                imported.source_rows,
                imported.ranges,
                relocated.located,
                relocated.visitors,
                relocated.unresolved,
            );
        }
        Commands::Report {
            limit,
            human_only,
            json,
        } => {
            print_report(&store, limit, human_only, json).await?;
        }
    }

    Ok(())
}

async fn print_report(store: &SqliteStore, limit: i64, human_only: bool, json: bool) -> Result<()> {
    let rankings = [
        Ranking::Routes,
        Ranking::Referers,
        Ranking::Platforms,
        Ranking::Browsers,
        Ranking::Cities,
        Ranking::Countries,
    ];

    if json {
        let mut out = serde_json::Map::new();
        for which in rankings {
            let entries = reports::ranking(store.pool(), which, human_only, limit).await?;
            out.insert(which.label().to_string(), serde_json::to_value(entries)?);
        }
        out.insert(
            "daily".to_string(),
            serde_json::to_value(reports::daily_counts(store.pool()).await?)?,
        );
        out.insert(
            "monthly".to_string(),
            serde_json::to_value(reports::monthly_counts(store.pool()).await?)?,
        );
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for which in rankings {
        let entries = reports::ranking(store.pool(), which, human_only, limit).await?;
        println!("{}:", which.label());
        if entries.is_empty() {
            println!("  (none)");
        }
        for entry in entries {
            println!("  {:>8}  {}", entry.count, entry.label);
        }
        println!();
    }

    println!("daily:");
    for row in reports::daily_counts(store.pool()).await? {
        println!(
            "  {}  {:>8} visitors  {:>8} requests",
            row.period, row.visitors, row.requests
        );
    }
    println!("monthly:");
    for row in reports::monthly_counts(store.pool()).await? {
        println!(
            "  {}  {:>8} visitors  {:>8} requests",
            row.period, row.visitors, row.requests
        );
    }
    Ok(())
}
