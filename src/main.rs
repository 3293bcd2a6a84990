use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fragrance_crawler::export::write_csv;
use fragrance_crawler::store::open_store;
use fragrance_crawler::{run_crawl, AppSettings};
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use sysinfo::{Pid, System};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Harvests fragrance listings into a document store.
#[derive(Parser)]
#[command(name = "fragrance-crawler", version, about)]
struct Cli {
    /// Settings file (TOML); missing file means built-in defaults
    #[arg(short, long, default_value = "crawler.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the listing until the target count is reached or pages run out
    Crawl {
        /// Stop once this many new products were collected
        #[arg(short, long)]
        target: Option<usize>,

        /// Listing page to start from
        #[arg(short, long)]
        start_page: Option<u32>,
    },
    /// Show the document count and the most recently crawled products
    Inspect {
        #[arg(short = 'n', long, default_value = "10")]
        recent: usize,
    },
    /// Delete every document in the collection
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Write the stored collection to a CSV file
    Export {
        #[arg(short, long, default_value = "products.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let settings = AppSettings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;

    let start = Instant::now();
    let mut sys = System::new_all();
    let pid = Pid::from(std::process::id() as usize);

    match cli.command {
        Command::Crawl { target, start_page } => {
            let target = target.unwrap_or(settings.crawl.target_count);
            let start_page = start_page.unwrap_or(settings.crawl.start_page);
            tracing::info!(target, start_page, "Starting crawl process");

            let report = run_crawl(settings, target, start_page).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                bail!(report.message);
            }
        }
        Command::Inspect { recent } => {
            let store = open_store(&settings.store)?;
            let mut products = store.fetch_all().await?;
            products.sort_by(|a, b| b.crawled_at.cmp(&a.crawled_at));

            println!(
                "{} documents in {}",
                products.len(),
                settings.store.collection
            );
            for product in products.iter().take(recent) {
                println!(
                    "{}  {}  [{}]  {}  page {}",
                    product.crawled_at.to_rfc3339(),
                    product.id,
                    product.brand,
                    product.name,
                    product.page_number
                );
            }
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear {} without --yes", settings.store.collection);
            }
            let store = open_store(&settings.store)?;
            let deleted = store.delete_all().await?;
            tracing::info!(deleted, collection = %settings.store.collection, "Collection cleared");
            println!("Deleted {deleted} documents");
        }
        Command::Export { output } => {
            let store = open_store(&settings.store)?;
            let mut products = store.fetch_all().await?;
            let file = File::create(&output)
                .with_context(|| format!("creating {}", output.display()))?;
            write_csv(&mut products, file)?;
            println!("Exported {} products to {}", products.len(), output.display());
        }
    }

    sys.refresh_processes();
    let max_mem_usage = sys.process(pid).map(|p| p.memory()).unwrap_or(0);
    tracing::info!(
        total_duration = ?start.elapsed(),
        memory_mb = max_mem_usage as f64 / (1024.0 * 1024.0),
        "Process completed"
    );
    Ok(())
}
