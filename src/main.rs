mod config;
mod crawl;
mod error;
mod extract;
mod fetcher;
mod records;
mod schema;
mod sink;
mod store;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::warn;

use crate::config::{OutputFormat, Settings};
use crate::crawl::Crawler;
use crate::fetcher::{AbortHandle, Backoff, HttpFetcher};

#[derive(Parser)]
#[command(name = "psgc_scraper", about = "Municipality and barangay scraper for the NSCB PSGC site")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl list pages, then each municipality's detail page, and write output files
    Crawl(CrawlArgs),
    /// Parse a saved page and print its records (checks page layout offline)
    Extract {
        #[arg(value_enum)]
        kind: PageKind,
        /// Saved HTML file
        path: PathBuf,
        /// Municipality name attached to barangay records
        #[arg(long, default_value = "")]
        muni_name: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PageKind {
    /// Municipality list page (listmun.asp)
    List,
    /// Municipality detail page with barangays
    Detail,
}

/// Flags override `PSGC_*` environment variables, which override defaults.
#[derive(Args)]
struct CrawlArgs {
    /// First list page to download
    #[arg(short = 'f', long)]
    first_page: Option<u32>,
    /// Last list page to download
    #[arg(short = 'l', long)]
    last_page: Option<u32>,
    #[arg(long)]
    base_url: Option<String>,
    /// Pages fetched at once
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,
    /// Attempts per page before giving up
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    retry_delay_secs: Option<u64>,
    #[arg(long, value_enum)]
    backoff: Option<Backoff>,
    /// Per-attempt request timeout
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Directory for output files
    #[arg(short = 'o', long)]
    out_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
}

impl CrawlArgs {
    fn apply(self, s: &mut Settings) {
        if let Some(v) = self.first_page {
            s.first_page = v;
        }
        if let Some(v) = self.last_page {
            s.last_page = v;
        }
        if let Some(v) = self.base_url {
            s.base_url = v;
        }
        if let Some(v) = self.concurrency {
            s.concurrency = v;
        }
        if let Some(v) = self.max_attempts {
            s.max_attempts = v;
        }
        if let Some(v) = self.retry_delay_secs {
            s.retry_delay_secs = v;
        }
        if let Some(v) = self.backoff {
            s.backoff = v;
        }
        if let Some(v) = self.timeout_secs {
            s.timeout_secs = v;
        }
        if let Some(v) = self.out_dir {
            s.out_dir = v;
        }
        if let Some(v) = self.format {
            s.format = v;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl(args) => {
            let mut settings = Settings::load()?;
            args.apply(&mut settings);
            settings.validate()?;
            crawl(settings).await
        }
        Commands::Extract { kind, path, muni_name } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            print_page(kind, &bytes, &muni_name)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn crawl(settings: Settings) -> anyhow::Result<()> {
    let fetcher = Arc::new(HttpFetcher::new(settings.timeout())?);

    let abort = AbortHandle::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted: no new pages will be fetched");
                abort.abort();
            }
        });
    }

    println!("{}", "=".repeat(80));
    println!(
        "Crawling list pages {}..={} of {}",
        settings.first_page, settings.last_page, settings.base_url
    );

    let (store, report) = Crawler::new(fetcher, settings.clone())?
        .with_abort(abort)
        .with_progress(std::io::stderr().is_terminal())
        .run()
        .await?;

    let ts = chrono::Local::now();
    let paths = sink::write_files(
        &store,
        &settings.out_dir,
        (settings.first_page, settings.last_page),
        &ts,
        settings.format,
    )?;

    if store.is_empty() {
        warn!("No municipalities collected");
    }

    println!("{}", "=".repeat(80));
    println!(
        "{} municipalities, {} barangays ({} rows skipped)",
        store.municipality_count(),
        store.barangay_count(),
        report.skipped_rows
    );
    println!(
        "Pages: {} list + {} detail attempted, {} ok, {} failed",
        report.list_attempts,
        report.detail_attempts,
        report.pages_ok,
        report.failures.len()
    );
    for f in &report.failures {
        println!("  {:?} {}: {}", f.kind, f.url, f.reason);
    }
    if report.degraded_cells > 0 {
        println!("{} cells had non-ASCII characters dropped", report.degraded_cells);
    }
    if report.aborted {
        println!("Run was interrupted; output is partial.");
    }
    println!("Wrote {}", paths.municipalities.display());
    println!("Wrote {}", paths.barangays.display());
    println!("Crawl took {}", format_duration(report.elapsed));
    Ok(())
}

fn print_page(kind: PageKind, bytes: &[u8], muni_name: &str) -> anyhow::Result<()> {
    let skipped = match kind {
        PageKind::List => {
            let page = extract::municipalities(bytes)?;
            for r in &page.records {
                println!("{}", serde_json::to_string(r)?);
            }
            page.skipped
        }
        PageKind::Detail => {
            let page = extract::barangays(bytes, muni_name)?;
            for r in &page.records {
                println!("{}", serde_json::to_string(r)?);
            }
            page.skipped
        }
    };
    for s in &skipped {
        println!("skipped table {} row {}: {}", s.table, s.row, s.error);
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
