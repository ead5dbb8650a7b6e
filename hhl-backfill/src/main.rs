//! hhl-backfill - Completion flag backfill CLI
//!
//! Recomputes course and pathway completion for every learner and corrects
//! the stored flags. Exits non-zero when any learner failed or any
//! validation error was found.
//!
//! ```text
//! hhl-backfill --dry-run --verbose
//! hhl-backfill --contact-id 1001
//! hhl-backfill --batch-size 100 --skip-synced
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hhl_backfill::store::{HubSpotProgressStore, ProgressStore, SqliteProgressStore};
use hhl_backfill::{retry_transient, BackfillOptions, BackfillOrchestrator, RetryPolicy};
use hhl_common::completion::{FsContentStore, MetadataCache};
use hhl_common::config::{hubspot_token_from_env, HhlConfig, StoreKind};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreArg {
    Hubspot,
    Sqlite,
}

impl From<StoreArg> for StoreKind {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Hubspot => StoreKind::Hubspot,
            StoreArg::Sqlite => StoreKind::Sqlite,
        }
    }
}

/// Command-line arguments for hhl-backfill
#[derive(Parser, Debug)]
#[command(name = "hhl-backfill")]
#[command(about = "Recompute and reconcile stored course and pathway completion flags")]
#[command(version)]
struct Args {
    /// Preview changes without writing to the progress store
    #[arg(long)]
    dry_run: bool,

    /// Learners fetched per page
    #[arg(long)]
    batch_size: Option<usize>,

    /// Process a single learner
    #[arg(long)]
    contact_id: Option<String>,

    /// Count learners that are already in sync as skipped
    #[arg(long)]
    skip_synced: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file (overrides HHL_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding courses/ and pathways/ definitions
    #[arg(long, env = "HHL_CONTENT_DIR")]
    content_dir: Option<PathBuf>,

    /// Directory the summary, failures and changes files are written to
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Progress store backend
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// SQLite database file (with --store sqlite)
    #[arg(long, env = "HHL_DATABASE")]
    database: Option<PathBuf>,

    /// Learners processed concurrently within a batch
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = HhlConfig::resolve(args.config.as_deref())
        .context("Failed to load configuration")?;
    apply_overrides(&mut config, &args)?;

    // Initialize tracing
    let default_filter = if args.verbose {
        "hhl_backfill=debug,hhl_common=debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hhl-backfill");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Content: {}", config.content_dir.display());
    info!("Reports: {}", config.report_dir.display());

    let retry = RetryPolicy::from(&config.retry);

    // Metadata first: without it nothing can be evaluated
    let cache = MetadataCache::new();
    let content = FsContentStore::new(&config.content_dir);
    let snapshot = retry_transient("load metadata", &retry, || cache.load(&content))
        .await
        .context("Failed to load course and pathway metadata")?;

    let store = build_store(&config).await?;
    info!("Progress store: {}", store.describe());

    let mut options = BackfillOptions::from_config(&config);
    options.dry_run = args.dry_run;
    options.skip_synced = args.skip_synced;
    options.contact_id = args.contact_id.clone();

    let orchestrator = BackfillOrchestrator::new(store, snapshot, options);
    let report = orchestrator.run().await;

    let paths = report
        .write_artifacts(&config.report_dir)
        .await
        .context("Failed to write backfill artifacts")?;

    println!("{}", report.console_summary());
    println!("Summary:  {}", paths.summary.display());
    println!("Failures: {}", paths.failures.display());
    println!("Changes:  {}", paths.changes.display());

    if report.has_errors() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Command-line flags win over config file values
fn apply_overrides(config: &mut HhlConfig, args: &Args) -> Result<()> {
    if let Some(batch_size) = args.batch_size {
        if batch_size == 0 {
            bail!("--batch-size must be at least 1");
        }
        config.backfill.batch_size = batch_size;
    }
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        config.backfill.concurrency = concurrency;
    }
    if let Some(dir) = &args.content_dir {
        config.content_dir = dir.clone();
    }
    if let Some(dir) = &args.report_dir {
        config.report_dir = dir.clone();
    }
    if let Some(store) = args.store {
        config.store.kind = store.into();
    }
    if let Some(path) = &args.database {
        config.store.database_path = path.clone();
    }
    Ok(())
}

async fn build_store(config: &HhlConfig) -> Result<Arc<dyn ProgressStore>> {
    match config.store.kind {
        StoreKind::Hubspot => {
            let token = hubspot_token_from_env()?;
            let store = HubSpotProgressStore::new(&config.store.hubspot_base_url, token)
                .context("Failed to create HubSpot client")?;
            Ok(Arc::new(store))
        }
        StoreKind::Sqlite => {
            info!("Database: {}", config.store.database_path.display());
            let store = SqliteProgressStore::open(&config.store.database_path)
                .await
                .context("Failed to open progress database")?;
            Ok(Arc::new(store))
        }
    }
}
