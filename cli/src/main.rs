//! chainfeed CLI
//!
//! Usage:
//!   chainfeed watch [--bulk-threshold 50] [--ambiguity in-order]
//!   chainfeed reconcile [--start-block N] [--end-block N] [--limit N] [--dry-run]
//!   chainfeed status
//!   chainfeed recent [--limit 20]
//!   chainfeed inspect --block N
//!   chainfeed info

mod config;
mod logging;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use chainfeed_core::config::WatcherConfig;
use chainfeed_core::resolver::{AmbiguityPolicy, IdentifierResolver};
use chainfeed_core::store::FeedStore;
use chainfeed_core::types::BlockRange;
use chainfeed_hive::pipeline::BlockOutcome;
use chainfeed_hive::rpc::DEFAULT_NODES;
use chainfeed_hive::{
    inspect_block, Extractor, HiveRpcClient, HiveRpcConfig, ReconcileOptions, Reconciler,
    WatcherBuilder, WatcherController,
};
use chainfeed_storage::SqliteStorage;

use crate::config::FileConfig;
use crate::logging::{init_tracing, LogConfig};
use crate::shutdown::Shutdown;

// ─── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "chainfeed",
    about = "Follow Hive custom_json posts into a local SQLite feed",
    long_about = "chainfeed watches the Hive chain for microblog posts published as \
                  custom_json operations, stores them with their transaction ids, and \
                  reconciles rows that were stored under provisional ids.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  CHAINFEED_DATABASE   SQLite file (default ./chainfeed.db)\n  \
                  CHAINFEED_NODES      comma-separated API node URLs\n  \
                  CHAINFEED_APP_IDS    comma-separated custom_json ids\n  \
                  CHAINFEED_LOG        log filter, e.g. info or chainfeed_hive=debug",
    version
)]
struct Cli {
    /// JSON settings file (database, nodes, watcher, log)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "CHAINFEED_DATABASE", global = true)]
    database: Option<String>,

    /// API nodes, tried in order
    #[arg(long, env = "CHAINFEED_NODES", value_delimiter = ',', global = true)]
    nodes: Vec<String>,

    /// custom_json ids to ingest
    #[arg(long, env = "CHAINFEED_APP_IDS", value_delimiter = ',', global = true)]
    app_ids: Vec<String>,

    /// Log filter
    #[arg(long, env = "CHAINFEED_LOG", global = true)]
    log: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the chain until interrupted
    Watch {
        #[arg(long)]
        bulk_threshold: Option<u64>,

        #[arg(long)]
        max_bulk_window: Option<u64>,

        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// How duplicate (author, content) posts in one block are matched
        #[arg(long, value_enum)]
        ambiguity: Option<AmbiguityArg>,

        /// Seconds to wait for a clean shutdown after SIGINT or SIGTERM
        #[arg(long, default_value_t = 10)]
        stop_timeout: u64,
    },

    /// Upgrade provisional identifiers to transaction ids
    Reconcile {
        #[arg(long)]
        start_block: Option<u64>,

        #[arg(long)]
        end_block: Option<u64>,

        /// Examine at most this many rows
        #[arg(long)]
        limit: Option<usize>,

        /// Print planned upgrades without writing
        #[arg(long)]
        dry_run: bool,

        /// Reconcile a single provisional identifier
        #[arg(long)]
        one_identifier: Option<String>,
    },

    /// Record count and checkpoint
    Status,

    /// Newest stored records
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show how one block resolves on the full and bulk paths
    Inspect {
        #[arg(long)]
        block: u64,
    },

    /// Print effective settings
    Info,
}

#[derive(Clone, Copy, ValueEnum)]
enum AmbiguityArg {
    InOrder,
    Provisional,
}

impl From<AmbiguityArg> for AmbiguityPolicy {
    fn from(arg: AmbiguityArg) -> Self {
        match arg {
            AmbiguityArg::InOrder => AmbiguityPolicy::InOrder,
            AmbiguityArg::Provisional => AmbiguityPolicy::Provisional,
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// File settings with flags and environment layered on top.
struct Settings {
    database: String,
    nodes: Vec<String>,
    watcher: WatcherConfig,
    log: LogConfig,
}

impl Settings {
    fn resolve(cli: &Cli) -> Result<Self> {
        let file = FileConfig::load(cli.config.as_deref())?;

        let database = cli
            .database
            .clone()
            .or(file.database)
            .unwrap_or_else(|| "./chainfeed.db".into());

        let nodes = non_empty(&cli.nodes)
            .or_else(|| non_empty(&file.nodes))
            .unwrap_or_else(|| DEFAULT_NODES.iter().map(|s| s.to_string()).collect());

        let mut watcher = file.watcher;
        if let Some(ids) = non_empty(&cli.app_ids) {
            watcher.app_ids = ids;
        }

        let mut log = file.log;
        if let Some(level) = &cli.log {
            log.level = level.clone();
        }
        log.json |= cli.log_json;

        Ok(Self {
            database,
            nodes,
            watcher,
            log,
        })
    }

    fn client(&self) -> Result<HiveRpcClient> {
        HiveRpcClient::new(HiveRpcConfig {
            nodes: self.nodes.clone(),
            ..Default::default()
        })
        .context("building RPC client")
    }

    async fn store(&self) -> Result<Arc<dyn FeedStore>> {
        let storage = SqliteStorage::open(&self.database)
            .await
            .with_context(|| format!("opening database {}", self.database))?;
        let store: Arc<dyn FeedStore> = Arc::new(storage);
        Ok(store)
    }

    fn extractor(&self) -> Extractor {
        Extractor::from_config(&self.watcher)
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    let cleaned: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::resolve(&cli)?;
    init_tracing(&settings.log)?;

    match cli.command {
        Commands::Watch {
            bulk_threshold,
            max_bulk_window,
            poll_interval_ms,
            ambiguity,
            stop_timeout,
        } => {
            if let Some(v) = bulk_threshold {
                settings.watcher.bulk_threshold = v;
            }
            if let Some(v) = max_bulk_window {
                settings.watcher.max_bulk_window = v;
            }
            if let Some(v) = poll_interval_ms {
                settings.watcher.poll_interval_ms = v;
            }
            if let Some(v) = ambiguity {
                settings.watcher.ambiguity = v.into();
            }
            cmd_watch(&settings, Duration::from_secs(stop_timeout)).await
        }
        Commands::Reconcile {
            start_block,
            end_block,
            limit,
            dry_run,
            one_identifier,
        } => {
            let options = ReconcileOptions {
                range: BlockRange::new(start_block, end_block),
                limit,
                dry_run,
                only_identifier: one_identifier,
            };
            cmd_reconcile(&settings, &options).await
        }
        Commands::Status => cmd_status(&settings).await,
        Commands::Recent { limit } => cmd_recent(&settings, limit).await,
        Commands::Inspect { block } => cmd_inspect(&settings, block).await,
        Commands::Info => cmd_info(&settings),
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_watch(settings: &Settings, stop_timeout: Duration) -> Result<()> {
    let client = Arc::new(settings.client()?);
    let store = settings.store().await?;
    let watcher = WatcherBuilder::from_config(settings.watcher.clone())
        .build(client, store)
        .context("invalid watcher configuration")?;

    info!(
        database = %settings.database,
        nodes = ?settings.nodes,
        app_ids = ?settings.watcher.app_ids,
        "starting watcher"
    );

    let mut shutdown = Shutdown::install().context("installing signal handlers")?;
    let mut controller = WatcherController::new();
    controller.start(watcher);

    tokio::select! {
        result = controller.join() => {
            if let Err(e) = result {
                error!(error = %e, "watcher exited");
                return Err(anyhow!(e).context("watcher stopped on a fatal error"));
            }
            Ok(())
        }
        signal = shutdown.recv() => {
            let signal = signal.context("listening for stop signals")?;
            info!(signal, "stop signal received, stopping");
            if let Err(e) = controller.stop(stop_timeout).await {
                warn!(error = %e, "unclean shutdown");
                return Err(anyhow!(e));
            }
            Ok(())
        }
    }
}

async fn cmd_reconcile(settings: &Settings, options: &ReconcileOptions) -> Result<()> {
    let client = settings.client()?;
    let store = settings.store().await?;
    let reconciler = Reconciler::new(client, store, settings.extractor());

    let report = reconciler.run(options).await.context("reconcile failed")?;

    for up in &report.planned {
        let verb = if options.dry_run { "would upgrade" } else { "upgraded" };
        println!(
            "  block {:>10}  {} {} -> {} (by {})",
            up.block_number, verb, up.old, up.new, up.matched_by
        );
    }
    println!(
        "examined {}  updated {}  skipped {}  replies rewritten {}{}",
        report.examined,
        report.updated,
        report.skipped,
        report.cascaded,
        if options.dry_run { "  (dry run)" } else { "" }
    );
    Ok(())
}

async fn cmd_status(settings: &Settings) -> Result<()> {
    let store = settings.store().await?;
    let status = store.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_recent(settings: &Settings, limit: usize) -> Result<()> {
    let store = settings.store().await?;
    let records = store.recent(limit).await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn cmd_inspect(settings: &Settings, block: u64) -> Result<()> {
    let client = settings.client()?;
    let resolver = IdentifierResolver::new(settings.watcher.ambiguity);
    let inspection = inspect_block(&client, &settings.extractor(), &resolver, block)
        .await
        .with_context(|| format!("inspecting block {block}"))?;

    println!("block {}", inspection.block_number);
    print_outcome("full", inspection.full.as_ref());
    print_outcome("bulk", inspection.bulk.as_ref());

    let misses = inspection.bulk_misses();
    if !misses.is_empty() {
        println!("bulk path missed: {}", misses.join(", "));
    }
    Ok(())
}

fn print_outcome(label: &str, outcome: Option<&BlockOutcome>) {
    let Some(outcome) = outcome else {
        println!("[{label}] block not available");
        return;
    };
    println!(
        "[{label}] {} posts, {} provisional, {} other operations",
        outcome.resolved.len(),
        outcome.provisional(),
        outcome.rejected
    );
    for r in &outcome.resolved {
        let c = &r.candidate;
        println!(
            "  {}:{}  @{:<16} {:<13} {}",
            c.position.tx_index,
            c.position.op_index,
            c.author,
            r.resolution.source(),
            r.resolution.identifier()
        );
    }
}

fn cmd_info(settings: &Settings) -> Result<()> {
    println!("chainfeed v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("database : {}", settings.database);
    println!("nodes    : {}", settings.nodes.join(", "));
    println!("log      : {}{}", settings.log.level, if settings.log.json { " (json)" } else { "" });
    println!();
    println!("watcher:");
    println!("{}", serde_json::to_string_pretty(&settings.watcher)?);
    Ok(())
}
