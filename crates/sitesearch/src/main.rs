//! # sitesearch CLI
//!
//! Command-line interface for the sitesearch index queue.
//!
//! The index queue tracks which content records must be submitted to the
//! search engine. This binary runs the queue engine against a JSON content
//! snapshot: it fills the queue of the configured sites and replays content
//! changes, reporting the resulting queue. Replayed signals are written into
//! the snapshot's content before they are handled.
//!
//! ## Commands
//!
//! - `sitesearch initialize --content <SNAPSHOT>` - Fill the queue of the configured sites
//! - `sitesearch replay --content <SNAPSHOT> --signals <SIGNALS>` - Apply content changes
//! - `sitesearch config show|init|path` - Manage configuration
//!
//! ## Examples
//!
//! ```bash
//! # Fill the queue of site 1
//! sitesearch -c demos/config.toml initialize --content demos/content.json --site 1
//!
//! # Replay changes on a freshly initialized queue, JSON output
//! sitesearch -c demos/config.toml --format json replay \
//!     --content demos/content.json --signals demos/signals.json --initialize
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sitesearch_core::{
    InitializationStatus, MutationKind, MutationSignal, QueueStatistics, Record, RequestContext,
};
use sitesearch_index::IndexQueueService;
use sitesearch_store::{
    ContentSnapshot, MemoryConnectionManager, MemoryDatastore, MemorySearchEngine,
    StaticSiteConfigurations,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "sitesearch")]
#[command(about = "Index queue maintenance for CMS site search")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/sitesearch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the index queue of the configured sites
    Initialize {
        /// Content snapshot (JSON)
        #[arg(long)]
        content: PathBuf,

        /// Only this site (root page id)
        #[arg(short, long)]
        site: Option<i64>,

        /// Only this indexing configuration
        #[arg(long)]
        configuration: Option<String>,

        /// Request time (unix seconds, default: now)
        #[arg(long)]
        now: Option<i64>,

        /// Write the resulting content and queue tables here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay content changes against a snapshot
    Replay {
        /// Content snapshot (JSON)
        #[arg(long)]
        content: PathBuf,

        /// Mutation signals (JSON array)
        #[arg(long)]
        signals: PathBuf,

        /// Initialize all sites before replaying
        #[arg(short, long)]
        initialize: bool,

        /// Do not write the signals' field values into the content first
        #[arg(long)]
        keep_content: bool,

        /// Request time (unix seconds, default: now)
        #[arg(long)]
        now: Option<i64>,

        /// Write the resulting content and queue tables here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print sample configuration file
    Init,
    /// Show config file path
    Path,
}

/// Output structure for initialization.
#[derive(Serialize)]
struct InitializeOutput {
    sites: Vec<SiteOutput>,
}

#[derive(Serialize)]
struct SiteOutput {
    root_page_id: i64,
    domain: String,
    configurations: Vec<InitializationStatus>,
    queue: QueueStatistics,
}

/// Output structure for replays.
#[derive(Serialize)]
struct ReplayOutput {
    signals: usize,
    failed: Vec<SignalFailure>,
    deletes: Vec<String>,
    queue: QueueStatistics,
}

#[derive(Serialize)]
struct SignalFailure {
    index: usize,
    signal: String,
    error: String,
}

/// Engine components working on one snapshot.
struct Components {
    store: Arc<MemoryDatastore>,
    engine: Arc<MemorySearchEngine>,
    service: IndexQueueService,
}

async fn create_components(config: &Config, content: &Path) -> Result<Components> {
    let snapshot = ContentSnapshot::load(content)
        .with_context(|| format!("Failed to load content snapshot {}", content.display()))?;
    let store = Arc::new(snapshot.into_datastore().await);
    let sites = Arc::new(StaticSiteConfigurations::new(config.sites.clone()));
    let engine = Arc::new(MemorySearchEngine::new("memory"));
    let connections = Arc::new(MemoryConnectionManager::new(engine.clone()));

    let service = IndexQueueService::new(
        store.clone(),
        sites,
        connections,
        config.index_queue_config(),
    )
    .context("Failed to create index queue service")?;

    Ok(Components {
        store,
        engine,
        service,
    })
}

fn request_context(now: Option<i64>) -> RequestContext {
    now.map_or_else(RequestContext::now, RequestContext::at)
}

async fn write_output(store: &MemoryDatastore, output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        ContentSnapshot::capture(store)
            .await
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote resulting tables to {:?}", path);
    }
    Ok(())
}

/// Write a live signal's field values into the content tables.
///
/// Deletes are soft deletes, as the CMS keeps deleted rows around.
async fn apply_signal(store: &MemoryDatastore, signal: &MutationSignal) {
    if !signal.is_live() {
        return;
    }
    let mut fields = signal.changed_fields.clone();
    if signal.kind == MutationKind::Delete {
        fields.insert("deleted".to_string(), serde_json::json!(1));
    }
    if fields.is_empty() {
        return;
    }
    if store
        .update_record(&signal.table, signal.uid, &fields)
        .await
        .is_none()
        && signal.kind == MutationKind::Create
    {
        store
            .insert_record(Record::new(&signal.table, signal.uid).merged_with(&fields))
            .await;
    }
}

fn print_statistics(stats: &QueueStatistics) {
    println!(
        "  Queue:  {} items ({} pending, {} indexed, {} erroneous)",
        stats.total, stats.pending, stats.indexed, stats.erroneous
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from(Some(path.clone()))
            .context(format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    // Setup logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Initialize {
            content,
            site,
            configuration,
            now,
            output,
        } => {
            let components = create_components(&config, &content).await?;
            let ctx = request_context(now);

            let roots: Vec<i64> = match site {
                Some(root) => vec![root],
                None => config.sites.iter().map(|site| site.root_page_id).collect(),
            };
            if roots.is_empty() {
                anyhow::bail!("No sites configured");
            }

            let mut sites = Vec::with_capacity(roots.len());
            for root in roots {
                let site = components
                    .service
                    .resolver
                    .resolve_site(root)
                    .await
                    .with_context(|| format!("Unknown site {root}"))?;
                let statuses = components
                    .service
                    .initialize(&ctx, root, configuration.as_deref())
                    .await
                    .with_context(|| format!("Failed to initialize site {root}"))?;
                let queue = components.service.queue.statistics(Some(root)).await?;
                sites.push(SiteOutput {
                    root_page_id: root,
                    domain: site.configuration.domain.clone(),
                    configurations: statuses,
                    queue,
                });
            }
            write_output(&components.store, output.as_deref()).await?;

            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&InitializeOutput { sites })?);
                }
                OutputFormat::Text => {
                    for site in &sites {
                        println!("Site {} ({})", site.root_page_id, site.domain);
                        for status in &site.configurations {
                            let state = if status.initialized { "ok" } else { "FAILED" };
                            println!(
                                "  {:<20} {:<6} {} rows ({})",
                                status.configuration_name, state, status.rows_affected, status.table
                            );
                            if let Some(ref error) = status.error {
                                println!("    error: {error}");
                            }
                            for message in &status.messages {
                                println!("    {message}");
                            }
                        }
                        print_statistics(&site.queue);
                    }
                }
            }
        }

        Commands::Replay {
            content,
            signals,
            initialize,
            keep_content,
            now,
            output,
        } => {
            let components = create_components(&config, &content).await?;
            let ctx = request_context(now);

            let text = std::fs::read_to_string(&signals)
                .with_context(|| format!("Failed to read {}", signals.display()))?;
            let signal_list: Vec<MutationSignal> = serde_json::from_str(&text)
                .with_context(|| format!("Invalid signals in {}", signals.display()))?;

            if initialize {
                for site in &config.sites {
                    let statuses = components
                        .service
                        .initialize(&ctx, site.root_page_id, None)
                        .await?;
                    for status in statuses.iter().filter(|status| !status.initialized) {
                        warn!(
                            "Initializing {} of site {} failed: {:?}",
                            status.configuration_name, site.root_page_id, status.error
                        );
                    }
                }
            }

            let mut failed = Vec::new();
            for (index, signal) in signal_list.iter().enumerate() {
                if !keep_content {
                    apply_signal(&components.store, signal).await;
                }
                if let Err(e) = components.service.handle(&ctx, signal).await {
                    warn!("Signal {} failed: {}", index, e);
                    failed.push(SignalFailure {
                        index,
                        signal: format!("{} {}:{}", signal.kind, signal.table, signal.uid),
                        error: e.to_string(),
                    });
                }
            }
            write_output(&components.store, output.as_deref()).await?;

            let result = ReplayOutput {
                signals: signal_list.len(),
                failed,
                deletes: components.engine.delete_log().await,
                queue: components.service.queue.statistics(None).await?,
            };
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                OutputFormat::Text => {
                    println!(
                        "Replayed {} signals ({} failed)",
                        result.signals,
                        result.failed.len()
                    );
                    for failure in &result.failed {
                        println!("  #{} {}: {}", failure.index, failure.signal, failure.error);
                    }
                    if !result.deletes.is_empty() {
                        println!("  Deleted from index:");
                        for query in &result.deletes {
                            println!("    {query}");
                        }
                    }
                    print_statistics(&result.queue);
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&config)
                            .context("Failed to serialize config")?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "{}",
                        toml::to_string_pretty(&config).context("Failed to serialize config")?
                    );
                }
            },
            ConfigAction::Init => {
                println!("{}", Config::sample_toml());
            }
            ConfigAction::Path => {
                if let Some(path) = Config::config_path() {
                    println!("{}", path.display());
                } else {
                    println!("Could not determine config directory");
                }
            }
        },
    }

    Ok(())
}
