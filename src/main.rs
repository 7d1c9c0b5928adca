//! # Curator CLI (`curator`)
//!
//! ## Usage
//!
//! ```bash
//! curator --config ./config/curator.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `curator init` | Create the SQLite database and schema |
//! | `curator run` | Run one batch over every configured category |
//! | `curator resolve <title> --year N --medium M` | Resolve a single title |
//! | `curator inventory refresh` | Re-read the library and replace the snapshot |
//! | `curator history <label>` | Show recommendation history for a category |
//! | `curator status` | Row counts and the latest batch |
//! | `curator serve` | Start the HTTP status surface |
//!
//! Provider credentials come from `TMDB_API_KEY`, `LLM_API_KEY`,
//! `PLEX_TOKEN` and `TAUTULLI_API_KEY`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use curator::batch::BatchRunner;
use curator::catalog::TmdbClient;
use curator::config::{load_config, Config};
use curator::inventory::{self, PlexInventory};
use curator::resolver::MetadataResolver;
use curator::sqlite_store::SqliteStore;
use curator::store::Store;
use curator::{migrate, server, status};

/// Curator: resolve, deduplicate and record generated media recommendations.
#[derive(Parser)]
#[command(name = "curator", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/curator.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run one batch: refresh inventory, then generate and resolve every
    /// category.
    Run,

    /// Resolve a single title against the catalog (uses the cache).
    Resolve {
        title: String,

        #[arg(long)]
        year: i32,

        /// movie or tv (synonyms such as "show" or "film" are accepted).
        #[arg(long, default_value = "movie")]
        medium: String,
    },

    /// Library inventory commands.
    Inventory {
        #[command(subcommand)]
        action: InventoryAction,
    },

    /// Show recommendation history for a category.
    History { label: String },

    /// Show row counts and the latest batch.
    Status,

    /// Start the HTTP status surface.
    Serve,
}

#[derive(Subcommand)]
enum InventoryAction {
    /// Fetch the library and replace the stored snapshot.
    Refresh,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Run => {
            let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&cfg).await?);
            let runner = BatchRunner::from_config(&cfg, store)?;
            let report = runner.run("oneshot").await?;

            println!("Batch #{} finished", report.job_id);
            for outcome in &report.categories {
                match &outcome.error {
                    Some(err) => println!("  {:<28} failed     {}", outcome.label, err),
                    None => println!(
                        "  {:<28} completed  {} items",
                        outcome.label, outcome.item_count
                    ),
                }
            }
            if !report.categories.is_empty() && report.failed() == report.categories.len() {
                bail!("every category failed");
            }
        }
        Commands::Resolve {
            title,
            year,
            medium,
        } => {
            let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&cfg).await?);
            let catalog = TmdbClient::new(&cfg.catalog).context("Catalog client unavailable")?;
            let resolver = MetadataResolver::new(Arc::new(catalog), store)
                .with_call_timeout(Duration::from_secs(cfg.catalog.timeout_secs));
            let metadata = resolver.resolve(&title, year, &medium).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Inventory { action } => match action {
            InventoryAction::Refresh => {
                let library = match &cfg.library {
                    Some(library) => library,
                    None => bail!("no [library] section in {}", cli.config.display()),
                };
                let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&cfg).await?);
                let plex = PlexInventory::new(library, store.clone())
                    .context("Library client unavailable")?;
                let count = inventory::refresh(&plex, store.as_ref()).await?;
                println!("Library inventory refreshed: {} items", count);
            }
        },
        Commands::History { label } => {
            let store = SqliteStore::open(&cfg).await?;
            status::run_history(&store, &label, cfg.exclusion.window_days).await?;
        }
        Commands::Status => {
            let store = SqliteStore::open(&cfg).await?;
            status::run_status(&cfg, &store).await?;
        }
        Commands::Serve => {
            let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&cfg).await?);
            let runner = match BatchRunner::from_config(&cfg, store.clone()) {
                Ok(runner) => Some(Arc::new(runner)),
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "batch runner disabled");
                    None
                }
            };
            server::run_server(&cfg, store, runner).await?;
        }
    }

    Ok(())
}
