//! # Recall Harness CLI (`rcl`)
//!
//! The `rcl` binary drives the knowledge-base pipeline: database setup,
//! page imports, embedding reconciliation, vector index sync, retrieval,
//! and the event API server.
//!
//! ## Usage
//!
//! ```bash
//! rcl --config ./config/rcl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rcl init` | Create the SQLite database and run schema migrations |
//! | `rcl import` | Import a space's pages from an export file |
//! | `rcl reconcile` | Embed stale records until convergence |
//! | `rcl sync-index` | Project embedded records into the vector index |
//! | `rcl retrieve "<query>"` | Print the nearest record ids for a query |
//! | `rcl serve` | Start the HTTP event API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use recall_harness::config::{self, Config};
use recall_harness::db;
use recall_harness::embedding::{create_embedder, Embedder};
use recall_harness::index::HttpVectorIndex;
use recall_harness::ingest::{run_import, JsonFileSource};
use recall_harness::migrate;
use recall_harness::reconcile::{reconcile, ReconcileOptions};
use recall_harness::retrieve::retrieve;
use recall_harness::server;
use recall_harness::store::{
    EmbeddingRepository, InteractionRepository, PageRepository, RecordStore,
};
use recall_harness::sync::sync_records;

/// Recall Harness CLI — keeps a wiki-backed Q&A knowledge base, its
/// embeddings, and a vector index in sync.
#[derive(Parser)]
#[command(
    name = "rcl",
    about = "Recall Harness — wiki pages and Q&A conversations, embedded and retrievable",
    version,
    long_about = "Recall Harness imports wiki pages and tracks chat Q&A conversations in SQLite, \
    reconciles their embeddings against content changes, projects them into a vector index, \
    and serves semantic retrieval plus an inbound chat event API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rcl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Import a space's pages from a JSON export file.
    ///
    /// Upserts every page in the file. Changed pages become stale and are
    /// picked up by the next `reconcile`; unchanged pages are untouched.
    Import {
        /// Path to a JSON array of raw pages.
        #[arg(long)]
        file: PathBuf,

        /// Space key the pages belong to.
        #[arg(long)]
        space: String,
    },

    /// Embed stale records until convergence or the retry budget runs out.
    ///
    /// A record is stale when its embedding is missing or older than its
    /// content. Ctrl-C stops the engine between attempts.
    Reconcile {
        /// Record kind: `pages`, `interactions`, or `all`.
        #[arg(long, default_value = "all")]
        kind: String,

        /// Restrict to one space key (pages only).
        #[arg(long)]
        space: Option<String>,
    },

    /// Project embedded records from the store into the vector index.
    SyncIndex {
        /// Record kind: `pages`, `interactions`, or `all`.
        #[arg(long, default_value = "all")]
        kind: String,

        /// Restrict to one space key (pages only).
        #[arg(long)]
        space: Option<String>,
    },

    /// Print the record ids nearest to a query, best first.
    Retrieve {
        /// The query text.
        query: String,

        /// Record kind to search: `pages` or `interactions`.
        #[arg(long, default_value = "pages")]
        kind: String,

        /// Number of results.
        #[arg(long, default_value_t = 5)]
        k: usize,
    },

    /// Start the HTTP event API server.
    ///
    /// Receives chat events on `/api/v1/events` and serves single-record
    /// embedding triggers on `/api/v1/embeds`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recall_harness=info,rcl=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file, space } => {
            let store = open_store(&cfg).await?;
            let source = JsonFileSource::new(&file);
            let outcome = run_import(&store, &source, &space).await?;
            println!("Imported {} pages into space {}.", outcome.imported, space);
        }
        Commands::Reconcile { kind, space } => {
            run_reconcile(&cfg, &kind, space).await?;
        }
        Commands::SyncIndex { kind, space } => {
            run_sync_index(&cfg, &kind, space).await?;
        }
        Commands::Retrieve { query, kind, k } => {
            run_retrieve(&cfg, &query, &kind, k).await?;
        }
        Commands::Serve => {
            let store = open_store(&cfg).await?;
            server::run_server(&cfg, store).await?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<RecordStore>> {
    let pool = db::connect(&cfg.db).await?;
    migrate::run_migrations(&pool).await?;
    Ok(Arc::new(RecordStore::new(pool)))
}

/// Resolve a `--kind` argument into the repositories it selects.
fn select_repos(
    store: &Arc<RecordStore>,
    kind: &str,
) -> anyhow::Result<Vec<Arc<dyn EmbeddingRepository>>> {
    match kind {
        "pages" => Ok(vec![Arc::new(PageRepository::new(store.clone()))]),
        "interactions" => Ok(vec![Arc::new(InteractionRepository::new(store.clone()))]),
        "all" => Ok(vec![
            Arc::new(PageRepository::new(store.clone())),
            Arc::new(InteractionRepository::new(store.clone())),
        ]),
        other => anyhow::bail!("Unknown record kind: '{}'. Must be pages, interactions, or all.", other),
    }
}

async fn run_reconcile(cfg: &Config, kind: &str, space: Option<String>) -> anyhow::Result<()> {
    let store = open_store(cfg).await?;
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    let repos = select_repos(&store, kind)?;

    // Ctrl-C requests a cooperative stop between attempts.
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current attempt...");
            let _ = tx.send(true);
        }
    });

    for repo in repos {
        let opts = ReconcileOptions::from_config(&cfg.reconcile, space.clone());
        let kind_label = repo.kind();
        let outcome = reconcile(repo, embedder.clone(), &opts, rx.clone()).await?;

        if outcome.cancelled {
            println!(
                "{}: stopped on request after {} attempts ({} embedded, {} still stale).",
                kind_label, outcome.attempts, outcome.embedded, outcome.remaining_stale
            );
            break;
        } else if outcome.converged() {
            println!(
                "{}: converged in {} attempts ({} embedded).",
                kind_label, outcome.attempts, outcome.embedded
            );
        } else {
            println!(
                "{}: retry budget exhausted after {} attempts ({} embedded, {} failed, {} still stale).",
                kind_label,
                outcome.attempts,
                outcome.embedded,
                outcome.failed,
                outcome.remaining_stale
            );
        }
    }

    Ok(())
}

async fn run_sync_index(cfg: &Config, kind: &str, space: Option<String>) -> anyhow::Result<()> {
    let store = open_store(cfg).await?;
    let index = HttpVectorIndex::new(&cfg.index)?;
    let repos = select_repos(&store, kind)?;

    for repo in repos {
        let collection = match repo.kind() {
            "page" => cfg.index.pages_collection.as_str(),
            _ => cfg.index.interactions_collection.as_str(),
        };
        let outcome = sync_records(repo.as_ref(), &index, collection, space.as_deref()).await?;
        println!(
            "{}: {} synced into '{}', {} skipped.",
            repo.kind(),
            outcome.synced,
            collection,
            outcome.skipped
        );
    }

    Ok(())
}

async fn run_retrieve(cfg: &Config, query: &str, kind: &str, k: usize) -> anyhow::Result<()> {
    let embedder = create_embedder(&cfg.embedding)?;
    let index = HttpVectorIndex::new(&cfg.index)?;

    let collection = match kind {
        "pages" => cfg.index.pages_collection.as_str(),
        "interactions" => cfg.index.interactions_collection.as_str(),
        other => anyhow::bail!("Unknown record kind: '{}'. Must be pages or interactions.", other),
    };

    let ids = retrieve(
        embedder.as_ref(),
        &index,
        collection,
        query,
        k,
        cfg.index.max_k,
    )
    .await;

    if ids.is_empty() {
        println!("No results.");
    } else {
        for (rank, id) in ids.iter().enumerate() {
            println!("{}. {}", rank + 1, id);
        }
    }

    Ok(())
}
