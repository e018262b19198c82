//! # RFX Harvest CLI (`rfx`)
//!
//! The `rfx` binary is the primary interface for RFX Harvest. It provides
//! commands for database initialization, solicitation ingestion, LLM-driven
//! extraction (harvest), search, document retrieval, and embedding
//! management.
//!
//! ## Usage
//!
//! ```bash
//! rfx --config ./config/rfx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rfx init` | Create the SQLite database and run schema migrations |
//! | `rfx ingest <path>...` | Ingest solicitation files (PDF, DOCX, TXT, MD, HTML) |
//! | `rfx import <results.json>...` | Import pre-parsed element JSON |
//! | `rfx harvest [--all] [<id>]` | Run the LLM merge-extraction loop |
//! | `rfx search "<query>"` | Search chunks or entity collections |
//! | `rfx get <id>` | Show a document, its extracted profile, and entities |
//! | `rfx docs` | List ingested documents |
//! | `rfx embed pending` | Backfill missing or stale vectors |
//! | `rfx embed rebuild` | Delete and regenerate all vectors |
//! | `rfx stats` | Database overview |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! rfx init --config ./config/rfx.toml
//!
//! # Ingest a directory of solicitations
//! rfx ingest ./solicitations --config ./config/rfx.toml
//!
//! # Re-run extraction for everything incomplete
//! rfx harvest --all --config ./config/rfx.toml
//!
//! # Hybrid search over chunks
//! rfx search "snow removal" --mode hybrid
//!
//! # Keyword search over extracted requirements
//! rfx search "insurance" --collection requirements --mode keyword
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rfx_harvest::progress::ProgressMode;
use rfx_harvest::{config, docs, embed_cmd, get, harvest, ingest, migrate, search, stats};

/// RFX Harvest CLI — a local-first pipeline that turns solicitation documents
/// into a structured, searchable knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rfx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rfx",
    about = "RFX Harvest — turn RFP/RFI/RFQ documents into a structured, searchable knowledge base",
    version,
    long_about = "RFX Harvest ingests solicitation documents (PDF, DOCX, HTML, Markdown, plain text, \
    or pre-parsed element JSON), chunks and embeds them, runs an LLM-driven merge-extraction loop \
    that accumulates one evidence-checked profile per document, and serves keyword, semantic, and \
    hybrid retrieval over chunks and extracted entity collections."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rfx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// chunks, vectors, extractions, entities, FTS mirrors). Idempotent.
    Init,

    /// Ingest solicitation files.
    ///
    /// Scans the given paths (or the current directory), extracts text per
    /// content type, chunks, embeds, and unless `--skip-harvest` runs the
    /// extraction loop for new or changed documents. Unchanged files (by
    /// content hash) are skipped.
    Ingest {
        /// Files or directories to scan. Defaults to the current directory.
        paths: Vec<String>,

        /// Re-ingest files even when their content hash is unchanged.
        #[arg(long)]
        full: bool,

        /// Show file counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Skip the LLM extraction loop after ingestion.
        #[arg(long)]
        skip_harvest: bool,

        /// Progress reporting: auto, human, json, or off.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Import pre-parsed element JSON files.
    ///
    /// Each input file holds a JSON array of element objects (one document)
    /// or an array of such arrays (several documents). Elements are sorted
    /// into reading order; each text-bearing element becomes one chunk with
    /// its page number preserved.
    Import {
        /// Element JSON files to import.
        #[arg(required = true)]
        paths: Vec<String>,

        /// Re-import documents even when their assembled body is unchanged.
        #[arg(long)]
        full: bool,

        /// Show document and element counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to import.
        #[arg(long)]
        limit: Option<usize>,

        /// Skip the LLM extraction loop after import.
        #[arg(long)]
        skip_harvest: bool,

        /// Progress reporting: auto, human, json, or off.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Run the LLM merge-extraction loop.
    ///
    /// Walks a document chunk by chunk, asking the configured chat model to
    /// merge each chunk into the accumulated profile. Every merge is
    /// evidence-checked against the chunk text before it is accepted.
    Harvest {
        /// Document id to harvest. Resumes from a stored partial state.
        id: Option<String>,

        /// Harvest every document without a completed extraction.
        #[arg(long)]
        all: bool,

        /// Restart from an empty state instead of resuming.
        #[arg(long)]
        force: bool,

        /// Progress reporting: auto, human, json, or off.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Search chunks or extracted entity collections.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Collection to search: `chunks`, `requirements`, `criteria`,
        /// `contacts`, `deadlines`, `keywords`, `standards`, `organizations`.
        #[arg(long, default_value = "chunks")]
        collection: String,

        /// Restrict results to one document id.
        #[arg(long)]
        doc: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show a document: metadata, extraction state, entity counts.
    Get {
        /// Document id.
        id: String,

        /// Also print every chunk's text.
        #[arg(long)]
        chunks: bool,
    },

    /// List ingested documents.
    Docs,

    /// Manage embedding vectors for chunks and entities.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Database overview: counts, coverage, providers, file size.
    Stats,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks and entities that are missing or have stale vectors.
    Pending {
        /// Maximum number of items to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all vectors.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            paths,
            full,
            dry_run,
            limit,
            skip_harvest,
            progress,
        } => {
            let mode = ProgressMode::from_flag(&progress)?;
            let paths = if paths.is_empty() {
                vec![".".to_string()]
            } else {
                paths
            };
            ingest::run_ingest(&cfg, &paths, full, dry_run, limit, skip_harvest, mode).await?;
        }
        Commands::Import {
            paths,
            full,
            dry_run,
            limit,
            skip_harvest,
            progress,
        } => {
            let mode = ProgressMode::from_flag(&progress)?;
            ingest::run_import(&cfg, &paths, full, dry_run, limit, skip_harvest, mode).await?;
        }
        Commands::Harvest {
            id,
            all,
            force,
            progress,
        } => {
            let mode = ProgressMode::from_flag(&progress)?;
            harvest::run_harvest(&cfg, id.as_deref(), all, force, mode).await?;
        }
        Commands::Search {
            query,
            mode,
            collection,
            doc,
            limit,
        } => {
            search::run_search(&cfg, &query, &mode, &collection, doc, limit).await?;
        }
        Commands::Get { id, chunks } => {
            get::run_get(&cfg, &id, chunks).await?;
        }
        Commands::Docs => {
            docs::run_docs(&cfg).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(
                    &cfg,
                    limit,
                    batch_size,
                    dry_run,
                    ProgressMode::default_for_tty(),
                )
                .await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size, ProgressMode::default_for_tty())
                    .await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("RFX_HARVEST_LOG")
        .unwrap_or_else(|_| EnvFilter::new("rfx_harvest=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
