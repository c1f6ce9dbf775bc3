//! # inkdex CLI
//!
//! The `inkdex` binary runs discovery, keeps the search index in sync, and
//! gives operators the curation and inspection commands.
//!
//! ## Usage
//!
//! ```bash
//! inkdex --config ./config/inkdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `inkdex init` | Create both SQLite databases and their schemas |
//! | `inkdex discover "<query>"` | Run the discovery pipeline |
//! | `inkdex sync [--follow]` | Apply the change feed to the index |
//! | `inkdex status` | Per-shard offsets, feed head, and lag |
//! | `inkdex reconcile` | Detect and repair store/index drift |
//! | `inkdex dead-letters list\|replay <id>` | Inspect or retry failed sync events |
//! | `inkdex get <id>` | Show a record and its index document |
//! | `inkdex find --city <c> --style <s>` | Query the index |
//! | `inkdex stats` | Catalog overview |
//! | `inkdex takedown <id>` | Delete a record from the store |
//! | `inkdex curate delist <id>` | Hide a document in the index |
//!
//! Results go to stdout; logs (`RUST_LOG`, default `inkdex=info`) and
//! progress go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use inkdex::orchestrator::RunState;
use inkdex::progress::ProgressMode;
use inkdex::reconcile::{Direction, Scope};
use inkdex::{config, curate, find, get, migrate, orchestrator, reconcile, stats, status, sync};
use inkdex_core::models::EntityType;
use tracing_subscriber::EnvFilter;

/// inkdex: tattoo artist discovery with an eventually consistent search index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/inkdex.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "inkdex", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/inkdex.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human output on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both databases. Idempotent.
    Init,

    /// Run the pipeline for a query: discover, extract, scrape, ingest.
    ///
    /// Prints the run summary as JSON. Exits with status 2 when the run
    /// hit its deadline and ended partially.
    Discover {
        /// Free-text query, e.g. a city or a studio name. `*` matches all.
        query: String,
    },

    /// Apply pending change events to the search index.
    Sync {
        /// Keep polling the change feed until interrupted.
        #[arg(long)]
        follow: bool,
    },

    /// Show forward sync offsets, feed head, and lag.
    Status,

    /// Compare store and index and repair drift.
    Reconcile {
        /// `store-to-index` or `index-to-store`.
        #[arg(long, default_value = "store-to-index")]
        direction: String,

        /// `all`, `artists`, `studios`, or `ids:<id>,<id>`.
        #[arg(long, default_value = "all")]
        scope: String,

        /// Report drift without repairing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or replay dead-lettered sync events.
    DeadLetters {
        #[command(subcommand)]
        action: DeadLetterAction,
    },

    /// Show a record and its index document.
    Get {
        /// Entity id or doc id (`artist:<id>`, `studio:<id>`).
        id: String,
    },

    /// Query the index by city and style.
    Find {
        #[arg(long)]
        style: Option<String>,

        #[arg(long)]
        city: Option<String>,

        /// `artist` or `studio`.
        #[arg(long = "type")]
        entity_type: Option<String>,

        #[arg(long)]
        include_delisted: bool,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print matching documents as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Record counts, feed size, and recent runs.
    Stats,

    /// Delete a record from the canonical store.
    Takedown { id: String },

    /// Index-side curation.
    Curate {
        #[command(subcommand)]
        action: CurateAction,
    },
}

#[derive(Subcommand)]
enum DeadLetterAction {
    List,
    Replay { id: String },
}

#[derive(Subcommand)]
enum CurateAction {
    /// Hide a document from lookups.
    Delist {
        id: String,
        /// Clear the flag instead.
        #[arg(long)]
        undo: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inkdex=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let progress = match cli.progress {
        Some(ProgressArg::Off) => ProgressMode::Off,
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized successfully.");
        }
        Commands::Discover { query } => {
            let summary = orchestrator::run_discover(&cfg, &query, progress).await?;
            if let RunState::Failed { .. } = summary.state {
                std::process::exit(2);
            }
        }
        Commands::Sync { follow } => {
            sync::run_sync(&cfg, follow).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Reconcile {
            direction,
            scope,
            dry_run,
        } => {
            let direction: Direction = direction.parse()?;
            let scope: Scope = scope.parse()?;
            reconcile::run_reconcile(&cfg, direction, &scope, dry_run).await?;
        }
        Commands::DeadLetters { action } => match action {
            DeadLetterAction::List => sync::run_dead_letters_list(&cfg).await?,
            DeadLetterAction::Replay { id } => sync::run_dead_letters_replay(&cfg, &id).await?,
        },
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Find {
            style,
            city,
            entity_type,
            include_delisted,
            limit,
            json,
        } => {
            let entity_type = entity_type
                .map(|t| t.parse::<EntityType>())
                .transpose()?;
            let args = find::FindArgs {
                style,
                city,
                entity_type,
                include_delisted,
                limit,
                json,
            };
            find::run_find(&cfg, &args).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Takedown { id } => {
            curate::run_takedown(&cfg, &id).await?;
        }
        Commands::Curate { action } => match action {
            CurateAction::Delist { id, undo } => {
                curate::run_delist(&cfg, &id, undo).await?;
            }
        },
    }

    Ok(())
}
