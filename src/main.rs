//! # docpilot CLI
//!
//! The `docpilot` binary is the primary interface: it manages the database,
//! registers documentation repositories, runs indexing, inspects retrieval
//! ranking, chats with the assistant, and starts the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! docpilot --config ./config/docpilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docpilot init` | Create the SQLite database and schema |
//! | `docpilot source add <owner/repo>` | Register a repository |
//! | `docpilot source list` | List sources with indexing status |
//! | `docpilot source remove <id>` | Delete a source and its chunks |
//! | `docpilot index <id\|owner/repo>` | Run the indexing pipeline |
//! | `docpilot search "<query>"` | Show retrieval ranking for a query |
//! | `docpilot chat "<message>"` | Ask the assistant |
//! | `docpilot serve` | Start the HTTP API server |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docpilot::chat::{ChatMode, ChatService};
use docpilot::config::{self, Config};
use docpilot::github::GithubClient;
use docpilot::llm::HttpGenerator;
use docpilot::models::Source;
use docpilot::progress::ProgressMode;
use docpilot::{db, indexer, migrate, retrieval, server, store};

/// docpilot — documentation ingestion and retrieval-grounded chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Missing file falls back to defaults with a local `docpilot.db`.
#[derive(Parser)]
#[command(
    name = "docpilot",
    about = "Documentation ingestion and retrieval-grounded chat assistant",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docpilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Manage documentation sources.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Run the indexing pipeline for one source.
    ///
    /// Lists the repository tree, filters to documentation files, fetches
    /// and chunks them in batches, and stores the chunks. Progress is
    /// persisted on the source record and shown on stderr.
    Index {
        /// Source id or `owner/repo`.
        source: String,

        /// Progress output: `off`, `human`, or `json`. Defaults to `human`
        /// when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show retrieval ranking for a query.
    ///
    /// Runs the same lexical scorer the assistant uses and prints the
    /// ranked chunks with scores and provenance.
    Search {
        /// The query string.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Ask the assistant a question.
    Chat {
        /// The message to send.
        message: String,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Use the voice channel (fewer grounding chunks, speakable output).
        #[arg(long)]
        voice: bool,
    },

    /// Start the HTTP API server.
    Serve,
}

/// Source management subcommands.
#[derive(Subcommand)]
enum SourceAction {
    /// Register a repository for indexing.
    Add {
        /// Repository as `owner/repo`.
        repo: String,

        /// Branch or commit to index.
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// List registered sources with status.
    List,
    /// Delete a source and all of its chunks.
    Remove {
        /// Source id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docpilot=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .unwrap_or_else(|_| Config::minimal("docpilot.db"));

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Source { action } => match action {
            SourceAction::Add { repo, branch } => {
                let (owner, name) = repo
                    .split_once('/')
                    .context("repository must be given as owner/repo")?;
                if owner.is_empty() || name.is_empty() {
                    bail!("repository must be given as owner/repo");
                }
                let pool = db::connect(&cfg).await?;
                migrate::apply_schema(&pool).await?;
                let source = store::create_source(&pool, owner, name, &branch).await?;
                println!("Registered {} ({})", source.repo_name(), source.id);
                pool.close().await;
            }
            SourceAction::List => {
                let pool = db::connect(&cfg).await?;
                migrate::apply_schema(&pool).await?;
                let sources = store::list_sources(&pool).await?;
                if sources.is_empty() {
                    println!("No sources registered.");
                } else {
                    println!(
                        "{:<38} {:<28} {:<9} {:>5} {:>7}",
                        "ID", "REPO", "STATE", "PROG", "CHUNKS"
                    );
                    for s in sources {
                        println!(
                            "{:<38} {:<28} {:<9} {:>4}% {:>7}",
                            s.id,
                            s.repo_name(),
                            s.state.as_str(),
                            s.progress,
                            s.chunk_count
                        );
                        if let Some(err) = &s.error {
                            println!("    error: {}", err);
                        }
                    }
                }
                pool.close().await;
            }
            SourceAction::Remove { id } => {
                let pool = db::connect(&cfg).await?;
                let Some(source) = store::get_source(&pool, &id).await? else {
                    bail!("no source with id {id}");
                };
                store::delete_source(&pool, &id).await?;
                println!("Removed {}", source.repo_name());
                pool.close().await;
            }
        },
        Commands::Index { source, progress } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            let resolved = resolve_source(&pool, &source).await?;
            let client = GithubClient::new(&cfg.github)?;
            let mode = match progress.as_deref() {
                Some("off") => ProgressMode::Off,
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some(other) => bail!("unknown progress mode: {other}"),
                None => ProgressMode::default_for_tty(),
            };
            let reporter = mode.reporter();

            let summary =
                indexer::run_index(&pool, &cfg, &client, reporter.as_ref(), &resolved.id).await?;

            println!("index {}", resolved.repo_name());
            println!("  files: {}", summary.files);
            println!("  chunks: {}", summary.chunks);
            println!("ok");
            pool.close().await;
        }
        Commands::Search { query, limit } => {
            let pool = db::connect(&cfg).await?;
            let ranked = retrieval::retrieve(&pool, &cfg.retrieval, &query, limit).await;
            if ranked.is_empty() {
                println!("No results.");
            } else {
                for (i, scored) in ranked.iter().enumerate() {
                    let chunk = &scored.chunk;
                    println!(
                        "{}. [{}] {} / {} #{}",
                        i + 1,
                        scored.score,
                        chunk.repo_name,
                        chunk.file_path,
                        chunk.chunk_index
                    );
                    println!("    excerpt: \"{}\"", excerpt(&chunk.content));
                    println!();
                }
            }
            pool.close().await;
        }
        Commands::Chat {
            message,
            conversation,
            voice,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            let generator = Arc::new(HttpGenerator::new(&cfg.generation)?);
            let service = ChatService::new(pool.clone(), cfg.clone(), generator);
            let mode = if voice { ChatMode::Voice } else { ChatMode::Text };

            let reply = service
                .respond(conversation.as_deref(), "local", &message, mode)
                .await?;

            println!("{}", reply.response_text);
            if !reply.citations.is_empty() {
                println!();
                println!("Sources:");
                for citation in &reply.citations {
                    println!("  {} — {}", citation.file_path, citation.url);
                }
            }
            println!();
            println!("conversation: {}", reply.conversation_id);
            pool.close().await;
        }
        Commands::Serve => {
            let generator = Arc::new(HttpGenerator::new(&cfg.generation)?);
            server::run_server(&cfg, generator).await?;
        }
    }

    Ok(())
}

/// Accept either a source id or `owner/repo`.
async fn resolve_source(pool: &sqlx::SqlitePool, spec: &str) -> Result<Source> {
    if let Some((owner, repo)) = spec.split_once('/') {
        return store::find_source(pool, owner, repo)
            .await?
            .with_context(|| format!("no source registered for {spec}"));
    }
    store::get_source(pool, spec)
        .await?
        .with_context(|| format!("no source with id {spec}"))
}

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let trimmed = flat.trim();
    let mut out: String = trimmed.chars().take(160).collect();
    if trimmed.chars().count() > 160 {
        out.push('…');
    }
    out
}
