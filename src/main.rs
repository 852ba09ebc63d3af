//! # ragloop CLI (`rloop`)
//!
//! ## Usage
//!
//! ```bash
//! rloop --config ./config/rloop.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rloop init` | Create the SQLite database and run schema migrations |
//! | `rloop index <file.jsonl> --workspace <slug>` | Embed pre-chunked records into a workspace |
//! | `rloop chat "<message>" --workspace <slug>` | Run one reasoning turn, printing each stream chunk as a JSON line |
//! | `rloop serve` | Start the HTTP/SSE server |
//!
//! ## Examples
//!
//! ```bash
//! rloop init --config ./config/rloop.toml
//! rloop index ./data/handbook.jsonl --workspace handbook
//! rloop chat "What is the PTO policy?" --workspace handbook --thread onboarding
//! RUST_LOG=ragloop=debug rloop serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ragloop::config;
use ragloop::react::{begin_reasoning_turn, ReactDeps, TurnOutcome, TurnRequest};
use ragloop::stream::ChannelEmitter;
use ragloop::{db, index_cmd, logging, migrate, server};

/// ragloop CLI: a retrieval-augmented ReAct chat orchestrator.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rloop.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rloop",
    about = "ragloop — retrieval-augmented ReAct chat with streamed reasoning traces",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rloop.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and the chunk_vectors, workspace_chats, and
    /// llm_message_logs tables. Safe to run repeatedly.
    Init,

    /// Embed pre-chunked JSONL records into a workspace namespace.
    ///
    /// Each line is `{"docId", "chunkIndex"?, "title", "published", "text"}`.
    Index {
        /// Path to the JSONL file.
        file: PathBuf,

        /// Target workspace slug (also the vector namespace).
        #[arg(long)]
        workspace: String,

        /// Parse and count records without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one reasoning turn against a workspace.
    Chat {
        /// The user message.
        message: String,

        /// Workspace slug.
        #[arg(long)]
        workspace: String,

        /// Conversation thread id; history is scoped to it.
        #[arg(long)]
        thread: Option<String>,

        /// User id stored with the chat record.
        #[arg(long)]
        user: Option<String>,
    },

    /// Start the HTTP/SSE server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Index {
            file,
            workspace,
            dry_run,
        } => {
            index_cmd::run_index(&cfg, &file, &workspace, dry_run).await?;
        }
        Commands::Chat {
            message,
            workspace,
            thread,
            user,
        } => {
            run_chat(&cfg, message, &workspace, thread, user).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_chat(
    cfg: &config::Config,
    message: String,
    slug: &str,
    thread: Option<String>,
    user: Option<String>,
) -> anyhow::Result<()> {
    let workspace = cfg
        .workspace(slug)
        .ok_or_else(|| anyhow::anyhow!("Unknown workspace: '{}'", slug))?;

    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    let deps = Arc::new(ReactDeps::from_config(cfg, &pool)?);

    let request = TurnRequest {
        message,
        user_id: user,
        thread_id: thread,
        attachments: Vec::new(),
    };

    let (emitter, mut receiver) = ChannelEmitter::new();
    let turn = tokio::spawn(async move {
        begin_reasoning_turn(&deps, &emitter, &workspace, request).await
    });

    while let Some(chunk) = receiver.recv().await {
        println!("{}", serde_json::to_string(&chunk)?);
    }

    let outcome = turn.await?;
    pool.close().await;

    match outcome {
        TurnOutcome::Completed { .. } => Ok(()),
        TurnOutcome::Aborted => anyhow::bail!("turn aborted"),
        TurnOutcome::Disconnected => anyhow::bail!("stream closed before the turn finished"),
    }
}
