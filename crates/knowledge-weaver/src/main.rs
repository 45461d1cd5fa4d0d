//! # Knowledge Weaver CLI (`kw`)
//!
//! ## Usage
//!
//! ```bash
//! kw --config ./config/weaver.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kw init` | Create the SQLite database and schema |
//! | `kw serve` | Start the HTTP API |
//! | `kw query "<text>"` | Search the knowledge base |
//! | `kw process <file>` | Ingest a JSON file of chat messages |
//! | `kw recent` | List the newest entries |
//! | `kw gaps` | List recurring unanswered queries |
//! | `kw history` | Show recent human corrections |
//! | `kw health` | Check index and provider readiness |
//! | `kw stats` | Print dashboard counters |

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use knowledge_weaver::config;
use knowledge_weaver::engine::Weaver;
use knowledge_weaver::migrate;
use knowledge_weaver::server;
use knowledge_weaver_core::models::ChatMessage;

#[derive(Parser)]
#[command(
    name = "kw",
    about = "Knowledge Weaver: a searchable, human-verified knowledge base built from chat logs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/weaver.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Search the knowledge base.
    Query {
        /// Question to search for.
        text: String,

        /// Only return human-verified entries.
        #[arg(long)]
        verified_only: bool,
    },

    /// Ingest chat messages from a JSON file.
    ///
    /// The file holds either an array of messages or an object with a
    /// `messages` array.
    Process {
        file: PathBuf,
    },

    /// List the newest entries.
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Show the trash instead of active entries.
        #[arg(long)]
        deleted: bool,
    },

    /// List recurring unanswered queries.
    Gaps {
        #[arg(long, default_value_t = 7)]
        days: i64,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show recent human corrections.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Check index and provider readiness.
    Health,

    /// Print dashboard counters.
    Stats,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChatLogFile {
    Bare(Vec<ChatMessage>),
    Wrapped { messages: Vec<ChatMessage> },
}

fn read_chat_log(path: &Path) -> anyhow::Result<Vec<ChatMessage>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chat log: {}", path.display()))?;
    let parsed: ChatLogFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse chat log: {}", path.display()))?;
    Ok(match parsed {
        ChatLogFile::Bare(messages) | ChatLogFile::Wrapped { messages } => messages,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("knowledge_weaver=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized: {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(Weaver::open(cfg).await?).await?;
        }
        Commands::Query {
            text,
            verified_only,
        } => {
            let weaver = Weaver::open(cfg).await?;
            print_json(&weaver.query(&text, verified_only).await?)?;
        }
        Commands::Process { file } => {
            let messages = read_chat_log(&file)?;
            let weaver = Weaver::open(cfg).await?;
            let result = weaver.process_chat_logs(messages).await?;
            print_json(&result)?;
        }
        Commands::Recent { limit, deleted } => {
            let weaver = Weaver::open(cfg).await?;
            print_json(&weaver.list_recent(limit, deleted).await?)?;
        }
        Commands::Gaps { days, limit } => {
            let weaver = Weaver::open(cfg).await?;
            print_json(&weaver.list_gaps(days, limit).await?)?;
        }
        Commands::History { limit } => {
            let weaver = Weaver::open(cfg).await?;
            print_json(&weaver.correction_history(limit).await?)?;
        }
        Commands::Health => {
            let weaver = Weaver::open(cfg).await?;
            let health = weaver.health().await;
            print_json(&health)?;
            if !health.is_healthy() {
                anyhow::bail!("knowledge index is degraded");
            }
        }
        Commands::Stats => {
            let weaver = Weaver::open(cfg).await?;
            print_json(&weaver.dashboard().await?)?;
            print_json(&weaver.learning_stats().await?)?;
        }
    }

    Ok(())
}
