//! coedit command-line tool
//!
//! Drives the collaborative editing engine from JSON files.
//!
//! # Usage
//!
//! ```bash
//! # Submit every proposal of a script to one document, in order
//! coedit replay session.json
//!
//! # Rebase proposals against everything committed after their base version
//! coedit --rebase-window unseen replay session.json
//!
//! # Keep documents and their logs across runs
//! coedit --db /var/lib/coedit/history.db replay session.json
//!
//! # Transform one operation against another
//! coedit transform base.json concurrent.json
//!
//! # With configuration file
//! coedit --config /etc/coedit/coedit.toml replay session.json
//! ```

mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use coedit_core::{DocumentManager, HistoryStore, Operation, RebaseWindow};
use coedit_storage::{MemoryStorage, SqliteStorage};

use crate::commands::{read_json, run_replay, run_transform, ReplayScript};
use crate::config::CliConfig;

/// coedit - collaborative content editing engine
#[derive(Parser, Debug)]
#[command(name = "coedit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "COEDIT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "COEDIT_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Which committed operations a proposal is rebased over (preceding, unseen)
    #[arg(long, env = "COEDIT_REBASE_WINDOW", global = true)]
    rebase_window: Option<RebaseWindow>,

    /// SQLite database path for persistence (default: in-memory only)
    #[arg(long, env = "COEDIT_DB", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a script of proposals against one document
    Replay {
        /// JSON file with `document`, `entity` and `proposals`
        file: PathBuf,
    },
    /// Transform an operation against one committed concurrent operation
    Transform {
        /// Operation being rebased
        base: PathBuf,
        /// Already committed operation
        concurrent: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    if let Some(window) = args.rebase_window {
        config.engine.rebase_window = window;
    }

    // Initialize logging
    let log_level = args
        .log_level
        .as_deref()
        .or(config.log_level.as_deref())
        .unwrap_or("info");
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the JSON results
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match args.command {
        Command::Replay { file } => {
            let store: Arc<dyn HistoryStore> = match &args.db {
                Some(db_path) => {
                    info!(path = %db_path.display(), "Initializing SQLite persistence");
                    Arc::new(SqliteStorage::new(db_path)?)
                }
                None => {
                    info!("Running in-memory only (no --db specified)");
                    Arc::new(MemoryStorage::new())
                }
            };

            info!(
                rebase_window = ?config.engine.rebase_window,
                max_history = config.engine.max_history,
                "Starting replay"
            );
            let manager = DocumentManager::with_store(config.engine, store);
            let script: ReplayScript = read_json(&file)?;
            let mut stdout = std::io::stdout().lock();
            run_replay(&manager, script, &mut stdout).await?;
        }
        Command::Transform { base, concurrent } => {
            let base: Operation = read_json(&base)?;
            let concurrent: Operation = read_json(&concurrent)?;
            let mut stdout = std::io::stdout().lock();
            run_transform(&base, &concurrent, &mut stdout)?;
        }
    }

    Ok(())
}
