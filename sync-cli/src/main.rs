//! # outbox
//!
//! Operator CLI for the outbox message queue.
//!
//! ## Commands
//!
//! - `enqueue`: Queue a user message for later delivery
//! - `pending`: List queued entries in send order
//! - `count`: Show the number of queued entries
//! - `sweep`: Drop entries that reached the retry ceiling
//! - `config`: Print the effective configuration
//!
//! ## Example
//!
//! ```bash
//! # Queue a message while offline
//! outbox enqueue conv_1 "See you tomorrow"
//!
//! # Inspect what is waiting
//! outbox pending --conversation conv_1
//!
//! # Drop undeliverable messages
//! outbox sweep --max-retries 3
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{count, enqueue, pending, show, sweep};
use config::Settings;

/// Operator CLI for the outbox message queue.
#[derive(Parser, Debug)]
#[command(name = "outbox")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: outbox.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Queue database (overrides [storage].database)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a user message for later delivery
    Enqueue {
        /// Conversation the message belongs to
        conversation: String,

        /// Message text
        text: String,
    },

    /// List queued entries in send order
    Pending {
        /// Only list entries of this conversation
        #[arg(long, short)]
        conversation: Option<String>,
    },

    /// Show the number of queued entries
    Count,

    /// Drop entries that reached the retry ceiling
    Sweep {
        /// Retry ceiling (default: [session].max_retries)
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config::default_data_dir()?;
    let settings = Settings::resolve(cli.config.as_deref(), cli.database, &data_dir)?;

    match cli.command {
        Commands::Enqueue { conversation, text } => {
            let local_id = enqueue::run(&settings, &conversation, &text).await?;
            println!("Queued {}", local_id);
        }
        Commands::Pending { conversation } => {
            let entries = pending::run(&settings, conversation.as_deref()).await?;
            pending::print(&entries);
        }
        Commands::Count => {
            println!("{}", count::run(&settings).await?);
        }
        Commands::Sweep { max_retries } => {
            let dropped = sweep::run(&settings, max_retries).await?;
            sweep::print(&dropped);
        }
        Commands::Config => {
            print!("{}", show::run(&settings)?);
        }
    }

    Ok(())
}
