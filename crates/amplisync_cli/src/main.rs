//! AmpliSync CLI
//!
//! Command-line client that keeps a local SQLite database in sync with an
//! AmpliSync server.
//!
//! # Commands
//!
//! - `login` - Store the session used by the other commands
//! - `bootstrap` - Download the server snapshot if there is no database
//! - `pull` / `push` / `sync` - Run one sync phase or a full cycle
//! - `scan` - Show pending local changes without sending them
//! - `tables` - List syncable tables
//! - `logout` - Delete the local database and the session

mod commands;

use clap::{Parser, Subcommand};
use commands::{Context, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// AmpliSync command-line client.
#[derive(Parser)]
#[command(name = "ampli-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the database (defaults to the platform location)
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    /// Database name, without extension
    #[arg(global = true, short, long, default_value = amplisync_engine::DEFAULT_DATABASE_NAME)]
    name: String,

    /// Application bundle id used for the platform location
    #[arg(global = true, short, long, default_value = "unknown")]
    bundle: String,

    /// Device id (defaults to one generated and stored in the database directory)
    #[arg(global = true, long)]
    device_id: Option<String>,

    /// Session file (defaults to session.json in the database directory)
    #[arg(global = true, long)]
    session: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the session used by the other commands
    Login {
        /// Server base URL
        #[arg(short, long)]
        url: String,

        /// Account login
        #[arg(short, long)]
        login: String,

        /// Bearer access token
        #[arg(short, long)]
        token: String,
    },

    /// Download the server snapshot if there is no local database
    Bootstrap,

    /// Apply migrations and pull server changes
    Pull,

    /// Push local changes
    Push,

    /// Run a full cycle: migrations, pull, then push
    Sync,

    /// Show pending local changes without sending them
    Scan {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List syncable tables and their columns
    Tables {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete the local database and the stored session
    Logout,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let context = Context::resolve(
        cli.dir,
        &cli.name,
        &cli.bundle,
        cli.device_id,
        cli.session,
    )?;

    match cli.command {
        Commands::Login { url, login, token } => {
            commands::session::login(&context, &url, &login, &token)?;
        }
        Commands::Bootstrap => commands::sync::bootstrap(&context)?,
        Commands::Pull => commands::sync::pull(&context)?,
        Commands::Push => commands::sync::push(&context)?,
        Commands::Sync => commands::sync::sync(&context)?,
        Commands::Scan { format } => commands::inspect::scan(&context, format)?,
        Commands::Tables { format } => commands::inspect::tables(&context, format)?,
        Commands::Logout => commands::session::logout(&context)?,
        Commands::Version => {
            println!("AmpliSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Server API path: /{}", amplisync_engine::API_BASE_PATH);
        }
    }

    Ok(())
}
