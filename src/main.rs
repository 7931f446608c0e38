//! # tablechat server binary
//!
//! ## Usage
//!
//! ```bash
//! tablechat --config ./config/tablechat.toml serve
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tablechat serve` | Start the HTTP server |
//! | `tablechat check` | Validate the configuration file and credentials |
//!
//! The `gemini` providers read `GOOGLE_API_KEY` from the environment; a
//! missing key fails `serve` at startup, before the listener binds.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tablechat::config;
use tablechat::server;

/// A retrieval-augmented chat backend for CSV and Excel files.
#[derive(Parser)]
#[command(
    name = "tablechat",
    about = "A retrieval-augmented chat backend for CSV and Excel files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tablechat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to the address in `[server].bind` and serves the upload and
    /// query endpoints until the process is terminated.
    Serve,

    /// Validate the configuration file and provider credentials.
    Check,
}

/// Structured logging to stderr; `RUST_LOG` overrides the level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Check => {
            config::require_credentials(&cfg)?;
            println!("Configuration OK.");
        }
    }

    Ok(())
}
