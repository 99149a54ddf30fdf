//! # gitwiki CLI
//!
//! Command-line interface for the gitwiki document store: one-shot static
//! builds and the long-running HTTP server.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gitwiki_core::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitwiki")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, env = "GITWIKI_CONFIG", default_value = "gitwiki.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the static site into the output directory
    Build,

    /// Serve the site, the editing API and the webhook listener
    Serve {
        /// Address to listen on (overrides `listen` from the config)
        #[arg(long, env = "GITWIKI_LISTEN")]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    init_tracing(cli.verbose, &config.log_level)?;

    match cli.command {
        Commands::Build => commands::build_site(config).await,
        Commands::Serve { listen } => commands::serve(config, listen).await,
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` means debug, else the configured
/// level.
fn init_tracing(verbose: bool, log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
