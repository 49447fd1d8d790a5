//! Burrow CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Initialize config directory & default config.toml
//! - `run`     — Start the agent (gateway + scheduler + local model)
//! - `doctor`  — Diagnose config, storage, and model setup

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "burrow",
    about = "Burrow — a Discord chat agent running a local language model",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Start the agent and connect to the gateway
    Run {
        /// Override the configured model alias or GGUF path
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Diagnose system health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run { model } => commands::run::run(model).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
