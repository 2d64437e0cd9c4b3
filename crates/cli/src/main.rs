//! Chatloop CLI: the main entry point.
//!
//! Commands:
//! - `simulate`: Run one conversation loop over messages read from stdin
//! - `interval`: Sample proactive silence targets for the current config
//! - `config`: Validate, show, or locate the configuration file

use clap::{Parser, Subcommand};

mod commands;
mod demo;

#[derive(Parser)]
#[command(
    name = "chatloop",
    about = "Chatloop: per-conversation chat-cycle engine",
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
    /// Feed stdin lines into a simulated conversation and print its cycles
    Simulate {
        /// Simulate a group chat instead of a direct message
        #[arg(short, long)]
        group: bool,

        /// Stream id of the simulated conversation
        #[arg(short, long, default_value = "demo")]
        stream: String,

        /// Seconds to keep the loop running after stdin closes
        #[arg(long, default_value_t = 3)]
        linger: u64,
    },

    /// Print sampled proactive intervals and their 3σ range
    Interval {
        /// Number of draws to print
        #[arg(short = 'n', long, default_value_t = 10)]
        samples: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the configuration
    Validate,
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
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
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            group,
            stream,
            linger,
        } => commands::simulate::run(group, stream, linger).await?,
        Commands::Interval { samples } => commands::interval::run(samples).await?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
