//! colloquy CLI — the main entry point.
//!
//! Commands:
//! - `init`   — Write a default config file
//! - `run`    — Run one conversational turn against a session
//! - `tools`  — Connect configured tool providers and list capabilities

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "colloquy",
    about = "colloquy — session-scoped bridge for conversational engines",
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
    /// Write a default configuration file
    Init,

    /// Run one conversational turn
    Run {
        /// The query to submit
        query: String,

        /// Session key to resolve or create
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Consume the streaming sequence instead of blocking
        #[arg(long)]
        stream: bool,
    },

    /// Connect configured tool providers and list their capabilities
    Tools,
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
        Commands::Init => commands::init::run().await?,
        Commands::Run {
            query,
            session,
            stream,
        } => commands::run::run(query, session, stream).await?,
        Commands::Tools => commands::tools::run().await?,
    }

    Ok(())
}
