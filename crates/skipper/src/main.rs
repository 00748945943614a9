//! Skipper - a sandboxed coding agent for the terminal

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    chat_command, init_command, memory_command, run_command, status_command, todos_command,
};

/// Skipper - coding agent for your terminal
#[derive(Parser)]
#[command(name = "skipper")]
#[command(about = "A sandboxed, tool-using coding agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and workspace
    Init,
    /// Run the agent on a single task
    Run {
        /// Task for the agent
        #[arg(short, long)]
        message: String,
        /// Maximum model calls for this run
        #[arg(long)]
        max_steps: Option<usize>,
        /// Workspace directory (overrides config)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Interactive session with the agent
    Chat {
        /// Workspace directory (overrides config)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Show the workspace TODO list
    Todos {
        /// Workspace directory (overrides config)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Show stored repository memory
    Memory {
        /// Workspace directory (overrides config)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Run {
            message,
            max_steps,
            workspace,
        } => run_command(message, max_steps, workspace).await,
        Commands::Chat { workspace } => chat_command(workspace).await,
        Commands::Todos { workspace } => todos_command(workspace).await,
        Commands::Memory { workspace } => memory_command(workspace).await,
        Commands::Status => status_command().await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
