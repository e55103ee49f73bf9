mod assets;
mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(version, about = "Tessera CLI - build orchestrator and development server", long_about = None)]
struct Cli {
    /// Project root containing tessera.toml (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project once
    Build {
        /// Build for production
        #[arg(long)]
        production: bool,
    },

    /// Build, rebuild on changes and keep the server running
    Dev {
        /// Port the application server listens on
        #[arg(short, long)]
        port: Option<u16>,

        /// Run the server in production mode
        #[arg(long)]
        production: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let root = project_root(cli.root)?;

    match cli.command {
        Commands::Build { production } => {
            commands::build::execute(root, production)?;
        }
        Commands::Dev { port, production } => {
            commands::dev::execute(root, port, production)?;
        }
    }

    Ok(())
}

/// Logs go through `RUST_LOG`, `info` by default
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn project_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to read the current directory")?,
    };
    root.canonicalize()
        .with_context(|| format!("project root {} does not exist", root.display()))
}
