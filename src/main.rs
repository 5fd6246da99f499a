use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "pipedeck")]
#[command(version, about = "CI/CD dashboard back-end: log analysis gateway and pipeline tooling")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the analysis gateway
    Serve {
        /// Address to bind (overrides pipedeck.toml)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides pipedeck.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local dashboard dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Detect the tech stack of a repository
    Detect {
        /// Repository directory (defaults to the project directory)
        path: Option<PathBuf>,

        /// Print the stack as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a GitHub Actions workflow for a repository
    Generate {
        /// Repository directory (defaults to the project directory)
        path: Option<PathBuf>,

        /// Write the workflow to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default pipedeck.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(&project_dir, cli.verbose, host.clone(), *port, *dev).await?
        }
        Commands::Detect { path, json } => {
            let root = path.clone().unwrap_or_else(|| project_dir.clone());
            cmd::cmd_detect(&root, *json)?
        }
        Commands::Generate { path, output } => {
            let root = path.clone().unwrap_or_else(|| project_dir.clone());
            cmd::cmd_generate(&root, output.as_deref())?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
