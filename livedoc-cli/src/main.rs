//! # livedoc CLI
//!
//! Command-line interface for running the code chunks of a markdown document.

mod commands;
mod report;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "livedoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "livedoc.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the chunks, diagrams and headings of a document
    Scan {
        /// Markdown document
        document: PathBuf,
    },

    /// Run code chunks
    Run {
        /// Markdown document
        document: PathBuf,

        /// Run only this chunk (defaults to every chunk)
        #[arg(long)]
        id: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render the diagram blocks of a document
    Diagrams {
        /// Markdown document
        document: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Scan { document } => commands::scan_chunks(&document).await,
        Commands::Run { document, id, json } => {
            commands::run_chunks(&cli.config, &document, id.as_deref(), json).await
        }
        Commands::Diagrams { document, json } => {
            commands::render_diagrams(&cli.config, &document, json).await
        }
    }
}
