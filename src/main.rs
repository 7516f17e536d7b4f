mod auth;
mod commands;
mod metadata;
mod models;
mod paths;
mod stats;
mod store;
mod sync;
mod upload;
mod youtube;
mod youtube_api;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::models::{Direction, Privacy, SortBy};

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "vbyt", version, about = "Publish lecture videos to YouTube and keep course folders in sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a video described by a metadata file
    Upload {
        /// Path to the metadata JSON file
        #[arg(short, long)]
        metadata: PathBuf,

        #[arg(short, long, value_enum, ignore_case = true, default_value_t = Privacy::Private)]
        privacy: Privacy,
    },

    /// Push title, description and tags of an uploaded video again
    Update {
        /// Path to the metadata JSON file
        #[arg(short, long)]
        metadata: PathBuf,
    },

    /// Mirror non-video files between the SSD and the local copy
    Sync {
        /// SSD directory (defaults to config `sync_source`)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Local directory (defaults to config `sync_destination`)
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Skip the timestamp comparison
        #[arg(long, value_enum)]
        force_direction: Option<Direction>,
    },

    /// Show channel statistics
    Stats,

    /// List videos with their metrics
    Videos {
        #[arg(long, value_enum, default_value_t = SortBy::Date)]
        sort_by: SortBy,

        /// Number of videos to show
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Show top videos instead of the latest ones
        #[arg(long)]
        top: bool,
    },

    Config {
        key: String,
        value: String,
    },

    Info,
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Upload { metadata, privacy } => commands::upload(&metadata, privacy),
        Commands::Update { metadata } => commands::update(&metadata),
        Commands::Sync {
            source,
            destination,
            force_direction,
        } => commands::sync(source.as_deref(), destination.as_deref(), force_direction),
        Commands::Stats => commands::stats(),
        Commands::Videos {
            sort_by,
            limit,
            top,
        } => commands::videos(sort_by, limit, top),
        Commands::Config { key, value } => commands::config(&key, &value),
        Commands::Info => commands::info(),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
