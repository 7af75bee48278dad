//! CLI module for Trellis
//!
//! This module provides the command-line interface for the Trellis event
//! materializer. It uses clap for argument parsing and provides a structured
//! command pattern for ingesting feeds and inspecting the materialized state.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

use crate::data_paths::{DataPaths, DEFAULT_DATA_DIR};

// Import all command args and commands
use commands::ingest::{IngestArgs, IngestCommand};
use commands::show::{ShowArgs, ShowCommand};
use commands::stats::{StatsArgs, StatsCommand};
use commands::top::{TopArgs, TopCommand};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(version)]
#[command(about = "Order-tolerant materializer for on-chain term markets", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory path (default: ./data)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a feed of contract events to the materialized database
    Ingest(IngestArgs),

    /// Show row counts and the ingest checkpoint
    Stats(StatsArgs),

    /// Rank terms or instruments by market capitalization
    Top(TopArgs),

    /// Inspect a single materialized row
    Show(ShowArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let data_paths = DataPaths::new(&self.data_dir);

        // Ensure all directories exist
        data_paths.ensure_directories()?;

        match self.command {
            Commands::Ingest(args) => {
                IngestCommand::new(args).execute(data_paths, self.verbose).await
            }
            Commands::Stats(args) => StatsCommand::new(args).execute(data_paths, self.verbose).await,
            Commands::Top(args) => TopCommand::new(args).execute(data_paths, self.verbose).await,
            Commands::Show(args) => ShowCommand::new(args).execute(data_paths, self.verbose).await,
        }
    }
}
