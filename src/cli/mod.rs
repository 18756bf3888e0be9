//! Command-line interface

pub mod args;
pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use args::{ExportArgs, InspectArgs, StrategyArg};

/// Turn videos into sped-up timelapses.
#[derive(Parser, Debug)]
#[command(name = "lapse", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs and progress as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file path
    #[arg(long, global = true, env = "LAPSE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export a sped-up timelapse from a source video
    Export(ExportArgs),
    /// Probe a media file and report its properties
    Inspect(InspectArgs),
}
