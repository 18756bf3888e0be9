//! Lapse CLI Video Timelapse Tool
//!
//! A command-line tool for turning videos into sped-up timelapses with
//! strategy-based export: full re-encode for modest speeds, keyframe
//! passthrough (or frame decimation) for the fast path.
//!
//! # Usage
//!
//! ```bash
//! lapse export --input walk.mp4 --speed 20
//! lapse export --input walk.mp4 --speed 2 --quality fidelity --trim-in 0:30 --trim-out 2:00
//! lapse inspect --input walk.mp4 --keyframes
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use lapse_cli::cli::{commands, Cli, Commands};
use lapse_cli::config::LapseConfig;
use lapse_cli::utils::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.json);
    debug!("starting lapse");

    let config = LapseConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Export(args) => commands::execute_export(args, &config, cli.json),
        Commands::Inspect(args) => commands::execute_inspect(args, cli.json),
    }
}
