//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

use crate::domain::model::{QualityTier, ResolutionPreset, Speed};
use crate::domain::rules::StrategyKind;

fn parse_speed(s: &str) -> Result<f64, String> {
    clap_num::number_range(s, Speed::MIN, Speed::MAX)
}

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Speed multiplier (2-100)
    #[arg(short, long, value_parser = parse_speed)]
    pub speed: f64,

    /// Output file path (default: derived from the input name and speed)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Quality tier
    #[arg(long, value_enum)]
    pub quality: Option<QualityTier>,

    /// Resolution preset (honored by full re-encode only)
    #[arg(long, value_enum)]
    pub resolution: Option<ResolutionPreset>,

    /// Drop the audio track
    #[arg(long)]
    pub no_audio: bool,

    /// Trim-in point (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(long)]
    pub trim_in: Option<String>,

    /// Trim-out point (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(long)]
    pub trim_out: Option<String>,

    /// Export strategy (auto follows the speed-based selector)
    #[arg(long, value_enum, default_value_t = StrategyArg::Auto)]
    pub strategy: StrategyArg,

    /// Replace the output file if it already exists
    #[arg(long)]
    pub overwrite: bool,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Also scan and summarize keyframe intervals
    #[arg(long)]
    pub keyframes: bool,
}

/// Strategy choice on the command line; `auto` defers to the selector.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyArg {
    #[default]
    Auto,
    Reencode,
    Decimate,
    Passthrough,
}

impl StrategyArg {
    /// The explicit strategy override, if any.
    pub fn requested(self) -> Option<StrategyKind> {
        match self {
            StrategyArg::Auto => None,
            StrategyArg::Reencode => Some(StrategyKind::Reencode),
            StrategyArg::Decimate => Some(StrategyKind::Decimate),
            StrategyArg::Passthrough => Some(StrategyKind::Passthrough),
        }
    }
}
