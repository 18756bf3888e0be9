//! Lapse CLI Video Timelapse Library
//!
//! Turns a source video into a sped-up timelapse by resampling its timeline.
//! Three interchangeable export strategies cover the speed regimes: full
//! re-encode for modest speeds, and frame decimation or keyframe passthrough
//! for the fast path. The [`session::ExportSession`] drives one job at a time
//! through preflight, progress reporting and cancellation.

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod probe;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use domain::model::{
    ExportJob, ExportSettings, QualityTier, ResolutionPreset, SourceAsset, Speed, TimeRange,
};
pub use domain::rules::{resolve_plan, select_strategy, ExportPlan, StrategyKind, StrategyPolicy};
pub use error::{LapseError, LapseResult};
pub use session::{ExportSession, ExportState};

/// Initialize the FFmpeg libraries.
///
/// Safe to call more than once; must run before any probe or export.
pub fn init() -> LapseResult<()> {
    ffmpeg_next::init().map_err(|e| LapseError::FfmpegInit {
        message: e.to_string(),
    })?;

    Ok(())
}
