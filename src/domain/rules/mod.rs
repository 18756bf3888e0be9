// Domain rules - strategy selection and export plan resolution

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::model::{ExportJob, ExportSettings, QualityTier, ResolutionPreset};
use crate::utils::path::force_extension;

/// The three export strategies, one canonical implementation per speed regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Full decode/filter/encode with uniform time compression
    Reencode,
    /// Decode every frame, encode every Nth
    Decimate,
    /// Remux keyframes only, no decode or encode
    Passthrough,
}

/// Which fast path the selector prefers above the speed threshold.
///
/// Passthrough is the shipping default; decimation stays available for
/// sources whose coarse keyframe interval makes passthrough output too
/// choppy. Swapping the default is this one policy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPolicy {
    #[default]
    Passthrough,
    Decimation,
}

/// Speeds at or below this always take the full re-encode path.
pub const FAST_PATH_THRESHOLD: f64 = 2.0;

/// Container used whenever compressed samples are remuxed verbatim.
pub const PASSTHROUGH_CONTAINER_EXT: &str = "mp4";

/// Pure strategy selection: a function of the speed multiplier alone.
/// Quality settings never move the boundary.
pub fn select_strategy(speed: f64, policy: StrategyPolicy) -> StrategyKind {
    if speed > FAST_PATH_THRESHOLD {
        match policy {
            StrategyPolicy::Passthrough => StrategyKind::Passthrough,
            StrategyPolicy::Decimation => StrategyKind::Decimate,
        }
    } else {
        StrategyKind::Reencode
    }
}

/// A job bound to a concrete strategy, with the settings the strategy will
/// actually honor and the (possibly re-extensioned) destination path.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub job: ExportJob,
    pub strategy: StrategyKind,
    /// Settings after strategy forcing; the job keeps the caller's originals.
    pub effective: ExportSettings,
    pub dest: PathBuf,
    /// Human-readable notes about every forced change, never silent.
    pub warnings: Vec<String>,
}

/// Bind a job to a strategy and apply the documented forcing side effects.
///
/// The fast paths copy or re-encode video only: audio is dropped, resolution
/// stays at source, and the container becomes the one raw-sample-capable
/// format. Under full re-encode the destination extension follows the
/// quality tier.
pub fn resolve_plan(
    job: ExportJob,
    requested: Option<StrategyKind>,
    policy: StrategyPolicy,
) -> ExportPlan {
    let strategy = requested.unwrap_or_else(|| select_strategy(job.speed.get(), policy));
    debug!(?strategy, speed = job.speed.get(), "resolved export strategy");

    let mut effective = job.settings;
    let mut warnings = Vec::new();

    let target_ext = match strategy {
        StrategyKind::Reencode => job.settings.quality.container_extension(),
        StrategyKind::Decimate | StrategyKind::Passthrough => {
            if effective.include_audio {
                effective.include_audio = false;
                warnings.push(format!(
                    "{strategy:?} exports are video-only; the audio track is dropped"
                ));
            }
            if effective.resolution != ResolutionPreset::Source {
                effective.resolution = ResolutionPreset::Source;
                warnings.push(
                    "resolution presets require re-encoding; output keeps the source resolution"
                        .to_string(),
                );
            }
            if strategy == StrategyKind::Passthrough
                && effective.quality != QualityTier::Efficient
            {
                warnings.push(
                    "quality tier has no effect under passthrough; samples are copied verbatim"
                        .to_string(),
                );
            }
            PASSTHROUGH_CONTAINER_EXT
        }
    };

    let (dest, replaced) = force_extension(&job.dest, target_ext);
    if let Some(old) = replaced {
        warnings.push(format!(
            "output extension changed from .{old} to .{target_ext} to match the export strategy"
        ));
    }

    ExportPlan {
        job,
        strategy,
        effective,
        dest,
        warnings,
    }
}
