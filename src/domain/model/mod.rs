// Domain models - Core types and data structures

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LapseError, LapseResult};

/// Immutable description of a probed source video file.
///
/// Owned by the caller for the lifetime of an export; the export core only
/// ever reads it.
#[derive(Debug, Clone, Serialize)]
pub struct SourceAsset {
    /// Absolute or caller-relative path to the media file
    pub path: PathBuf,
    /// Total duration in seconds
    pub duration: f64,
    /// Natural pixel width
    pub width: u32,
    /// Natural pixel height
    pub height: u32,
    /// Display rotation in degrees (from container metadata, 0 when absent)
    pub rotation: f64,
    /// Nominal frame rate
    pub frame_rate: f64,
    /// Video codec name ("h264", "hevc", ...)
    pub video_codec: String,
    /// Whether the container carries at least one audio track
    pub has_audio: bool,
    /// Container size in bytes
    pub file_size: u64,
}

impl SourceAsset {
    /// Selected-range fraction of the whole asset, used by the disk estimate.
    pub fn fraction_of(&self, range: &TimeRange) -> f64 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        (range.duration() / self.duration).min(1.0)
    }
}

/// Validated trim selection on the source timeline.
///
/// Invariants: `start >= 0`, `start + duration <= source duration`,
/// `duration >= MIN_DURATION`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeRange {
    start: f64,
    duration: f64,
}

impl TimeRange {
    /// Selections shorter than this cannot be exported meaningfully.
    pub const MIN_DURATION: f64 = 0.1;

    /// Resolve optional trim points against the source duration.
    ///
    /// Missing ends default to the start/end of the source; an out point past
    /// the end is clamped to it. Inverted or too-short selections fail with
    /// `InvalidTimeRange`.
    pub fn resolve(
        trim_in: Option<f64>,
        trim_out: Option<f64>,
        source_duration: f64,
    ) -> LapseResult<Self> {
        if source_duration <= 0.0 {
            return Err(LapseError::InvalidTimeRange {
                message: format!("source duration must be positive, got {source_duration}"),
            });
        }

        let start = trim_in.unwrap_or(0.0);
        if start < 0.0 {
            return Err(LapseError::InvalidTimeRange {
                message: format!("trim-in must not be negative, got {start}"),
            });
        }
        if start >= source_duration {
            return Err(LapseError::InvalidTimeRange {
                message: format!(
                    "trim-in ({start}) is at or past the end of the source ({source_duration})"
                ),
            });
        }

        let end = trim_out.unwrap_or(source_duration).min(source_duration);
        if end <= start {
            return Err(LapseError::InvalidTimeRange {
                message: format!("trim-out ({end}) must be greater than trim-in ({start})"),
            });
        }

        let duration = end - start;
        if duration < Self::MIN_DURATION {
            return Err(LapseError::InvalidTimeRange {
                message: format!(
                    "selection is {duration:.3}s; minimum is {}s",
                    Self::MIN_DURATION
                ),
            });
        }

        Ok(Self { start, duration })
    }

    /// The full source timeline.
    pub fn full(source_duration: f64) -> LapseResult<Self> {
        Self::resolve(None, None, source_duration)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Speed multiplier, constrained to the supported export window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Speed(f64);

impl Speed {
    pub const MIN: f64 = 2.0;
    pub const MAX: f64 = 100.0;

    pub fn new(value: f64) -> LapseResult<Self> {
        if !value.is_finite() || value < Self::MIN || value > Self::MAX {
            return Err(LapseError::InvalidSpeed {
                value,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

/// Output quality tier.
///
/// Each tier implies a codec pair and a container; the passthrough fast path
/// overrides the container regardless of tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// H.264 + AAC in MP4; small files, fast to encode
    #[default]
    Efficient,
    /// ProRes + AAC in QuickTime; editing-friendly intermediate
    Fidelity,
}

impl QualityTier {
    /// Container extension implied by the tier under full re-encode.
    pub fn container_extension(&self) -> &'static str {
        match self {
            QualityTier::Efficient => "mp4",
            QualityTier::Fidelity => "mov",
        }
    }

    /// Rough output-to-input size ratio for the disk-space estimate.
    /// ProRes intermediates run several times larger than delivery H.264.
    pub fn size_ratio(&self) -> f64 {
        match self {
            QualityTier::Efficient => 1.0,
            QualityTier::Fidelity => 3.0,
        }
    }
}

/// Target resolution preset. Honored only by the full re-encode path.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPreset {
    /// Keep the source dimensions
    #[default]
    Source,
    /// Fit within 1920x1080
    #[value(name = "1080p")]
    #[serde(rename = "1080p")]
    Hd1080,
    /// Fit within 3840x2160
    #[value(name = "4k")]
    #[serde(rename = "4k")]
    Uhd4k,
}

impl ResolutionPreset {
    /// Bounding box for the preset, `None` for match-source.
    pub fn target_box(&self) -> Option<(u32, u32)> {
        match self {
            ResolutionPreset::Source => None,
            ResolutionPreset::Hd1080 => Some((1920, 1080)),
            ResolutionPreset::Uhd4k => Some((3840, 2160)),
        }
    }
}

/// Caller-chosen export options. Immutable per export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportSettings {
    pub quality: QualityTier,
    pub resolution: ResolutionPreset,
    pub include_audio: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            quality: QualityTier::default(),
            resolution: ResolutionPreset::default(),
            include_audio: true,
        }
    }
}

/// The unit of export work: source + selection + speed + settings + destination.
///
/// Immutable once a session starts.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub asset: SourceAsset,
    pub range: TimeRange,
    pub speed: Speed,
    pub settings: ExportSettings,
    pub dest: PathBuf,
}

impl ExportJob {
    /// Build a job, validating speed and resolving the trim selection against
    /// the asset duration.
    pub fn new(
        asset: SourceAsset,
        speed: f64,
        settings: ExportSettings,
        dest: PathBuf,
        trim_in: Option<f64>,
        trim_out: Option<f64>,
    ) -> LapseResult<Self> {
        let speed = Speed::new(speed)?;
        let range = TimeRange::resolve(trim_in, trim_out, asset.duration)?;
        Ok(Self {
            asset,
            range,
            speed,
            settings,
            dest,
        })
    }

    /// Expected output duration under uniform time compression.
    pub fn output_duration(&self) -> f64 {
        self.range.duration() / self.speed.get()
    }
}

#[cfg(test)]
mod tests;
