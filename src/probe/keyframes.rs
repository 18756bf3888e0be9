//! Keyframe interval scanning
//!
//! Walks the compressed packets of the video stream and records where the
//! sync samples sit. The interval summary predicts how smooth a passthrough
//! export can be: retained keyframes can never be closer together than the
//! source's own keyframe spacing.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LapseError, LapseResult};
use crate::utils::time::pts_to_seconds;

/// Cap on scanned keyframes; beyond this the interval statistics are stable.
const MAX_KEYFRAMES: usize = 10_000;

/// Keyframe spacing statistics for one video stream.
#[derive(Debug, Clone, Serialize)]
pub struct GopSummary {
    pub keyframe_count: usize,
    pub mean_interval: f64,
    pub min_interval: f64,
    pub max_interval: f64,
}

/// Result of a keyframe scan.
#[derive(Debug, Clone, Serialize)]
pub struct KeyframeScan {
    /// Keyframe presentation times in seconds, ascending.
    pub timestamps: Vec<f64>,
    /// Interval statistics; `None` with fewer than two keyframes.
    pub summary: Option<GopSummary>,
}

/// Scan the video stream of `path` for keyframe positions.
pub fn scan_keyframes(path: &Path) -> LapseResult<KeyframeScan> {
    let mut ictx = ffmpeg::format::input(&path).map_err(|e| LapseError::ProbeError {
        message: format!("failed to open {}: {e}", path.display()),
    })?;

    let (video_index, time_base) = {
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| LapseError::NoVideoTrack {
                path: path.display().to_string(),
            })?;
        (stream.index(), stream.time_base())
    };

    let mut timestamps = Vec::new();
    for (stream, packet) in ictx.packets() {
        if stream.index() != video_index || !packet.is_key() {
            continue;
        }
        let Some(pts) = packet.pts() else { continue };
        timestamps.push(pts_to_seconds(pts, time_base));

        if timestamps.len() >= MAX_KEYFRAMES {
            warn!("reached keyframe scan limit ({MAX_KEYFRAMES}), stopping early");
            break;
        }
    }

    timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap());
    debug!("found {} keyframes", timestamps.len());

    let summary = summarize(&timestamps);
    Ok(KeyframeScan {
        timestamps,
        summary,
    })
}

/// Interval statistics over an ascending keyframe timestamp list.
pub fn summarize(timestamps: &[f64]) -> Option<GopSummary> {
    if timestamps.len() < 2 {
        return None;
    }

    let intervals: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let min = intervals.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = intervals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    Some(GopSummary {
        keyframe_count: timestamps.len(),
        mean_interval: mean,
        min_interval: min,
        max_interval: max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_needs_two_keyframes() {
        assert!(summarize(&[]).is_none());
        assert!(summarize(&[1.0]).is_none());
    }

    #[test]
    fn summarize_regular_gop() {
        let timestamps: Vec<f64> = (0..10).map(|i| i as f64 * 2.0).collect();
        let summary = summarize(&timestamps).unwrap();
        assert_eq!(summary.keyframe_count, 10);
        assert!((summary.mean_interval - 2.0).abs() < 1e-9);
        assert!((summary.min_interval - 2.0).abs() < 1e-9);
        assert!((summary.max_interval - 2.0).abs() < 1e-9);
    }

    #[test]
    fn summarize_irregular_gop() {
        let summary = summarize(&[0.0, 1.0, 4.0, 5.0]).unwrap();
        assert!((summary.min_interval - 1.0).abs() < 1e-9);
        assert!((summary.max_interval - 3.0).abs() < 1e-9);
    }
}
