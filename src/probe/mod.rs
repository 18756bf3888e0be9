//! Media source probing
//!
//! Opens a file through FFmpeg and condenses the track properties the export
//! core needs into an immutable [`SourceAsset`].

pub mod keyframes;

use std::path::Path;

use ffmpeg_next as ffmpeg;
use tracing::{debug, info};

use crate::domain::model::SourceAsset;
use crate::error::{LapseError, LapseResult};

/// Probe a media file into a read-only source asset.
///
/// Fails with `InputNotFound` for a missing file, `NoVideoTrack` when the
/// container has no video stream, and `ProbeError` for anything FFmpeg
/// cannot make sense of.
pub fn probe(path: &Path) -> LapseResult<SourceAsset> {
    if !path.exists() {
        return Err(LapseError::InputNotFound {
            path: path.display().to_string(),
        });
    }

    let file_size = std::fs::metadata(path)?.len();

    let ictx = ffmpeg::format::input(&path).map_err(|e| LapseError::ProbeError {
        message: format!("failed to open {}: {e}", path.display()),
    })?;

    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| LapseError::NoVideoTrack {
            path: path.display().to_string(),
        })?;

    let parameters = stream.parameters();
    let codec_id = parameters.id();
    let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| LapseError::ProbeError {
            message: format!("failed to read video track properties: {e}"),
        })?;

    let video_codec = ffmpeg::codec::decoder::find(codec_id)
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| format!("{codec_id:?}").to_lowercase());

    let duration = container_duration(&ictx, &stream).ok_or_else(|| LapseError::ProbeError {
        message: "could not determine media duration".to_string(),
    })?;

    let frame_rate = estimate_frame_rate(&stream);
    let rotation = stream
        .metadata()
        .get("rotate")
        .and_then(|r| r.parse::<f64>().ok())
        .unwrap_or(0.0);

    let has_audio = ictx.streams().best(ffmpeg::media::Type::Audio).is_some();

    let asset = SourceAsset {
        path: path.to_path_buf(),
        duration,
        width: decoder.width(),
        height: decoder.height(),
        rotation,
        frame_rate,
        video_codec,
        has_audio,
        file_size,
    };

    info!(
        path = %path.display(),
        duration = asset.duration,
        codec = %asset.video_codec,
        fps = asset.frame_rate,
        has_audio,
        "probed source asset"
    );

    Ok(asset)
}

/// Container duration with a per-stream fallback.
fn container_duration(
    ictx: &ffmpeg::format::context::Input,
    stream: &ffmpeg::Stream,
) -> Option<f64> {
    let container = ictx.duration();
    if container > 0 {
        return Some(container as f64 / ffmpeg::ffi::AV_TIME_BASE as f64);
    }

    let stream_duration = stream.duration();
    if stream_duration > 0 {
        let tb = stream.time_base();
        debug!("container duration unknown, using video stream duration");
        return Some(crate::utils::time::pts_to_seconds(stream_duration, tb));
    }

    None
}

/// Nominal frame rate from stream metadata, 25 fps when unknown.
fn estimate_frame_rate(stream: &ffmpeg::Stream) -> f64 {
    let rate = stream.avg_frame_rate();
    if rate.denominator() != 0 && rate.numerator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        25.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_missing_file_is_input_not_found() {
        let err = probe(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(matches!(err, LapseError::InputNotFound { .. }));
    }

    #[test]
    fn probe_non_media_file_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_video.mp4");
        std::fs::write(&path, b"plainly not a video").unwrap();

        let err = probe(&path).unwrap_err();
        assert!(matches!(err, LapseError::ProbeError { .. }));
    }
}
