//! Export strategy engine
//!
//! Three interchangeable exporters implement [`TimelapseStrategy`]: full
//! re-encode, frame decimation, and keyframe passthrough. The session picks
//! one via the domain rules and drives it on a worker thread.

pub mod decimate;
pub mod passthrough;
pub mod progress;
pub mod reencode;

use std::path::Path;

use ffmpeg_next as ffmpeg;

use crate::domain::rules::{ExportPlan, StrategyKind};
use crate::engine::progress::ProgressTracker;
use crate::error::{LapseError, LapseResult};

/// Output frame rates are capped here; sources above it are resampled down.
pub const OUTPUT_FPS_CAP: f64 = 30.0;

/// Nominal integer output frame rate for the fast paths:
/// `min(source fps, 30)`, rounded.
pub fn output_frame_rate(source_fps: f64) -> i32 {
    let fps = source_fps.min(OUTPUT_FPS_CAP).round() as i32;
    fps.max(1)
}

/// Common capability of the three exporters.
///
/// `run` blocks until the export finishes, fails, or observes cancellation
/// through the tracker; it reports progress through the same tracker. A
/// partially written destination file is the caller's to clean up; every
/// non-success return leaves nothing the caller should keep.
pub trait TimelapseStrategy: Send {
    fn kind(&self) -> StrategyKind;

    fn run(&self, plan: &ExportPlan, tracker: &ProgressTracker) -> LapseResult<StrategyReport>;
}

/// Build the canonical exporter for a strategy kind.
pub fn build_strategy(kind: StrategyKind) -> Box<dyn TimelapseStrategy> {
    match kind {
        StrategyKind::Reencode => Box::new(reencode::ReencodeExporter::new()),
        StrategyKind::Decimate => Box::new(decimate::DecimationExporter::new()),
        StrategyKind::Passthrough => Box::new(passthrough::PassthroughExporter::new()),
    }
}

/// What an exporter accomplished.
#[derive(Debug, Clone, Default)]
pub struct StrategyReport {
    pub frames_written: u64,
    pub output_duration: f64,
    pub bytes_written: u64,
    /// Trade-offs hit during the export (e.g. keyframe-limited output).
    pub warnings: Vec<String>,
}

/// Cooperative cancellation check used at loop and wait boundaries.
pub(crate) fn ensure_active(tracker: &ProgressTracker) -> LapseResult<()> {
    if tracker.is_cancelled() {
        Err(LapseError::Cancelled)
    } else {
        Ok(())
    }
}

/// Nap between encoder-full polls; bounds the in-flight frame window without
/// spinning.
pub(crate) const BACKPRESSURE_NAP: std::time::Duration = std::time::Duration::from_millis(2);

/// Feed one frame to a video encoder, waiting out a full input queue.
///
/// EAGAIN from the encoder is backpressure, not an error: drain pending
/// packets, check for cancellation, nap briefly, retry.
pub(crate) fn send_with_backpressure(
    encoder: &mut ffmpeg::encoder::video::Encoder,
    frame: &ffmpeg::util::frame::Video,
    octx: &mut ffmpeg::format::context::Output,
    ost_index: usize,
    from_tb: ffmpeg::Rational,
    to_tb: ffmpeg::Rational,
    tracker: &ProgressTracker,
    bytes_written: &mut u64,
) -> LapseResult<()> {
    loop {
        match encoder.send_frame(frame) {
            Ok(()) => break,
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::util::error::EAGAIN,
            }) => {
                drain_video_encoder(encoder, octx, ost_index, from_tb, to_tb, bytes_written)?;
                ensure_active(tracker)?;
                std::thread::sleep(BACKPRESSURE_NAP);
            }
            Err(e) => return Err(LapseError::write_failure("send frame to encoder", e)),
        }
    }
    drain_video_encoder(encoder, octx, ost_index, from_tb, to_tb, bytes_written)
}

/// Receive all available encoded packets and write them to the muxer.
pub(crate) fn drain_video_encoder(
    encoder: &mut ffmpeg::encoder::video::Encoder,
    octx: &mut ffmpeg::format::context::Output,
    ost_index: usize,
    from_tb: ffmpeg::Rational,
    to_tb: ffmpeg::Rational,
    bytes_written: &mut u64,
) -> LapseResult<()> {
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(ost_index);
        packet.rescale_ts(from_tb, to_tb);
        *bytes_written += packet.size() as u64;
        packet
            .write_interleaved(octx)
            .map_err(|e| LapseError::write_failure("write encoded packet", e))?;
    }
    Ok(())
}

/// Index of the primary video stream, or `NoVideoTrack`.
pub(crate) fn best_video_stream_index(
    ictx: &ffmpeg::format::context::Input,
    path: &Path,
) -> LapseResult<usize> {
    ictx.streams()
        .best(ffmpeg::media::Type::Video)
        .map(|s| s.index())
        .ok_or_else(|| LapseError::NoVideoTrack {
            path: path.display().to_string(),
        })
}

/// Seek the demuxer to the nearest keyframe at or before `seconds`.
pub(crate) fn seek_to_seconds(
    ictx: &mut ffmpeg::format::context::Input,
    seconds: f64,
) -> LapseResult<()> {
    let ts = (seconds * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
    ictx.seek(ts, ..ts)?;
    Ok(())
}
