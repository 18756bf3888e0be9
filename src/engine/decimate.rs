//! Frame decimation exporter
//!
//! The documented alternative fast path: every source frame is decoded
//! (cheap), but only every Nth decoded frame is re-encoded (expensive), with
//! N = round(speed). Retained frames are re-stamped onto a uniform output
//! frame rate, so irregular source timing never leaks into the output.

use ffmpeg_next as ffmpeg;
use ffmpeg::software::scaling;
use tracing::{debug, info};

use crate::domain::rules::{ExportPlan, StrategyKind};
use crate::engine::progress::{ExportPhase, ProgressTracker};
use crate::engine::{
    best_video_stream_index, drain_video_encoder, ensure_active, output_frame_rate,
    seek_to_seconds, send_with_backpressure, StrategyReport, TimelapseStrategy,
};
use crate::error::{LapseError, LapseResult};
use crate::utils::time::pts_to_seconds;

/// Decode-all, encode-every-Nth exporter.
pub struct DecimationExporter;

impl DecimationExporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DecimationExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// The pure arithmetic of a decimation pass.
#[derive(Debug, Clone, Copy)]
struct DecimationPlan {
    interval: u64,
    output_fps: i32,
}

impl DecimationPlan {
    fn new(speed: f64, source_fps: f64) -> Self {
        Self {
            interval: (speed.round() as u64).max(1),
            output_fps: output_frame_rate(source_fps),
        }
    }

    /// Frame `index` (0-based within the selection) survives when it falls on
    /// the interval.
    fn should_encode(&self, index: u64) -> bool {
        index % self.interval == 0
    }

    fn estimated_output_frames(&self, selected_duration: f64, source_fps: f64) -> u64 {
        (((selected_duration * source_fps) as u64) / self.interval).max(1)
    }
}

impl TimelapseStrategy for DecimationExporter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Decimate
    }

    fn run(&self, plan: &ExportPlan, tracker: &ProgressTracker) -> LapseResult<StrategyReport> {
        let job = &plan.job;
        let range = job.range;
        let dplan = DecimationPlan::new(job.speed.get(), job.asset.frame_rate);

        info!(
            input = %job.asset.path.display(),
            output = %plan.dest.display(),
            interval = dplan.interval,
            out_fps = dplan.output_fps,
            "starting frame decimation export"
        );

        tracker.set_phase(ExportPhase::Exporting);
        tracker.set_total(dplan.estimated_output_frames(range.duration(), job.asset.frame_rate));

        let mut ictx = ffmpeg::format::input(&job.asset.path)?;
        let video_index = best_video_stream_index(&ictx, &job.asset.path)?;
        let (in_tb, in_params) = {
            let ist = ictx
                .stream(video_index)
                .ok_or(ffmpeg::Error::StreamNotFound)?;
            (ist.time_base(), ist.parameters())
        };

        let mut decoder = ffmpeg::codec::context::Context::from_parameters(in_params)?
            .decoder()
            .video()?;

        let codec = ffmpeg::codec::encoder::find(ffmpeg::codec::Id::H264).ok_or_else(|| {
            LapseError::EncodeOrWrite {
                message: "no H.264 encoder available in this FFmpeg build".to_string(),
            }
        })?;

        let frame_tb = ffmpeg::Rational::new(1, dplan.output_fps);
        let mut octx = ffmpeg::format::output(&plan.dest)
            .map_err(|e| LapseError::write_failure("create output container", e))?;

        let mut encoder = {
            let mut ost = octx
                .add_stream(codec)
                .map_err(|e| LapseError::write_failure("add output stream", e))?;

            let mut settings = ffmpeg::codec::context::Context::new().encoder().video()?;
            settings.set_width(decoder.width());
            settings.set_height(decoder.height());
            settings.set_format(ffmpeg::format::Pixel::YUV420P);
            settings.set_time_base(frame_tb);
            settings.set_frame_rate(Some(ffmpeg::Rational::new(dplan.output_fps, 1)));
            settings.set_aspect_ratio(decoder.aspect_ratio());

            let mut opts = ffmpeg::Dictionary::new();
            opts.set("preset", "medium");
            opts.set("crf", "23");
            opts.set("threads", &num_cpus::get().to_string());

            let encoder = settings
                .open_as_with(codec, opts)
                .map_err(|e| LapseError::write_failure("open video encoder", e))?;
            ost.set_parameters(&encoder);
            encoder
        };

        octx.write_header()
            .map_err(|e| LapseError::write_failure("write container header", e))?;
        let ost_tb = octx
            .stream(0)
            .ok_or(ffmpeg::Error::StreamNotFound)?
            .time_base();

        seek_to_seconds(&mut ictx, range.start())?;

        let mut scaler: Option<scaling::Context> = None;
        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut frame_index: u64 = 0;
        let mut encoded: u64 = 0;
        let mut bytes_written: u64 = 0;
        let end = range.end();
        let mut reached_end = false;

        'demux: for (stream, packet) in ictx.packets() {
            ensure_active(tracker)?;
            if stream.index() != video_index {
                continue;
            }
            decoder
                .send_packet(&packet)
                .map_err(|e| LapseError::write_failure("decode frame", e))?;

            while decoder.receive_frame(&mut decoded).is_ok() {
                let Some(ts) = decoded.timestamp() else { continue };
                let t = pts_to_seconds(ts, in_tb);
                if t < range.start() {
                    // pre-roll frames between the seek keyframe and the
                    // selection start
                    continue;
                }
                if t >= end {
                    reached_end = true;
                    break 'demux;
                }

                let index = frame_index;
                frame_index += 1;
                if !dplan.should_encode(index) {
                    continue;
                }

                let mut frame = converted_frame(&mut scaler, &decoded)?;
                frame.set_pts(Some(encoded as i64));
                send_with_backpressure(
                    &mut encoder,
                    &frame,
                    &mut octx,
                    0,
                    frame_tb,
                    ost_tb,
                    tracker,
                    &mut bytes_written,
                )?;
                encoded += 1;
                tracker.advance(encoded);
            }
        }

        // Source exhausted before the out point: flush buffered frames.
        if !reached_end {
            decoder.send_eof().ok();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let Some(ts) = decoded.timestamp() else { continue };
                let t = pts_to_seconds(ts, in_tb);
                if t < range.start() || t >= end {
                    continue;
                }
                let index = frame_index;
                frame_index += 1;
                if !dplan.should_encode(index) {
                    continue;
                }
                let mut frame = converted_frame(&mut scaler, &decoded)?;
                frame.set_pts(Some(encoded as i64));
                send_with_backpressure(
                    &mut encoder,
                    &frame,
                    &mut octx,
                    0,
                    frame_tb,
                    ost_tb,
                    tracker,
                    &mut bytes_written,
                )?;
                encoded += 1;
                tracker.advance(encoded);
            }
        }

        tracker.set_phase(ExportPhase::Finalizing);
        encoder
            .send_eof()
            .map_err(|e| LapseError::write_failure("flush video encoder", e))?;
        drain_video_encoder(&mut encoder, &mut octx, 0, frame_tb, ost_tb, &mut bytes_written)?;
        octx.write_trailer()
            .map_err(|e| LapseError::write_failure("finalize output", e))?;

        debug!(
            decoded = frame_index,
            encoded,
            bytes = bytes_written,
            "decimation export finished"
        );
        tracker.finish();

        Ok(StrategyReport {
            frames_written: encoded,
            output_duration: encoded as f64 / dplan.output_fps as f64,
            bytes_written,
            warnings: Vec::new(),
        })
    }
}

/// Convert a decoded frame to the encoder's pixel format, building the scaler
/// on first use.
fn converted_frame(
    scaler: &mut Option<scaling::Context>,
    decoded: &ffmpeg::util::frame::Video,
) -> LapseResult<ffmpeg::util::frame::Video> {
    if decoded.format() == ffmpeg::format::Pixel::YUV420P {
        return Ok(decoded.clone());
    }

    if scaler.is_none() {
        *scaler = Some(scaling::Context::get(
            decoded.format(),
            decoded.width(),
            decoded.height(),
            ffmpeg::format::Pixel::YUV420P,
            decoded.width(),
            decoded.height(),
            scaling::Flags::BILINEAR,
        )?);
    }

    let mut converted = ffmpeg::util::frame::Video::empty();
    scaler
        .as_mut()
        .expect("scaler initialized above")
        .run(decoded, &mut converted)?;
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_rounds_the_speed() {
        assert_eq!(DecimationPlan::new(10.0, 25.0).interval, 10);
        assert_eq!(DecimationPlan::new(2.4, 25.0).interval, 2);
        assert_eq!(DecimationPlan::new(2.5, 25.0).interval, 3);
    }

    #[test]
    fn every_nth_frame_is_encoded() {
        let plan = DecimationPlan::new(10.0, 25.0);
        let encoded: Vec<u64> = (0..100).filter(|&i| plan.should_encode(i)).collect();
        assert_eq!(encoded, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }

    #[test]
    fn hundred_second_source_at_ten_x_yields_exactly_ten_seconds() {
        // 100s, 25fps, 10x: 2500 frames decoded, 250 encoded, 10.0s at 25fps
        let plan = DecimationPlan::new(10.0, 25.0);
        assert_eq!(plan.output_fps, 25);

        let encoded = (0..2500).filter(|&i| plan.should_encode(i)).count() as u64;
        assert_eq!(encoded, 250);
        assert_eq!(plan.estimated_output_frames(100.0, 25.0), 250);

        let output_duration = encoded as f64 / plan.output_fps as f64;
        assert!((output_duration - 10.0).abs() < 1e-9);
    }

    #[test]
    fn output_timestamps_have_constant_unit_spacing() {
        // PTS is the running encoded count in a 1/fps timebase: consecutive
        // retained frames always land exactly one tick apart.
        let plan = DecimationPlan::new(7.0, 30.0);
        let pts: Vec<i64> = (0..210)
            .filter(|&i| plan.should_encode(i))
            .enumerate()
            .map(|(count, _)| count as i64)
            .collect();
        for pair in pts.windows(2) {
            assert_eq!(pair[1] - pair[0], 1);
        }
    }

    #[test]
    fn estimate_never_hits_zero() {
        let plan = DecimationPlan::new(100.0, 25.0);
        assert_eq!(plan.estimated_output_frames(0.5, 25.0), 1);
    }
}
