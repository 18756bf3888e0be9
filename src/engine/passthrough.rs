//! Keyframe passthrough exporter
//!
//! Near-zero-cost fast path: compressed samples are read without decoding,
//! filtered down to independently-decodable keyframes spaced to approximate
//! the requested speed, and remuxed with rewritten timestamps. No decoder or
//! encoder is ever opened.
//!
//! The output frame rate is ultimately dictated by the source's keyframe
//! interval: the sieve only discards excess keyframes, it never synthesizes
//! missing ones. When the source interval is coarser than the wanted spacing
//! the export still succeeds but is flagged as choppier than requested.

use ffmpeg_next as ffmpeg;
use tracing::{debug, info, warn};

use crate::domain::rules::{ExportPlan, StrategyKind};
use crate::engine::progress::{ExportPhase, ProgressTracker};
use crate::engine::{
    best_video_stream_index, ensure_active, output_frame_rate, seek_to_seconds, StrategyReport,
    TimelapseStrategy,
};
use crate::error::{LapseError, LapseResult};
use crate::utils::time::pts_to_seconds;

/// Remux-only exporter for high speed multipliers.
pub struct PassthroughExporter;

impl PassthroughExporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PassthroughExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides which sync samples survive the remux.
///
/// A keyframe is retained only when its source presentation time is at least
/// `min_spacing` past the previously retained one; everything else (and every
/// non-keyframe, unconditionally) is dropped.
#[derive(Debug)]
struct KeyframeSieve {
    min_spacing: f64,
    first_retained: Option<f64>,
    last_retained: Option<f64>,
    keyframes_seen: u64,
    retained: u64,
}

impl KeyframeSieve {
    /// `min_spacing = speed / output_fps`: how far apart, in source time,
    /// retained keyframes must be to land one output frame apart after
    /// remapping.
    fn new(speed: f64, output_fps: i32) -> Self {
        Self {
            min_spacing: speed / output_fps as f64,
            first_retained: None,
            last_retained: None,
            keyframes_seen: 0,
            retained: 0,
        }
    }

    fn admit(&mut self, pts_seconds: f64, is_key: bool) -> bool {
        if !is_key {
            return false;
        }
        self.keyframes_seen += 1;
        if let Some(last) = self.last_retained {
            if pts_seconds - last < self.min_spacing {
                return false;
            }
        }
        if self.first_retained.is_none() {
            self.first_retained = Some(pts_seconds);
        }
        self.last_retained = Some(pts_seconds);
        self.retained += 1;
        true
    }

    fn retained(&self) -> u64 {
        self.retained
    }

    fn thinned(&self) -> u64 {
        self.keyframes_seen - self.retained
    }

    fn min_spacing(&self) -> f64 {
        self.min_spacing
    }

    /// Mean source-time spacing of the retained keyframes.
    fn achieved_spacing(&self) -> Option<f64> {
        match (self.first_retained, self.last_retained) {
            (Some(first), Some(last)) if self.retained >= 2 => {
                Some((last - first) / (self.retained - 1) as f64)
            }
            _ => None,
        }
    }
}

impl TimelapseStrategy for PassthroughExporter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Passthrough
    }

    fn run(&self, plan: &ExportPlan, tracker: &ProgressTracker) -> LapseResult<StrategyReport> {
        let job = &plan.job;
        let range = job.range;
        let speed = job.speed.get();
        let out_fps = output_frame_rate(job.asset.frame_rate);

        info!(
            input = %job.asset.path.display(),
            output = %plan.dest.display(),
            speed,
            out_fps,
            "starting keyframe passthrough export"
        );

        tracker.set_phase(ExportPhase::Exporting);
        tracker.set_total((range.duration() * 1000.0) as u64);

        let mut ictx = ffmpeg::format::input(&job.asset.path)?;
        let video_index = best_video_stream_index(&ictx, &job.asset.path)?;
        let in_tb = ictx
            .stream(video_index)
            .ok_or(ffmpeg::Error::StreamNotFound)?
            .time_base();

        let mut octx = ffmpeg::format::output(&plan.dest)
            .map_err(|e| LapseError::write_failure("create output container", e))?;
        {
            let ist = ictx
                .stream(video_index)
                .ok_or(ffmpeg::Error::StreamNotFound)?;
            let mut ost = octx
                .add_stream(ffmpeg::codec::encoder::find(ist.parameters().id()))
                .map_err(|e| LapseError::write_failure("add output stream", e))?;
            ost.set_parameters(ist.parameters());
            // The source container's codec tag may be invalid in MP4.
            unsafe {
                (*ost.parameters().as_mut_ptr()).codec_tag = 0;
            }
            ost.set_time_base(ffmpeg::Rational::new(1, out_fps));

            // keep phone-footage orientation hints
            if job.asset.rotation != 0.0 {
                let mut meta = ffmpeg::Dictionary::new();
                meta.set("rotate", &format!("{}", job.asset.rotation as i32));
                ost.set_metadata(meta);
            }
        }
        octx.write_header()
            .map_err(|e| LapseError::write_failure("write container header", e))?;
        let ost_tb = octx
            .stream(0)
            .ok_or(ffmpeg::Error::StreamNotFound)?
            .time_base();
        let frame_tb = ffmpeg::Rational::new(1, out_fps);

        seek_to_seconds(&mut ictx, range.start())?;

        let mut sieve = KeyframeSieve::new(speed, out_fps);
        let mut bytes_written = 0u64;
        let end = range.end();

        for (stream, mut packet) in ictx.packets() {
            ensure_active(tracker)?;
            if stream.index() != video_index {
                continue;
            }
            let Some(pts) = packet.pts() else { continue };
            let t = pts_to_seconds(pts, in_tb);
            if t < range.start() {
                continue;
            }
            if t >= end {
                break;
            }
            tracker.advance(((t - range.start()) * 1000.0) as u64);

            if !sieve.admit(t, packet.is_key()) {
                continue;
            }

            // Output timestamps come from the retained count, not source
            // time: strictly monotonic with constant 1/out_fps spacing.
            let index = (sieve.retained() - 1) as i64;
            packet.set_stream(0);
            packet.set_pts(Some(index));
            packet.set_dts(Some(index));
            packet.rescale_ts(frame_tb, ost_tb);
            bytes_written += packet.size() as u64;
            packet
                .write_interleaved(&mut octx)
                .map_err(|e| LapseError::write_failure("write sample", e))?;
        }

        if sieve.retained() == 0 {
            // An empty remux is a failure, not a silent near-empty file.
            return Err(LapseError::MissingKeyframes);
        }

        tracker.set_phase(ExportPhase::Finalizing);
        octx.write_trailer()
            .map_err(|e| LapseError::write_failure("finalize output", e))?;

        let frames_written = sieve.retained();
        let output_duration = frames_written as f64 / out_fps as f64;

        let mut warnings = Vec::new();
        if let Some(actual) = sieve.achieved_spacing() {
            if sieve.thinned() == 0 && actual > sieve.min_spacing() * 1.05 {
                let message = format!(
                    "source keyframe interval (~{actual:.2}s) is coarser than the {:.2}s \
                     needed for {speed}x; output is choppier than requested",
                    sieve.min_spacing()
                );
                warn!("{message}");
                warnings.push(message);
            }
        }

        debug!(
            retained = frames_written,
            thinned = sieve.thinned(),
            bytes = bytes_written,
            "passthrough remux finished"
        );
        tracker.finish();

        Ok(StrategyReport {
            frames_written,
            output_duration,
            bytes_written,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sieve_discards_non_keyframes_unconditionally() {
        let mut sieve = KeyframeSieve::new(20.0, 30);
        assert!(!sieve.admit(0.0, false));
        assert!(!sieve.admit(100.0, false));
        assert_eq!(sieve.retained(), 0);
    }

    #[test]
    fn sieve_thins_keyframes_denser_than_min_spacing() {
        // keyframes every 0.5s, wanted spacing 20/30 = 0.667s
        let mut sieve = KeyframeSieve::new(20.0, 30);
        let mut admitted = Vec::new();
        for i in 0..20 {
            let t = i as f64 * 0.5;
            if sieve.admit(t, true) {
                admitted.push(t);
            }
        }
        assert!(sieve.thinned() > 0);
        // every retained pair is at least min_spacing apart
        for pair in admitted.windows(2) {
            assert!(pair[1] - pair[0] >= sieve.min_spacing());
        }
    }

    #[test]
    fn coarse_keyframe_interval_retains_everything() {
        // 3600s source, 30fps, keyframes every 2s, 20x speed.
        // min spacing = 0.667s < 2s, so every keyframe survives:
        // 1800 retained frames, 60s of output at 30fps.
        let mut sieve = KeyframeSieve::new(20.0, 30);
        let mut count = 0u64;
        let mut t = 0.0;
        while t < 3600.0 {
            if sieve.admit(t, true) {
                count += 1;
            }
            t += 2.0;
        }
        assert_eq!(count, 1800);
        assert_eq!(sieve.retained(), 1800);
        assert_eq!(sieve.thinned(), 0);

        let output_duration = sieve.retained() as f64 / 30.0;
        assert!((output_duration - 60.0).abs() < 1e-9);

        // achieved spacing reflects the 2s source interval, which is what
        // the choppiness warning keys off
        let achieved = sieve.achieved_spacing().unwrap();
        assert!((achieved - 2.0).abs() < 1e-9);
        assert!(achieved > sieve.min_spacing() * 1.05);
    }

    #[test]
    fn output_indices_are_strictly_increasing_with_unit_spacing() {
        let mut sieve = KeyframeSieve::new(10.0, 30);
        let mut indices = Vec::new();
        for i in 0..100 {
            if sieve.admit(i as f64, true) {
                indices.push((sieve.retained() - 1) as i64);
            }
        }
        for pair in indices.windows(2) {
            assert_eq!(pair[1] - pair[0], 1);
        }
    }
}
