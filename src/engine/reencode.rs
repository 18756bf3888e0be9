//! Full re-encode exporter
//!
//! The full-fidelity path: every frame in the selection is decoded, scaled to
//! the requested resolution preset, and re-encoded with its timestamp divided
//! by the speed multiplier. This is a pure linear re-timing: no frames are
//! dropped here, and the encoder's rate control decides the delivered frame
//! count.
//!
//! Audio, when included, gets the "fast-forward" treatment: PCM is resampled
//! from the source rate down to rate/speed and the result is encoded at the
//! source rate, so the track plays `speed` times faster with correspondingly
//! raised pitch. A pitch-preserving stretch would cost far more and is not
//! what a timelapse wants.

use ffmpeg_next as ffmpeg;
use ffmpeg::software::{resampling, scaling};
use ffmpeg::util::channel_layout::ChannelLayout;
use tracing::{debug, info, warn};

use crate::domain::model::{QualityTier, ResolutionPreset};
use crate::domain::rules::{ExportPlan, StrategyKind};
use crate::engine::progress::{ExportPhase, ProgressTracker};
use crate::engine::{
    best_video_stream_index, drain_video_encoder, ensure_active, seek_to_seconds,
    send_with_backpressure, StrategyReport, TimelapseStrategy,
};
use crate::error::{LapseError, LapseResult};
use crate::utils::time::pts_to_seconds;

/// Output video timebase denominator (MP4/MOV convention).
const VIDEO_TB_DEN: i32 = 90_000;

/// AAC output bitrate for both tiers.
const AUDIO_BIT_RATE: usize = 128_000;

/// Fallback AAC frame size when the encoder does not report one.
const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;

/// Decode/scale/encode exporter with uniform time compression.
pub struct ReencodeExporter;

impl ReencodeExporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReencodeExporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoder pixel format per quality tier.
fn pixel_format(tier: QualityTier) -> ffmpeg::format::Pixel {
    match tier {
        QualityTier::Efficient => ffmpeg::format::Pixel::YUV420P,
        QualityTier::Fidelity => ffmpeg::format::Pixel::YUV422P10LE,
    }
}

/// Video encoder per quality tier: H.264 for delivery, ProRes for editing.
fn video_codec(tier: QualityTier) -> LapseResult<ffmpeg::Codec> {
    let codec = match tier {
        QualityTier::Efficient => ffmpeg::codec::encoder::find(ffmpeg::codec::Id::H264),
        QualityTier::Fidelity => ffmpeg::codec::encoder::find_by_name("prores_ks")
            .or_else(|| ffmpeg::codec::encoder::find(ffmpeg::codec::Id::PRORES)),
    };
    codec.ok_or_else(|| LapseError::EncodeOrWrite {
        message: format!("no {tier:?}-tier video encoder available in this FFmpeg build"),
    })
}

fn encoder_options(tier: QualityTier) -> ffmpeg::Dictionary<'static> {
    let mut opts = ffmpeg::Dictionary::new();
    match tier {
        QualityTier::Efficient => {
            opts.set("preset", "medium");
            opts.set("crf", "20");
        }
        QualityTier::Fidelity => {
            // ProRes 422 Standard
            opts.set("profile", "2");
        }
    }
    opts.set("threads", &num_cpus::get().to_string());
    opts
}

/// Fit the source dimensions into the preset's box, preserving aspect ratio.
/// Dimensions are rounded down to even values for chroma subsampling; sources
/// smaller than the box are not upscaled.
fn target_dimensions(width: u32, height: u32, preset: ResolutionPreset) -> (u32, u32) {
    let even = |v: u32| (v.max(2)) & !1;
    match preset.target_box() {
        None => (even(width), even(height)),
        Some((box_w, box_h)) => {
            let scale = (box_w as f64 / width as f64)
                .min(box_h as f64 / height as f64)
                .min(1.0);
            (
                even((width as f64 * scale).round() as u32),
                even((height as f64 * scale).round() as u32),
            )
        }
    }
}

/// Everything needed to drive the speed-shifted audio track.
struct AudioPipeline {
    stream_index: usize,
    in_tb: ffmpeg::Rational,
    decoder: ffmpeg::decoder::Audio,
    resampler: resampling::Context,
    encoder: ffmpeg::encoder::audio::Encoder,
    /// Planar FLTP stereo sample buffer; the AAC encoder needs fixed-size
    /// frames while the resampler emits arbitrary chunk sizes.
    fifo_left: Vec<f32>,
    fifo_right: Vec<f32>,
    frame_size: usize,
    sample_rate: u32,
    resample_rate: u32,
    next_pts: i64,
    audio_tb: ffmpeg::Rational,
    ost_tb: ffmpeg::Rational,
    ost_index: usize,
    bytes_written: u64,
}

impl AudioPipeline {
    const TARGET_FORMAT: ffmpeg::format::Sample =
        ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar);

    /// Create the decoder/resampler/encoder chain and register the output
    /// stream. Must run before `write_header`.
    fn create(
        ictx: &ffmpeg::format::context::Input,
        octx: &mut ffmpeg::format::context::Output,
        speed: f64,
    ) -> LapseResult<Option<Self>> {
        let Some(stream) = ictx.streams().best(ffmpeg::media::Type::Audio) else {
            return Ok(None);
        };
        let stream_index = stream.index();
        let in_tb = stream.time_base();

        let mut decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .audio()?;
        // Sources without a declared layout get the default for their
        // channel count, or swr misreads the planes.
        if decoder.channel_layout().is_empty() {
            decoder.set_channel_layout(ChannelLayout::default(decoder.channels() as i32));
        }

        let sample_rate = decoder.rate();
        // rate/speed input samples per output second is what makes the audio
        // play `speed` times faster once labelled at the source rate.
        let resample_rate = ((sample_rate as f64 / speed).round() as u32).max(1);

        let resampler = resampling::Context::get(
            decoder.format(),
            decoder.channel_layout(),
            sample_rate,
            Self::TARGET_FORMAT,
            ChannelLayout::STEREO,
            resample_rate,
        )?;

        let codec = ffmpeg::codec::encoder::find(ffmpeg::codec::Id::AAC).ok_or_else(|| {
            LapseError::EncodeOrWrite {
                message: "no AAC encoder available in this FFmpeg build".to_string(),
            }
        })?;

        let (encoder, ost_index, ost_tb) = {
            let mut ost = octx
                .add_stream(codec)
                .map_err(|e| LapseError::write_failure("add audio stream", e))?;

            let mut settings = ffmpeg::codec::context::Context::new().encoder().audio()?;
            settings.set_rate(sample_rate as i32);
            settings.set_format(Self::TARGET_FORMAT);
            settings.set_channel_layout(ChannelLayout::STEREO);
            settings.set_bit_rate(AUDIO_BIT_RATE);
            settings.set_time_base(ffmpeg::Rational::new(1, sample_rate as i32));

            let encoder = settings
                .open_as(codec)
                .map_err(|e| LapseError::write_failure("open audio encoder", e))?;
            ost.set_parameters(&encoder);
            let index = ost.index();
            let tb = ost.time_base();
            (encoder, index, tb)
        };

        let frame_size = match encoder.frame_size() {
            0 => DEFAULT_AUDIO_FRAME_SIZE,
            n => n as usize,
        };

        Ok(Some(Self {
            stream_index,
            in_tb,
            decoder,
            resampler,
            encoder,
            fifo_left: Vec::new(),
            fifo_right: Vec::new(),
            frame_size,
            sample_rate,
            resample_rate,
            next_pts: 0,
            audio_tb: ffmpeg::Rational::new(1, sample_rate as i32),
            ost_tb,
            ost_index,
            bytes_written: 0,
        }))
    }

    /// Re-read the muxer-assigned timebase; `write_header` may change it.
    fn refresh_ost_tb(&mut self, octx: &ffmpeg::format::context::Output) {
        if let Some(stream) = octx.stream(self.ost_index) {
            self.ost_tb = stream.time_base();
        }
    }

    /// Decode, resample and encode one in-range audio packet.
    fn handle_packet(
        &mut self,
        packet: &ffmpeg::Packet,
        start: f64,
        end: f64,
        octx: &mut ffmpeg::format::context::Output,
    ) -> LapseResult<()> {
        if let Some(pts) = packet.pts() {
            let t = pts_to_seconds(pts, self.in_tb);
            if t < start || t >= end {
                return Ok(());
            }
        }

        // A bad audio packet should not abort the whole export.
        if self.decoder.send_packet(packet).is_err() {
            return Ok(());
        }

        let mut decoded = ffmpeg::util::frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut resampled = self.allocate_output(decoded.samples());
            self.resampler.run(&decoded, &mut resampled)?;
            if resampled.samples() > 0 {
                self.push_fifo(&resampled);
            }
            self.drain_fifo(octx, false)?;
        }
        Ok(())
    }

    /// Flush the resampler and encoder; zero-pads the FIFO tail so no PCM is
    /// lost.
    fn finish(&mut self, octx: &mut ffmpeg::format::context::Output) -> LapseResult<()> {
        self.decoder.send_eof().ok();
        let mut decoded = ffmpeg::util::frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut resampled = self.allocate_output(decoded.samples());
            self.resampler.run(&decoded, &mut resampled)?;
            if resampled.samples() > 0 {
                self.push_fifo(&resampled);
            }
        }

        let mut tail = self.allocate_output(self.frame_size);
        if self.resampler.flush(&mut tail).is_ok() && tail.samples() > 0 {
            self.push_fifo(&tail);
        }

        self.drain_fifo(octx, true)?;
        self.encoder
            .send_eof()
            .map_err(|e| LapseError::write_failure("flush audio encoder", e))?;
        self.drain_packets(octx)
    }

    /// Pre-sized FLTP stereo output frame for the resampler.
    fn allocate_output(&self, input_samples: usize) -> ffmpeg::util::frame::Audio {
        let estimate = (input_samples as f64 * self.resample_rate as f64
            / self.sample_rate as f64)
            .ceil() as usize
            + 64;
        let mut frame = ffmpeg::util::frame::Audio::new(
            Self::TARGET_FORMAT,
            estimate.max(64),
            ChannelLayout::STEREO,
        );
        frame.set_rate(self.resample_rate);
        frame
    }

    fn push_fifo(&mut self, frame: &ffmpeg::util::frame::Audio) {
        let n = frame.samples();
        self.fifo_left.extend_from_slice(&frame.plane::<f32>(0)[..n]);
        self.fifo_right.extend_from_slice(&frame.plane::<f32>(1)[..n]);
    }

    fn drain_fifo(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
        flush: bool,
    ) -> LapseResult<()> {
        while self.fifo_left.len() >= self.frame_size || (flush && !self.fifo_left.is_empty()) {
            let frame = self.pop_frame();
            self.encoder
                .send_frame(&frame)
                .map_err(|e| LapseError::write_failure("send audio frame to encoder", e))?;
            self.drain_packets(octx)?;
        }
        Ok(())
    }

    /// Pop one encoder-sized frame; the final partial frame is zero-padded.
    fn pop_frame(&mut self) -> ffmpeg::util::frame::Audio {
        let n = self.frame_size;
        let available = self.fifo_left.len().min(n);

        let mut frame =
            ffmpeg::util::frame::Audio::new(Self::TARGET_FORMAT, n, ChannelLayout::STEREO);
        frame.set_rate(self.sample_rate);
        frame.set_pts(Some(self.next_pts));
        self.next_pts += n as i64;

        {
            let left = frame.plane_mut::<f32>(0);
            left[..available].copy_from_slice(&self.fifo_left[..available]);
            left[available..n].fill(0.0);
        }
        {
            let right = frame.plane_mut::<f32>(1);
            right[..available].copy_from_slice(&self.fifo_right[..available]);
            right[available..n].fill(0.0);
        }

        self.fifo_left.drain(..available);
        self.fifo_right.drain(..available);
        frame
    }

    fn drain_packets(&mut self, octx: &mut ffmpeg::format::context::Output) -> LapseResult<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.ost_index);
            packet.rescale_ts(self.audio_tb, self.ost_tb);
            self.bytes_written += packet.size() as u64;
            packet
                .write_interleaved(octx)
                .map_err(|e| LapseError::write_failure("write audio packet", e))?;
        }
        Ok(())
    }
}

impl TimelapseStrategy for ReencodeExporter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Reencode
    }

    fn run(&self, plan: &ExportPlan, tracker: &ProgressTracker) -> LapseResult<StrategyReport> {
        let job = &plan.job;
        let range = job.range;
        let speed = job.speed.get();
        let tier = plan.effective.quality;

        info!(
            input = %job.asset.path.display(),
            output = %plan.dest.display(),
            speed,
            ?tier,
            "starting full re-encode export"
        );

        tracker.set_phase(ExportPhase::Exporting);
        tracker.set_total((range.duration() * 1000.0) as u64);

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

        let (out_w, out_h) =
            target_dimensions(decoder.width(), decoder.height(), plan.effective.resolution);
        let out_format = pixel_format(tier);
        let codec = video_codec(tier)?;

        let frame_tb = ffmpeg::Rational::new(1, VIDEO_TB_DEN);
        let fps_hint = job.asset.frame_rate.round().max(1.0) as i32;

        let mut octx = ffmpeg::format::output(&plan.dest)
            .map_err(|e| LapseError::write_failure("create output container", e))?;

        let mut encoder = {
            let mut ost = octx
                .add_stream(codec)
                .map_err(|e| LapseError::write_failure("add output stream", e))?;

            let mut settings = ffmpeg::codec::context::Context::new().encoder().video()?;
            settings.set_width(out_w);
            settings.set_height(out_h);
            settings.set_format(out_format);
            settings.set_time_base(frame_tb);
            settings.set_frame_rate(Some(ffmpeg::Rational::new(fps_hint, 1)));
            settings.set_aspect_ratio(decoder.aspect_ratio());

            let encoder = settings
                .open_as_with(codec, encoder_options(tier))
                .map_err(|e| LapseError::write_failure("open video encoder", e))?;
            ost.set_parameters(&encoder);

            // keep phone-footage orientation hints
            if job.asset.rotation != 0.0 {
                let mut meta = ffmpeg::Dictionary::new();
                meta.set("rotate", &format!("{}", job.asset.rotation as i32));
                ost.set_metadata(meta);
            }
            encoder
        };

        let want_audio = plan.effective.include_audio && job.asset.has_audio;
        let mut audio = if want_audio {
            let pipeline = AudioPipeline::create(&ictx, &mut octx, speed)?;
            if pipeline.is_none() {
                warn!("audio requested but no decodable audio track found; exporting video only");
            }
            pipeline
        } else {
            None
        };

        octx.write_header()
            .map_err(|e| LapseError::write_failure("write container header", e))?;
        let ost_tb = octx
            .stream(0)
            .ok_or(ffmpeg::Error::StreamNotFound)?
            .time_base();
        if let Some(a) = audio.as_mut() {
            a.refresh_ost_tb(&octx);
        }

        seek_to_seconds(&mut ictx, range.start())?;

        let mut scaler: Option<scaling::Context> = None;
        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut frames_written: u64 = 0;
        let mut bytes_written: u64 = 0;
        let mut last_pts: i64 = -1;
        let end = range.end();
        let mut reached_end = false;

        'demux: for (stream, packet) in ictx.packets() {
            ensure_active(tracker)?;
            let sidx = stream.index();

            if sidx == video_index {
                decoder
                    .send_packet(&packet)
                    .map_err(|e| LapseError::write_failure("decode frame", e))?;

                while decoder.receive_frame(&mut decoded).is_ok() {
                    let Some(ts) = decoded.timestamp() else { continue };
                    let t = pts_to_seconds(ts, in_tb);
                    if t < range.start() {
                        continue;
                    }
                    if t >= end {
                        reached_end = true;
                        break 'demux;
                    }

                    let mut frame =
                        scaled_frame(&mut scaler, &decoded, out_w, out_h, out_format)?;

                    // Linear re-timing: t maps to (t - start) / speed. The
                    // monotonic clamp absorbs rounding collisions so the
                    // container never sees equal timestamps.
                    let mut pts =
                        ((t - range.start()) / speed * VIDEO_TB_DEN as f64).round() as i64;
                    if pts <= last_pts {
                        pts = last_pts + 1;
                    }
                    last_pts = pts;
                    frame.set_pts(Some(pts));

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
                    frames_written += 1;
                    tracker.advance(((t - range.start()) * 1000.0) as u64);
                }
            } else if audio
                .as_ref()
                .map(|a| a.stream_index == sidx)
                .unwrap_or(false)
            {
                if let Some(a) = audio.as_mut() {
                    a.handle_packet(&packet, range.start(), end, &mut octx)?;
                }
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
                let mut frame = scaled_frame(&mut scaler, &decoded, out_w, out_h, out_format)?;
                let mut pts = ((t - range.start()) / speed * VIDEO_TB_DEN as f64).round() as i64;
                if pts <= last_pts {
                    pts = last_pts + 1;
                }
                last_pts = pts;
                frame.set_pts(Some(pts));
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
                frames_written += 1;
            }
        }

        tracker.set_phase(ExportPhase::Finalizing);
        encoder
            .send_eof()
            .map_err(|e| LapseError::write_failure("flush video encoder", e))?;
        drain_video_encoder(&mut encoder, &mut octx, 0, frame_tb, ost_tb, &mut bytes_written)?;

        if let Some(a) = audio.as_mut() {
            a.finish(&mut octx)?;
            bytes_written += a.bytes_written;
        }

        octx.write_trailer()
            .map_err(|e| LapseError::write_failure("finalize output", e))?;

        let output_duration = range.duration() / speed;
        debug!(
            frames = frames_written,
            bytes = bytes_written,
            output_duration,
            "re-encode export finished"
        );
        tracker.finish();

        Ok(StrategyReport {
            frames_written,
            output_duration,
            bytes_written,
            warnings: Vec::new(),
        })
    }
}

/// Scale/convert a decoded frame for the encoder, building the scaler on
/// first use.
fn scaled_frame(
    scaler: &mut Option<scaling::Context>,
    decoded: &ffmpeg::util::frame::Video,
    out_w: u32,
    out_h: u32,
    out_format: ffmpeg::format::Pixel,
) -> LapseResult<ffmpeg::util::frame::Video> {
    if decoded.format() == out_format && decoded.width() == out_w && decoded.height() == out_h {
        return Ok(decoded.clone());
    }

    if scaler.is_none() {
        *scaler = Some(scaling::Context::get(
            decoded.format(),
            decoded.width(),
            decoded.height(),
            out_format,
            out_w,
            out_h,
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
    fn target_dimensions_match_source_stays_put() {
        assert_eq!(
            target_dimensions(1920, 1080, ResolutionPreset::Source),
            (1920, 1080)
        );
        // odd dimensions are trimmed to even
        assert_eq!(
            target_dimensions(1921, 1081, ResolutionPreset::Source),
            (1920, 1080)
        );
    }

    #[test]
    fn target_dimensions_downscale_preserving_aspect() {
        assert_eq!(
            target_dimensions(3840, 2160, ResolutionPreset::Hd1080),
            (1920, 1080)
        );
        // portrait 4K into the 1080p box is height-limited
        let (w, h) = target_dimensions(2160, 3840, ResolutionPreset::Hd1080);
        assert_eq!(h, 1080);
        assert!((w as f64 / h as f64 - 2160.0 / 3840.0).abs() < 0.01);
    }

    #[test]
    fn target_dimensions_never_upscale() {
        assert_eq!(
            target_dimensions(1280, 720, ResolutionPreset::Uhd4k),
            (1280, 720)
        );
    }

    #[test]
    fn retimed_pts_divides_by_speed() {
        // 5x: a frame 10s into the selection lands at 2s of output time
        let speed = 5.0;
        let pts = ((10.0 / speed) * VIDEO_TB_DEN as f64).round() as i64;
        assert_eq!(pts, 2 * VIDEO_TB_DEN as i64);
    }

    #[test]
    fn resample_rate_shrinks_by_speed() {
        // the pitch-shifting resample: 48kHz at 4x feeds 12k samples per
        // output second, played back at 48kHz
        let rate = ((48_000_f64 / 4.0).round() as u32).max(1);
        assert_eq!(rate, 12_000);
    }
}
