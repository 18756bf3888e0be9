//! Command execution

use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use tracing::warn;

use crate::cli::{ExportArgs, InspectArgs};
use crate::config::LapseConfig;
use crate::domain::model::{ExportJob, ExportSettings};
use crate::domain::rules::resolve_plan;
use crate::probe;
use crate::session::{ExportSession, ExportState};
use crate::utils::path::default_output_path;
use crate::utils::time::{format_hms, parse_timecode};

/// Progress render cadence while an export is running.
const PROGRESS_TICK: Duration = Duration::from_millis(100);

const PROGRESS_BAR_LEN: usize = 24;

/// Run one export job to completion, rendering progress as we go.
pub fn execute_export(args: ExportArgs, config: &LapseConfig, json: bool) -> Result<()> {
    crate::init()?;

    let asset = probe::probe(&args.input)?;

    let settings = ExportSettings {
        quality: args.quality.or(config.quality).unwrap_or_default(),
        resolution: args.resolution.or(config.resolution).unwrap_or_default(),
        include_audio: if args.no_audio {
            false
        } else {
            config.include_audio.unwrap_or(true)
        },
    };

    let trim_in = args
        .trim_in
        .as_deref()
        .map(parse_timecode)
        .transpose()
        .context("invalid --trim-in")?;
    let trim_out = args
        .trim_out
        .as_deref()
        .map(parse_timecode)
        .transpose()
        .context("invalid --trim-out")?;

    let dest = args.output.clone().unwrap_or_else(|| {
        default_output_path(
            &args.input,
            args.speed,
            settings.quality.container_extension(),
            config.output_dir.as_deref(),
        )
    });

    let job = ExportJob::new(asset, args.speed, settings, dest, trim_in, trim_out)?;
    let policy = config.strategy_policy.unwrap_or_default();
    let plan = resolve_plan(job, args.strategy.requested(), policy);

    for warning in &plan.warnings {
        warn!("{warning}");
    }

    // The session deletes whatever sits at the destination; make the caller
    // opt in before anything is lost.
    let overwrite = args.overwrite || config.overwrite.unwrap_or(false);
    if plan.dest.exists() && !overwrite {
        bail!(
            "output file {} already exists (pass --overwrite to replace it)",
            plan.dest.display()
        );
    }

    if json {
        emit_json(&serde_json::json!({
            "event": "start",
            "input": plan.job.asset.path,
            "output": plan.dest,
            "speed": plan.job.speed.get(),
            "strategy": plan.strategy,
        }));
    } else {
        println!(
            "Exporting {} at {}x -> {}",
            plan.job.asset.path.display(),
            plan.job.speed.get(),
            plan.dest.display()
        );
    }

    let session = ExportSession::new(plan);
    let events = session.events();
    session.start()?;

    let final_state = loop {
        match events.recv_timeout(PROGRESS_TICK) {
            Ok(state) if state.is_terminal() => break state,
            Ok(state) => {
                if json {
                    emit_json(&serde_json::json!({ "event": "state", "value": state }));
                }
            }
            Err(RecvTimeoutError::Timeout) => render_progress(&session, json),
            Err(RecvTimeoutError::Disconnected) => break session.wait(),
        }
    };
    session.wait();

    match final_state {
        ExportState::Completed { path } => {
            if json {
                emit_json(&serde_json::json!({
                    "event": "complete",
                    "path": path,
                    "elapsed_s": session.elapsed().as_secs_f64(),
                }));
            } else {
                // clear the progress line before the summary
                println!();
                println!(
                    "Done in {} -> {}",
                    format_hms(session.elapsed().as_secs_f64()),
                    path.display()
                );
            }
            Ok(())
        }
        ExportState::Cancelled => {
            if json {
                emit_json(&serde_json::json!({ "event": "cancelled" }));
            } else {
                println!();
                println!("Export cancelled");
            }
            Ok(())
        }
        ExportState::Failed { reason } => {
            if json {
                emit_json(&serde_json::json!({ "event": "error", "reason": reason }));
            }
            bail!("export failed: {reason}");
        }
        other => bail!("export ended in unexpected state: {other:?}"),
    }
}

/// Probe a file and print its properties.
pub fn execute_inspect(args: InspectArgs, json: bool) -> Result<()> {
    crate::init()?;

    let asset = probe::probe(&args.input)?;
    let keyframes = if args.keyframes {
        Some(probe::keyframes::scan_keyframes(&args.input)?)
    } else {
        None
    };

    if json {
        emit_json(&serde_json::json!({
            "asset": asset,
            "keyframes": keyframes.as_ref().map(|k| &k.summary),
        }));
        return Ok(());
    }

    println!("File:       {}", asset.path.display());
    println!("Duration:   {}", format_hms(asset.duration));
    println!("Video:      {} {}x{}", asset.video_codec, asset.width, asset.height);
    println!("Frame rate: {:.3} fps", asset.frame_rate);
    if asset.rotation != 0.0 {
        println!("Rotation:   {} deg", asset.rotation);
    }
    println!("Audio:      {}", if asset.has_audio { "yes" } else { "no" });
    println!("Size:       {} bytes", asset.file_size);

    if let Some(scan) = keyframes {
        match scan.summary {
            Some(summary) => {
                println!(
                    "Keyframes:  {} found, interval {:.2}s mean ({:.2}s min, {:.2}s max)",
                    summary.keyframe_count,
                    summary.mean_interval,
                    summary.min_interval,
                    summary.max_interval
                );
            }
            None => println!("Keyframes:  fewer than two found"),
        }
    }

    Ok(())
}

fn render_progress(session: &ExportSession, json: bool) {
    let snapshot = session.progress_snapshot();
    if json {
        emit_json(&serde_json::json!({ "event": "progress", "value": snapshot }));
        return;
    }

    let filled = (snapshot.fraction * PROGRESS_BAR_LEN as f64) as usize;
    let bar = "\u{2588}".repeat(filled) + &"\u{2591}".repeat(PROGRESS_BAR_LEN - filled);
    let eta = snapshot
        .eta_seconds
        .map(|s| format!(" eta {}", format_hms(s)))
        .unwrap_or_default();
    print!(
        "\r[{}] {:>5.1}%{}",
        bar,
        snapshot.fraction * 100.0,
        eta
    );
    let _ = std::io::stdout().flush();
}

fn emit_json(value: &serde_json::Value) {
    let mut event = value.clone();
    if let Some(map) = event.as_object_mut() {
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    println!("{event}");
}
