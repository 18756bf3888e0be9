//! Export session - one job, one state machine, one worker thread
//!
//! The session owns the lifecycle of a single export: disk-space preflight,
//! strategy selection, the worker thread the strategy runs on, cancellation
//! propagation, and the terminal-state cleanup that guarantees no partial
//! file survives a failed or cancelled export.
//!
//! State is an explicit value (`ExportState`) observed two ways: a polled
//! snapshot (`state()`, `fraction_complete()`, ...) and a bounded channel of
//! state transitions. Progress itself is polled from the shared tracker; the
//! channel only carries transitions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::rules::ExportPlan;
use crate::engine::progress::{ProgressSnapshot, ProgressTracker};
use crate::engine::{build_strategy, StrategyReport, TimelapseStrategy};
use crate::error::{LapseError, LapseResult};
use crate::utils::disk::{destination_dir, SpaceProbe, VolumeSpaceProbe};

/// The preflight requires this much headroom over the estimated output size.
pub const DISK_SAFETY_MARGIN: f64 = 1.1;

/// State-transition events are few; this never fills in practice.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle of one export job.
///
/// `Completed`, `Failed` and `Cancelled` are final; a session is not
/// reusable after leaving `Idle`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExportState {
    Idle,
    Preparing,
    Exporting { progress: f64 },
    Completed { path: PathBuf },
    Failed { reason: String },
    Cancelled,
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportState::Completed { .. } | ExportState::Failed { .. } | ExportState::Cancelled
        )
    }
}

/// Drives one export job to a terminal state.
pub struct ExportSession {
    plan: ExportPlan,
    state: Arc<Mutex<ExportState>>,
    tracker: ProgressTracker,
    events_tx: Sender<ExportState>,
    events_rx: Receiver<ExportState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    space_probe: Arc<dyn SpaceProbe>,
    strategy_override: Mutex<Option<Box<dyn TimelapseStrategy>>>,
}

impl ExportSession {
    pub fn new(plan: ExportPlan) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        Self {
            plan,
            state: Arc::new(Mutex::new(ExportState::Idle)),
            tracker: ProgressTracker::new(),
            events_tx,
            events_rx,
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
            space_probe: Arc::new(VolumeSpaceProbe),
            strategy_override: Mutex::new(None),
        }
    }

    /// Substitute the disk-space source (tests).
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = probe;
        self
    }

    /// Substitute the exporter the worker will run (tests, experiments).
    pub fn with_strategy(self, strategy: Box<dyn TimelapseStrategy>) -> Self {
        *self.strategy_override.lock().unwrap() = Some(strategy);
        self
    }

    pub fn plan(&self) -> &ExportPlan {
        &self.plan
    }

    /// Receiver of state transitions, in order.
    pub fn events(&self) -> Receiver<ExportState> {
        self.events_rx.clone()
    }

    /// Current state; `Exporting` carries live progress.
    pub fn state(&self) -> ExportState {
        let state = self.state.lock().unwrap().clone();
        match state {
            ExportState::Exporting { .. } => ExportState::Exporting {
                progress: self.tracker.fraction(),
            },
            other => other,
        }
    }

    pub fn fraction_complete(&self) -> f64 {
        self.tracker.fraction()
    }

    pub fn elapsed(&self) -> Duration {
        self.tracker.elapsed()
    }

    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.tracker.estimated_remaining()
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    /// Begin the export. Valid only once, from `Idle`.
    ///
    /// The worker thread performs the preflight, deletes any pre-existing
    /// file at the destination, runs the selected strategy, and settles the
    /// terminal state. Errors after this point surface through `state()`.
    pub fn start(&self) -> LapseResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LapseError::AlreadyStarted);
        }

        let plan = self.plan.clone();
        let tracker = self.tracker.clone();
        let state = Arc::clone(&self.state);
        let events = self.events_tx.clone();
        let space_probe = Arc::clone(&self.space_probe);
        let strategy = self
            .strategy_override
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| build_strategy(plan.strategy));

        transition(&state, &events, ExportState::Preparing);

        let handle = std::thread::Builder::new()
            .name("lapse-export".to_string())
            .spawn(move || {
                let result = run_job(&plan, &tracker, &state, &events, space_probe, strategy);
                settle(&plan, &state, &events, result);
            })?;

        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Request cooperative cancellation.
    ///
    /// Valid from `Preparing`/`Exporting`; a no-op anywhere else, including
    /// repeated calls after a terminal state.
    pub fn cancel(&self) {
        let current = self.state.lock().unwrap().clone();
        match current {
            ExportState::Preparing | ExportState::Exporting { .. } => {
                info!("cancellation requested");
                self.tracker.cancel();
            }
            _ => {}
        }
    }

    /// Block until the worker settles, returning the terminal state.
    pub fn wait(&self) -> ExportState {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.state()
    }
}

/// Estimated output size from input size, selection fraction, speed, and the
/// quality tier's typical compression ratio.
pub fn estimated_output_bytes(plan: &ExportPlan) -> u64 {
    let job = &plan.job;
    let fraction = job.asset.fraction_of(&job.range);
    let estimate =
        job.asset.file_size as f64 * fraction / job.speed.get() * plan.effective.quality.size_ratio();
    estimate.ceil() as u64
}

fn transition(
    state: &Arc<Mutex<ExportState>>,
    events: &Sender<ExportState>,
    next: ExportState,
) {
    debug!(?next, "session state transition");
    *state.lock().unwrap() = next.clone();
    let _ = events.try_send(next);
}

/// Preflight + strategy execution, on the worker thread.
fn run_job(
    plan: &ExportPlan,
    tracker: &ProgressTracker,
    state: &Arc<Mutex<ExportState>>,
    events: &Sender<ExportState>,
    space_probe: Arc<dyn SpaceProbe>,
    strategy: Box<dyn TimelapseStrategy>,
) -> LapseResult<StrategyReport> {
    preflight_disk_space(plan, space_probe.as_ref())?;

    // The destination is exclusively ours for the duration of the job.
    remove_output(&plan.dest)?;

    if tracker.is_cancelled() {
        return Err(LapseError::Cancelled);
    }

    transition(state, events, ExportState::Exporting { progress: 0.0 });
    strategy.run(plan, tracker)
}

/// Map the worker result onto the terminal state and clean up partial output.
fn settle(
    plan: &ExportPlan,
    state: &Arc<Mutex<ExportState>>,
    events: &Sender<ExportState>,
    result: LapseResult<StrategyReport>,
) {
    match result {
        Ok(report) => {
            for warning in &report.warnings {
                warn!("{warning}");
            }
            info!(
                output = %plan.dest.display(),
                frames = report.frames_written,
                duration = report.output_duration,
                "export completed"
            );
            transition(
                state,
                events,
                ExportState::Completed {
                    path: plan.dest.clone(),
                },
            );
        }
        Err(err) if err.is_cancelled() => {
            discard_partial(&plan.dest);
            info!("export cancelled");
            transition(state, events, ExportState::Cancelled);
        }
        Err(err) => {
            discard_partial(&plan.dest);
            warn!("export failed: {err}");
            transition(
                state,
                events,
                ExportState::Failed {
                    reason: err.to_string(),
                },
            );
        }
    }
}

/// Best-effort disk gate: only a successful query showing a shortfall blocks
/// the export; a failing query proceeds with a note.
fn preflight_disk_space(plan: &ExportPlan, probe: &dyn SpaceProbe) -> LapseResult<()> {
    let required = (estimated_output_bytes(plan) as f64 * DISK_SAFETY_MARGIN).ceil() as u64;
    match probe.available_space(destination_dir(&plan.dest)) {
        Ok(available) if available < required => {
            Err(LapseError::InsufficientDiskSpace {
                required,
                available,
            })
        }
        Ok(available) => {
            debug!(required, available, "disk preflight passed");
            Ok(())
        }
        Err(err) => {
            debug!("disk space check unavailable ({err}); proceeding");
            Ok(())
        }
    }
}

fn remove_output(dest: &Path) -> LapseResult<()> {
    match std::fs::remove_file(dest) {
        Ok(()) => {
            debug!(path = %dest.display(), "removed pre-existing output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LapseError::Io(e)),
    }
}

fn discard_partial(dest: &Path) {
    if let Err(e) = std::fs::remove_file(dest) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dest.display(), "could not remove partial output: {e}");
        }
    }
}
